use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use code_judge::{CodeJudgeService, CompileRequest, ExecutionResult, Language, TestCase};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};

/// Request bodies larger than this are rejected with 413.
pub const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Rejected(#[from] JsonRejection),
    #[error(transparent)]
    Judge(#[from] code_judge::Error),
    #[error("Server error: {0}")]
    ServerError(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::Rejected(rejection) => {
                // Missing fields and type mismatches surface as 422; callers get 400.
                let status = match rejection.status() {
                    StatusCode::UNPROCESSABLE_ENTITY => StatusCode::BAD_REQUEST,
                    status => status,
                };
                (status, rejection.body_text())
            }
            ServerError::Judge(e) if e.is_client_error() => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            ServerError::Judge(_) | ServerError::ServerError(_) => {
                error!("Request failed: {}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Wire form of a compile request. The language stays a string here so an
/// unknown name is reported as an unsupported language rather than a
/// deserialization failure.
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompilePayload {
    pub code: String,
    pub language: String,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CompileResponse {
    pub results: Vec<ExecutionResult>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub available_slots: usize,
    pub languages: Vec<Language>,
}

#[derive(Clone)]
pub struct AppState {
    service: CodeJudgeService,
}

pub fn create_app(service: CodeJudgeService, body_limit: usize) -> Router {
    let state = AppState { service };

    let cors = CorsLayer::permissive();

    Router::new()
        .route("/health", get(health_check))
        .route("/compile", post(compile))
        .route("/api/compile", post(compile))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

pub async fn run_server(app: Router, addr: SocketAddr) -> Result<(), ServerError> {
    info!("Starting code judge server on {}", addr);
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::ServerError(e.to_string()))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ServerError::ServerError(e.to_string()))?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received, draining in-flight jobs"),
        Err(e) => warn!("Failed to listen for ctrl-c: {}", e),
    }
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        available_slots: state.service.available_slots(),
        languages: state.service.languages(),
    })
}

async fn compile(
    State(state): State<AppState>,
    payload: Result<Json<CompilePayload>, JsonRejection>,
) -> Result<Json<CompileResponse>, ServerError> {
    let Json(payload) = payload?;

    let language: Language = payload.language.parse()?;

    let request = CompileRequest {
        code: payload.code,
        language,
        test_cases: payload.test_cases,
    };

    let results = state.service.judge(request).await?;

    Ok(Json(CompileResponse { results }))
}
