use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, Instrument};
use uuid::Uuid;

use crate::{
    config::JudgeConfig,
    coordinator::JobCoordinator,
    error::Error,
    types::{CompileRequest, ExecutionResult, Language},
};

/// Shared entry point for judging submissions. Cloning is cheap; all clones
/// share the coordinator and the concurrency gate.
#[derive(Clone)]
pub struct CodeJudgeService {
    coordinator: Arc<JobCoordinator>,
    semaphore: Arc<Semaphore>,
}

impl CodeJudgeService {
    pub fn new(config: &JudgeConfig) -> Result<Self, Error> {
        let coordinator = JobCoordinator::new(config)?;
        info!(
            languages = ?coordinator.languages(),
            max_concurrent_jobs = config.max_concurrent_jobs,
            "Code judge ready"
        );

        Ok(Self::with_coordinator(coordinator, config.max_concurrent_jobs))
    }

    pub fn with_coordinator(coordinator: JobCoordinator, max_concurrent_jobs: usize) -> Self {
        Self {
            coordinator: Arc::new(coordinator),
            semaphore: Arc::new(Semaphore::new(max_concurrent_jobs)),
        }
    }

    pub async fn judge(&self, request: CompileRequest) -> Result<Vec<ExecutionResult>, Error> {
        let job_id = Uuid::new_v4();
        let span = tracing::info_span!("job", id = %job_id, language = %request.language);

        async move {
            // Requests that can never run must not wait behind queued jobs.
            if !self.coordinator.supports(request.language) {
                let e = Error::UnsupportedLanguage(format!(
                    "{} (toolchain not available)",
                    request.language
                ));
                info!("Job rejected: {}", e);
                return Err(e);
            }

            // Acquire execution permit
            let _permit = self
                .semaphore
                .acquire()
                .await
                .map_err(|e| Error::Internal(format!("failed to acquire execution permit: {}", e)))?;

            debug!(test_cases = request.test_cases.len(), "Starting job");

            let result = self.coordinator.judge(&request).await;

            match &result {
                Ok(results) => info!(
                    passed = results.iter().filter(|r| r.passed).count(),
                    total = results.len(),
                    "Job completed"
                ),
                Err(e) if e.is_client_error() => info!("Job rejected: {}", e),
                Err(e) => error!("Job failed: {}", e),
            }

            result
        }
        .instrument(span)
        .await
    }

    pub fn languages(&self) -> Vec<Language> {
        self.coordinator.languages()
    }

    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }
}
