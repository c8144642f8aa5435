use clap::Parser;
use code_judge::{CodeJudgeService, JudgeConfig};
use code_judge_server::{create_app, run_server, DEFAULT_BODY_LIMIT};
use std::{net::SocketAddr, path::PathBuf, time::Duration};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to listen on
    #[arg(short, long, env = "JUDGE_ADDR", default_value = "0.0.0.0:3002")]
    addr: SocketAddr,

    /// TOML configuration file
    #[arg(short, long, env = "JUDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Maximum number of concurrent jobs
    #[arg(short, long)]
    max_concurrent: Option<usize>,

    /// Wall-clock limit per test case run, in seconds
    #[arg(long)]
    run_timeout: Option<u64>,

    /// Maximum request body size in bytes
    #[arg(long, default_value_t = DEFAULT_BODY_LIMIT)]
    body_limit: usize,
}

impl Args {
    fn judge_config(&self) -> anyhow::Result<JudgeConfig> {
        let mut config = match &self.config {
            Some(path) => JudgeConfig::from_file(path)?,
            None => JudgeConfig::default(),
        };

        if let Some(max_concurrent) = self.max_concurrent {
            config.max_concurrent_jobs = max_concurrent;
        }
        if let Some(run_timeout) = self.run_timeout {
            config.run_timeout = Duration::from_secs(run_timeout);
        }

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = args.judge_config()?;
    info!(work_root = %config.work_root.display(), "Loaded configuration");

    let service = CodeJudgeService::new(&config)?;
    let app = create_app(service, args.body_limit);
    run_server(app, args.addr).await?;

    Ok(())
}
