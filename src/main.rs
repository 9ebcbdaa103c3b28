//! Process entry point: CLI parsing, logging setup, configuration load,
//! and the daemon's startup/shutdown sequence (§10.5).

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use bg_runner::config::Configuration;
use bg_runner::docker::BollardContainerClient;
use bg_runner::execution::{ScratchProvider, WorkerPool};
use bg_runner::router::{self, AppState};

#[derive(Parser)]
#[command(name = "bg-runner")]
#[command(about = "Sandboxed remote code-execution daemon")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Override pool.worker_count
    #[arg(long)]
    workers: Option<usize>,

    /// Override container.timeout_seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Override container.max_memory_mb
    #[arg(long)]
    memory: Option<i64>,

    /// Override container.cpu_shares
    #[arg(long = "cpu-shares")]
    cpu_shares: Option<i64>,

    /// Override container.max_output_kb
    #[arg(long = "output-kb")]
    output_kb: Option<usize>,

    /// Override container.use_strong_isolation
    #[arg(long = "strong-isolation")]
    strong_isolation: bool,

    /// Override api.host
    #[arg(long)]
    bind: Option<String>,

    /// Override api.port
    #[arg(long)]
    port: Option<u16>,

    /// Override scratch.directory
    #[arg(long = "scratch-dir")]
    scratch_dir: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("bg_runner={log_level}").into()),
        )
        .init();

    info!("starting bg-runner v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(cli).await {
        error!("fatal error: {e:#}");
        std::process::exit(1);
    }

    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Configuration::load(&cli.config)?;

    if let Some(workers) = cli.workers {
        config.pool.worker_count = workers;
    }
    if let Some(timeout) = cli.timeout {
        config.container.timeout_seconds = timeout;
    }
    if let Some(memory) = cli.memory {
        config.container.max_memory_mb = memory;
    }
    if let Some(cpu_shares) = cli.cpu_shares {
        config.container.cpu_shares = cpu_shares;
    }
    if let Some(output_kb) = cli.output_kb {
        config.container.max_output_kb = output_kb;
    }
    if cli.strong_isolation {
        config.container.use_strong_isolation = true;
    }
    if let Some(bind) = cli.bind {
        config.api.host = bind;
    }
    if let Some(port) = cli.port {
        config.api.port = port;
    }
    if let Some(dir) = cli.scratch_dir {
        config.scratch.directory = dir.into();
    }

    info!(
        workers = config.pool.worker_count,
        queue_depth = config.pool.job_queue_depth,
        timeout_s = config.container.timeout_seconds,
        "configuration loaded"
    );

    let client = BollardContainerClient::connect().context("failed to connect to container runtime")?;
    let pool = Arc::new(WorkerPool::start(
        config.pool.worker_count,
        config.pool.job_queue_depth,
        Arc::new(client),
    ));
    let scratch = Arc::new(
        ScratchProvider::new(config.scratch.directory.clone())
            .context("failed to prepare scratch directory")?,
    );

    let state = AppState {
        pool,
        scratch,
        container: Arc::new(config.container.clone()),
    };
    let app = router::build_router(state);

    let bind_addr: SocketAddr = format!("{}:{}", config.api.host, config.api.port)
        .parse()
        .context("invalid bind address")?;
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    info!("listening on {bind_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("bg-runner stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    warn!("received shutdown signal, draining in-flight jobs' connections");
}
