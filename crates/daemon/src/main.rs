//! Runwright Daemon
//!
//! Accepts test-run requests over HTTP and drives the external test
//! executable for each of them.

use clap::Parser;
use runwright_daemon::api::{self, ApiState};
use runwright_daemon::{DaemonConfig, Orchestrator};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "runwrightd")]
#[command(about = "Runwright daemon - browser test run orchestration")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "runwright.toml")]
    config: PathBuf,

    /// HTTP listen address
    #[arg(short, long, env = "RUNWRIGHT_LISTEN")]
    listen: Option<String>,

    /// Working directory of the test executable
    #[arg(short, long, env = "RUNWRIGHT_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    info!("Runwright daemon v{}", runwright_common::VERSION);

    let mut config = DaemonConfig::load(&cli.config)?;
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    if let Some(workspace) = cli.workspace {
        config.runner.workspace_dir = workspace;
    }
    config.runner.validate()?;

    info!(
        "Test workspace {}, scratch files in {}",
        config.runner.workspace_dir.display(),
        config.runner.tests_path().display()
    );

    let orchestrator = Orchestrator::new(config.runner.clone());
    let app = api::router(ApiState {
        orchestrator: orchestrator.clone(),
        frontend_url: config.frontend_url.clone(),
    });

    let listener = tokio::net::TcpListener::bind(&config.listen).await?;
    info!("Daemon listening on http://{}", listener.local_addr()?);

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = axum::serve(listener, app) => {
            if let Err(e) = result {
                tracing::error!("HTTP server error: {}", e);
            }
        }
    }

    orchestrator.shutdown();
    info!("Daemon shutdown complete");
    Ok(())
}
