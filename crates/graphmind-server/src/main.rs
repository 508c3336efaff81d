//! graphmind backend binary.
//!
//! Boots every infrastructure backend, waits for a shutdown signal and tears
//! everything down.
//!
//! # Usage
//!
//! ```bash
//! # With config file
//! graphmind --config config.yaml
//!
//! # With environment variables only
//! GRAPHMIND_REL_DB__URL=postgres://localhost/graphmind graphmind
//! ```

use std::io::Write;

use clap::Parser;
use tokio::signal;
use tracing::{error, info};

use graphmind_server::observability::{init_logging, LoggingConfig};
use graphmind_server::{AppContext, ServerConfig};

/// graphmind - knowledge-graph backend infrastructure
#[derive(Parser, Debug)]
#[command(name = "graphmind")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = if let Some(config_path) = args.config {
        ServerConfig::load(&config_path)?
    } else {
        ServerConfig::from_env()?
    };

    init_logging(LoggingConfig::from(&config.logging));
    info!(version = env!("CARGO_PKG_VERSION"), "Starting graphmind");

    let ctx = AppContext::from_config(&config)?;

    if let Err(e) = ctx.prepare().await {
        error!(error = %e, "Startup aborted");
        if let Err(e) = ctx.shutdown().await {
            error!(error = %e, "Cleanup after failed startup was incomplete");
        }
        flush_logs();
        return Err(e.into());
    }
    info!("graphmind is ready");

    shutdown_signal().await?;

    let result = ctx.shutdown().await;
    info!("Shutdown complete");
    flush_logs();
    result.map_err(Into::into)
}

/// Waits for Ctrl+C or SIGTERM.
async fn shutdown_signal() -> std::io::Result<()> {
    let ctrl_c = signal::ctrl_c();

    #[cfg(unix)]
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    #[cfg(unix)]
    let terminate = terminate.recv();

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Option<()>>();

    tokio::select! {
        result = ctrl_c => {
            result?;
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
    Ok(())
}

fn flush_logs() {
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();
}
