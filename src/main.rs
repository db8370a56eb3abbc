//! fastpull - accelerator proxy for container images and GitHub downloads
//!
//! Main entry point: loads configuration, wires up the shared state, and
//! runs the HTTP server until SIGINT/SIGTERM.

use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use fastpull::cidr::CidrList;
use fastpull::config::Config;
use fastpull::ratelimit::RateLimiter;
use fastpull::server::{AppState, Server};

/// fastpull - accelerator proxy for container images and GitHub downloads
#[derive(Parser, Debug)]
#[command(name = "fastpull")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = "FASTPULL_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::load(args.config.as_deref())
        .map_err(|e| anyhow::anyhow!("failed to load config: {e}"))?;

    init_tracing(&config.logging.level);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting fastpull"
    );

    let config = Arc::new(config);

    let limiter = Arc::new(RateLimiter::new(
        config.rate_limit.request_limit,
        config.rate_limit.period(),
        CidrList::from_strings(&config.security.white_list),
        CidrList::from_strings(&config.security.black_list),
    ));
    let _janitor = limiter.spawn_janitor();

    let state = AppState::new(Arc::clone(&config), Arc::clone(&limiter));
    let server = Server::new(config.server.clone(), state);

    info!(
        host = %config.server.host,
        port = %config.server.port,
        registries = config.registries.len(),
        "starting HTTP server"
    );

    server.run(shutdown_signal()).await?;

    info!("fastpull shutdown complete");
    Ok(())
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("fastpull={level},tower_http=warn")));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Resolves when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received Ctrl+C, shutting down");
        }
        _ = terminate => {
            info!("received SIGTERM, shutting down");
        }
    }
}
