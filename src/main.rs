use std::net::SocketAddr;

use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use gatekeeper::config::GatekeeperConfig;
use gatekeeper::http::{spawn_sweeper, HttpServer};
use gatekeeper::ratelimit::RateLimiter;

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "gatekeeper")]
#[command(about = "Fixed-window rate limit gate for HTTP routes", version)]
struct Args {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long)]
    config: Option<String>,

    /// Override the listen address
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Override the policy overrides file
    #[arg(short, long)]
    policies: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);
    if args.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!("Starting Gatekeeper");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = GatekeeperConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    if let Some(policies) = args.policies {
        config.rate_limiting.policies_path = Some(policies);
    }
    info!(listen_addr = %config.server.listen_addr, "Configuration loaded");

    let policies = config.rate_limiting.policy_registry()?;
    info!(policies = ?policies.names(), "Rate limit policies loaded");

    let limiter = RateLimiter::in_memory();
    let sweeper = spawn_sweeper(limiter.clone(), config.rate_limiting.sweep_interval());

    let server = HttpServer::new(config.server.listen_addr, limiter, policies);
    server.serve_with_shutdown(shutdown_signal()).await?;

    sweeper.abort();
    info!("Gatekeeper stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
