//! wsgate-server: WebSocket fan-out gateway.
//!
//! Accepts WebSocket clients, authenticates each request with a signed
//! session token, and fans its calls out to the configured backends.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use wsgate_core::TokenAuthority;
use wsgate_server::backend::Registry;
use wsgate_server::config::ServerConfig;
use wsgate_server::server::GatewayServer;

/// wsgate-server: WebSocket fan-out gateway
#[derive(Parser, Debug)]
#[command(name = "wsgate-server", version, about = "WebSocket fan-out gateway")]
struct Cli {
    /// Listen host (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Listen port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Config file path
    #[arg(long, default_value = "~/.wsgate/config.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting wsgate-server");

    let server = match build_server(&cli) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!(error = ?e, "failed to start");
            std::process::exit(1);
        }
    };

    if let Err(e) = server.run(shutdown_signal()).await {
        error!(error = %e, "server error");
        std::process::exit(1);
    }

    info!("wsgate-server stopped");
}

fn build_server(cli: &Cli) -> anyhow::Result<GatewayServer> {
    let config_path = PathBuf::from(&cli.config);
    let config = ServerConfig::load(Some(&config_path), cli.host.as_deref(), cli.port)
        .context("loading config")?;
    let registry = Registry::from_config(&config.backends).context("building backend registry")?;
    info!(
        addr = %config.bind_addr(),
        backends = ?registry.names(),
        "configuration loaded"
    );
    let authority = TokenAuthority::new().context("creating token authority")?;
    Ok(GatewayServer::new(config, registry, authority))
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }

    info!("received shutdown signal");
}
