//! Webhost proxy sidecar daemon
//!
//! Accepts route registrations from the control plane and applies them to
//! the local nginx.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use webhost_proxy::ProxyConfig;

#[derive(Parser)]
#[command(name = "webhost-proxyd")]
#[command(about = "Webhost proxy sidecar - nginx route control")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "WEBHOST_PROXY_CONFIG", default_value = "/etc/webhost/proxy.toml")]
    config: PathBuf,

    /// HTTP listen address (overrides config)
    #[arg(short, long, env = "WEBHOST_PROXY_LISTEN")]
    listen: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    info!("Webhost proxy sidecar v{}", webhost_common::VERSION);

    let mut config = ProxyConfig::load(&cli.config)?;
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }

    if !nix::unistd::geteuid().is_root() {
        warn!("Not running as root; writing nginx fragments or reloading may fail");
    }

    if config.listens_publicly() {
        warn!(
            "Control endpoint on {} has no authentication; keep it on a private network",
            config.listen
        );
    }

    let service = Arc::new(webhost_proxy::build_service(&config)?);
    let app = webhost_proxy::router(service);

    let listener = tokio::net::TcpListener::bind(&config.listen).await?;
    info!("Proxy control endpoint listening on {}", config.listen);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = axum::serve(listener, app) => {
            if let Err(e) = result {
                tracing::error!("Server error: {}", e);
            }
        }
    }

    info!("Proxy sidecar shutdown complete");
    Ok(())
}
