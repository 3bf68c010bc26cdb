//! Webhost Daemon
//!
//! Serves the user and hosting API, provisioning tenant VMs and routing
//! them through the proxy.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use webhost_common::{AllocationPolicy, Database};
use webhost_daemon::{
    api::AppState,
    auth::TokenIssuer,
    config::{NetworkConfig, ProxyMode},
    libvirt::{self, LibvirtProvisioner},
    users::UserService,
    DaemonConfig, HostingOrchestrator, LocalProxy, ProxyControl, RemoteProxy, Timeouts,
};

#[derive(Parser)]
#[command(name = "webhostd")]
#[command(about = "Webhost daemon - tenant VM hosting behind nginx")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "WEBHOST_CONFIG", default_value = "/etc/webhost/webhost.toml")]
    config: PathBuf,

    /// HTTP listen address (overrides config)
    #[arg(short, long, env = "WEBHOST_LISTEN")]
    listen: Option<String>,

    /// Database path (overrides config)
    #[arg(long, env = "WEBHOST_DB")]
    db: Option<PathBuf>,

    /// Token signing secret (overrides config)
    #[arg(long, env = "WEBHOST_JWT_SECRET", hide_env_values = true)]
    jwt_secret: Option<String>,

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

    info!("Webhost daemon v{}", webhost_common::VERSION);

    let mut config = DaemonConfig::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    if let Some(secret) = cli.jwt_secret {
        config.auth.jwt_secret = secret;
    }
    config.validate()?;

    let db = Arc::new(Database::open(&config.db_path)?);

    let tokens = TokenIssuer::new(
        config.auth.jwt_secret.as_bytes(),
        Duration::from_secs(config.auth.token_ttl_secs),
    );
    let users = Arc::new(UserService::new(db.clone(), tokens));
    if let Some(admin) = &config.auth.bootstrap_admin {
        users.ensure_bootstrap_admin(admin)?;
    }

    let (subnet, gateway) = match &config.network {
        NetworkConfig::Static { subnet, gateway } => (*subnet, *gateway),
        NetworkConfig::Libvirt { network } => {
            libvirt::discover_network(&config.provisioner.uri, network)
                .await
                .with_context(|| format!("failed to read libvirt network {}", network))?
        }
    };
    let policy = AllocationPolicy::new(subnet, gateway, config.ports)?;
    info!(
        "Allocating from {} (gateway {}), ssh ports {}..={}",
        subnet, gateway, config.ports.base, config.ports.max
    );

    let proxy: Arc<dyn ProxyControl> = match config.proxy.mode {
        ProxyMode::Local => {
            let writer = webhost_proxy::ProxyConfigWriter::new(&config.proxy.local);
            let reloader = webhost_proxy::reload::from_config(&config.proxy.local.reload)?;
            Arc::new(LocalProxy::new(writer, reloader))
        }
        ProxyMode::Remote => {
            info!("Using proxy sidecar at {}", config.proxy.remote_addr);
            Arc::new(RemoteProxy::new(
                &config.proxy.remote_addr,
                config.proxy.timeout(),
            )?)
        }
    };

    let provisioner = Arc::new(LibvirtProvisioner::new(config.provisioner.clone()));
    let orchestrator = Arc::new(HostingOrchestrator::new(
        db,
        provisioner,
        proxy,
        policy,
        Timeouts {
            provisioner: config.provisioner.timeout(),
            proxy: config.proxy.timeout(),
        },
    ));

    let app = webhost_daemon::router(AppState {
        users,
        orchestrator,
    });

    let listener = tokio::net::TcpListener::bind(&config.listen).await?;
    info!("API listening on {}", config.listen);

    // Wait for shutdown signal
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

    info!("Daemon shutdown complete");
    Ok(())
}
