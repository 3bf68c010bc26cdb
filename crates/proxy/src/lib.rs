//! Webhost proxy sidecar
//!
//! Renders per-tenant nginx fragments, reloads nginx, and exposes both
//! operations over a small HTTP control endpoint.

pub mod config;
pub mod nginx;
pub mod reload;
pub mod server;
pub mod service;

pub use config::{ProxyConfig, ReloadConfig};
pub use nginx::ProxyConfigWriter;
pub use reload::{CommandReloader, ProxyReloader, SignalReloader};
pub use server::{router, ApiError};
pub use service::ProxyService;

use std::sync::Arc;

/// Wire up a writer and reloader from configuration.
pub fn build_service(config: &ProxyConfig) -> webhost_common::Result<ProxyService> {
    let writer = ProxyConfigWriter::new(config);
    let reloader: Arc<dyn ProxyReloader> = reload::from_config(&config.reload)?;
    Ok(ProxyService::new(writer, reloader))
}
