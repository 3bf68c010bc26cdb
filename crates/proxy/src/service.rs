//! Register/unregister sequencing over the writer and reloader

use crate::nginx::ProxyConfigWriter;
use crate::reload::ProxyReloader;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;
use webhost_common::{AgentInfo, Error, Result};

/// Applies tenant route changes to the local proxy.
///
/// Fragment writes and the reload that follows them run under one lock, so a
/// reload never observes another request's half-finished write.
pub struct ProxyService {
    writer: ProxyConfigWriter,
    reloader: Arc<dyn ProxyReloader>,
    lock: Mutex<()>,
}

impl ProxyService {
    pub fn new(writer: ProxyConfigWriter, reloader: Arc<dyn ProxyReloader>) -> Self {
        Self {
            writer,
            reloader,
            lock: Mutex::new(()),
        }
    }

    pub fn writer(&self) -> &ProxyConfigWriter {
        &self.writer
    }

    /// Write both fragments for `agent`, then reload.
    pub async fn register(&self, agent: AgentInfo) -> Result<()> {
        agent.validate()?;
        let _guard = self.lock.lock().await;

        let writer = self.writer.clone();
        let username = agent.username.clone();
        run_blocking(move || {
            writer.write_http_config(&agent)?;
            writer.write_stream_config(&agent)
        })
        .await?;

        self.reloader.reload().await?;
        info!("Registered proxy routes for {}", username);
        Ok(())
    }

    /// Remove both fragments for `username`, then reload.
    pub async fn unregister(&self, username: &str) -> Result<()> {
        let _guard = self.lock.lock().await;

        let writer = self.writer.clone();
        let key = username.to_string();
        run_blocking(move || writer.remove_config(&key)).await?;

        self.reloader.reload().await?;
        info!("Unregistered proxy routes for {}", username);
        Ok(())
    }
}

async fn run_blocking<F>(f: F) -> Result<()>
where
    F: FnOnce() -> Result<()> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Internal(format!("proxy config task failed: {}", e)))?
}
