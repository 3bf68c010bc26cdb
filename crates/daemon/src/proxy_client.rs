//! Proxy control from the daemon
//!
//! `LocalProxy` writes fragments and reloads nginx in-process; `RemoteProxy`
//! calls the sidecar's control endpoint when nginx runs on another host.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use webhost_common::{AgentInfo, Error, ErrorBody, Result};
use webhost_proxy::{ProxyConfigWriter, ProxyReloader};

#[async_trait]
pub trait ProxyControl: Send + Sync {
    /// Install both fragments for a tenant.
    async fn write_config(&self, agent: &AgentInfo) -> Result<()>;

    /// Remove a tenant's fragments. Absent fragments are not an error.
    async fn remove_config(&self, username: &str) -> Result<()>;

    /// Make the proxy pick up the current fragments.
    async fn reload(&self) -> Result<()>;
}

/// Drives a proxy on the same host.
pub struct LocalProxy {
    writer: ProxyConfigWriter,
    reloader: Arc<dyn ProxyReloader>,
}

impl LocalProxy {
    pub fn new(writer: ProxyConfigWriter, reloader: Arc<dyn ProxyReloader>) -> Self {
        Self { writer, reloader }
    }
}

#[async_trait]
impl ProxyControl for LocalProxy {
    async fn write_config(&self, agent: &AgentInfo) -> Result<()> {
        let writer = self.writer.clone();
        let agent = agent.clone();
        tokio::task::spawn_blocking(move || {
            writer.write_http_config(&agent)?;
            writer.write_stream_config(&agent)
        })
        .await
        .map_err(|e| Error::Internal(format!("proxy config task failed: {}", e)))?
    }

    async fn remove_config(&self, username: &str) -> Result<()> {
        let writer = self.writer.clone();
        let username = username.to_string();
        tokio::task::spawn_blocking(move || writer.remove_config(&username))
            .await
            .map_err(|e| Error::Internal(format!("proxy config task failed: {}", e)))?
    }

    async fn reload(&self) -> Result<()> {
        self.reloader.reload().await
    }
}

/// Client for the proxy sidecar's HTTP control endpoint.
///
/// The sidecar reloads nginx as part of every register and remove call, so
/// `reload` has nothing left to do.
pub struct RemoteProxy {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl RemoteProxy {
    pub fn new(addr: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {}", e)))?;
        let base_url = if addr.starts_with("http://") || addr.starts_with("https://") {
            addr.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", addr)
        };
        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn transport_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::timeout("proxy sidecar request", self.timeout)
        } else {
            Error::ProxyConfig(format!("proxy sidecar unreachable: {}", e))
        }
    }

    async fn check(&self, response: reqwest::Response) -> Result<()> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let text = response.text().await.unwrap_or_default();
        Err(match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => body.kind.into_error(body.error),
            Err(_) if status.is_client_error() => {
                Error::Validation(format!("proxy sidecar returned {}: {}", status, text))
            }
            Err(_) => Error::ProxyConfig(format!("proxy sidecar returned {}: {}", status, text)),
        })
    }
}

#[async_trait]
impl ProxyControl for RemoteProxy {
    async fn write_config(&self, agent: &AgentInfo) -> Result<()> {
        let url = format!("{}/proxy/register", self.base_url);
        debug!("POST {}", url);
        let response = self
            .client
            .post(&url)
            .json(agent)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        self.check(response).await
    }

    async fn remove_config(&self, username: &str) -> Result<()> {
        webhost_common::validate_identifier("username", username)?;
        let url = format!("{}/proxy/{}", self.base_url, username);
        debug!("DELETE {}", url);
        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        self.check(response).await
    }

    async fn reload(&self) -> Result<()> {
        Ok(())
    }
}
