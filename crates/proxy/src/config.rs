//! Proxy sidecar configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Proxy sidecar configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// HTTP listen address of the control endpoint. The endpoint has no
    /// authentication, so it must only be reachable from the daemon's host
    /// or a private network.
    pub listen: String,

    /// Directory holding one HTTP location fragment per tenant
    pub locations_dir: PathBuf,

    /// Directory holding one TCP stream fragment per tenant
    pub streams_dir: PathBuf,

    /// Port the tenant VM serves HTTP on
    pub upstream_port: u16,

    /// Port the tenant VM serves SSH on
    pub ssh_upstream_port: u16,

    /// Reload configuration
    pub reload: ReloadConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:5003".to_string(),
            locations_dir: PathBuf::from("/etc/nginx/webhost/locations"),
            streams_dir: PathBuf::from("/etc/nginx/webhost/streams"),
            upstream_port: 8080,
            ssh_upstream_port: 22,
            reload: ReloadConfig::default(),
        }
    }
}

/// How the proxy process is told to pick up new fragments
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReloadConfig {
    /// Reload command, program first
    pub command: Vec<String>,

    /// Optional syntax check run before reloading (e.g. `nginx -t`)
    pub test_command: Option<Vec<String>>,

    /// Send SIGHUP to the PID in this file instead of running `command`
    pub pid_file: Option<PathBuf>,

    /// Per-command timeout in seconds
    pub timeout_secs: u64,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            command: vec!["nginx".to_string(), "-s".to_string(), "reload".to_string()],
            test_command: None,
            pid_file: None,
            timeout_secs: 30,
        }
    }
}

impl ProxyConfig {
    /// True when the control endpoint accepts connections from other hosts.
    pub fn listens_publicly(&self) -> bool {
        match self.listen.parse::<std::net::SocketAddr>() {
            Ok(addr) => !addr.ip().is_loopback(),
            Err(_) => !self.listen.starts_with("localhost:"),
        }
    }

    /// Load configuration from file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// HTTP fragment path for a tenant
    pub fn location_path(&self, username: &str) -> PathBuf {
        self.locations_dir.join(format!("{}.conf", username))
    }

    /// Stream fragment path for a tenant
    pub fn stream_path(&self, username: &str) -> PathBuf {
        self.streams_dir.join(format!("sftp_{}.conf", username))
    }
}
