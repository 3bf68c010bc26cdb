//! Daemon configuration

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use webhost_common::{PortRange, Subnet};
use webhost_proxy::ProxyConfig;

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// HTTP API listen address
    pub listen: String,

    /// SQLite database path
    pub db_path: PathBuf,

    /// Token and bootstrap account settings
    pub auth: AuthConfig,

    /// Where tenant addresses come from
    pub network: NetworkConfig,

    /// SSH forwarding port range
    pub ports: PortRange,

    /// Proxy control settings
    pub proxy: ProxyControlConfig,

    /// VM provisioner settings
    pub provisioner: ProvisionerConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:5050".to_string(),
            db_path: webhost_common::default_db_path(),
            auth: AuthConfig::default(),
            network: NetworkConfig::default(),
            ports: PortRange::default(),
            proxy: ProxyControlConfig::default(),
            provisioner: ProvisionerConfig::default(),
        }
    }
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC secret for issued tokens
    pub jwt_secret: String,

    /// Token lifetime in seconds
    pub token_ttl_secs: u64,

    /// Admin account created on first start if no users exist
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            token_ttl_secs: 24 * 60 * 60,
            bootstrap_admin: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapAdmin {
    pub email: String,
    pub password: String,
    #[serde(default = "default_admin_name")]
    pub name: String,
}

fn default_admin_name() -> String {
    "Administrator".to_string()
}

/// Address source for tenant VMs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum NetworkConfig {
    /// Fixed subnet and gateway
    Static { subnet: Subnet, gateway: Ipv4Addr },
    /// Read subnet and gateway from a libvirt network at startup
    Libvirt { network: String },
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig::Libvirt {
            network: "default".to_string(),
        }
    }
}

/// Whether the proxy is driven in-process or through the sidecar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyMode {
    Local,
    Remote,
}

/// Proxy control configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyControlConfig {
    pub mode: ProxyMode,

    /// Sidecar address for `remote` mode
    pub remote_addr: String,

    /// Timeout for each proxy control call in seconds
    pub timeout_secs: u64,

    /// Writer and reload settings for `local` mode
    pub local: ProxyConfig,
}

impl Default for ProxyControlConfig {
    fn default() -> Self {
        Self {
            mode: ProxyMode::Remote,
            remote_addr: "127.0.0.1:5003".to_string(),
            timeout_secs: 30,
            local: ProxyConfig::default(),
        }
    }
}

impl ProxyControlConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// libvirt provisioner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionerConfig {
    /// libvirt connection URI
    pub uri: String,

    /// Base image each tenant disk is layered on
    pub template_image: PathBuf,

    /// Directory holding one subdirectory per tenant VM
    pub images_dir: PathBuf,

    /// libvirt network tenant VMs attach to
    pub network: String,

    pub memory_mb: u32,

    pub vcpus: u32,

    /// Tool that builds the cloud-init seed ISO
    pub seed_tool: String,

    /// `virsh` binary
    pub virsh: String,

    /// `qemu-img` binary
    pub qemu_img: String,

    /// Login user created inside each VM
    pub default_user: String,

    /// Public keys installed for the default user
    pub ssh_authorized_keys: Vec<String>,

    /// Timeout for each provisioner call in seconds
    pub timeout_secs: u64,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            uri: "qemu:///system".to_string(),
            template_image: PathBuf::from("/var/lib/libvirt/images/webhost-template.qcow2"),
            images_dir: PathBuf::from("/var/lib/libvirt/images/webhost"),
            network: "default".to_string(),
            memory_mb: 1024,
            vcpus: 1,
            seed_tool: "cloud-localds".to_string(),
            virsh: "virsh".to_string(),
            qemu_img: "qemu-img".to_string(),
            default_user: "webhost".to_string(),
            ssh_authorized_keys: Vec::new(),
            timeout_secs: 300,
        }
    }
}

impl ProvisionerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl DaemonConfig {
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

    /// Check settings that would otherwise fail on first use.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.auth.jwt_secret.is_empty() {
            anyhow::bail!("auth.jwt_secret must be set");
        }
        self.ports.validate()?;
        if let NetworkConfig::Static { subnet, gateway } = &self.network {
            if !subnet.contains(*gateway) {
                anyhow::bail!("gateway {} is outside subnet {}", gateway, subnet);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DaemonConfig::default();
        assert_eq!(config.listen, "0.0.0.0:5050");
        assert_eq!(config.ports, PortRange { base: 20000, max: 30000 });
        assert_eq!(config.proxy.remote_addr, "127.0.0.1:5003");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_static_network() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("webhost.toml");
        std::fs::write(
            &path,
            r#"
listen = "127.0.0.1:8000"

[auth]
jwt_secret = "s3cret"

[network]
source = "static"
subnet = "10.10.0.0/24"
gateway = "10.10.0.1"

[ports]
base = 22000
max = 22100

[proxy]
mode = "local"

[proxy.local]
locations_dir = "/tmp/locations"
"#,
        )
        .unwrap();

        let config = DaemonConfig::load(&path).unwrap();
        config.validate().unwrap();
        assert_eq!(config.listen, "127.0.0.1:8000");
        assert_eq!(config.proxy.mode, ProxyMode::Local);
        assert_eq!(config.proxy.local.locations_dir, PathBuf::from("/tmp/locations"));
        assert_eq!(config.ports.base, 22000);
        match config.network {
            NetworkConfig::Static { subnet, gateway } => {
                assert_eq!(subnet.to_string(), "10.10.0.0/24");
                assert_eq!(gateway, Ipv4Addr::new(10, 10, 0, 1));
            }
            other => panic!("unexpected network config {:?}", other),
        }
    }

    #[test]
    fn test_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("webhost.toml");

        let mut config = DaemonConfig::default();
        config.auth.jwt_secret = "k".to_string();
        config.save(&path).unwrap();

        let loaded = DaemonConfig::load(&path).unwrap();
        assert_eq!(loaded.auth.jwt_secret, "k");
        assert!(matches!(loaded.network, NetworkConfig::Libvirt { .. }));
    }

    #[test]
    fn test_gateway_outside_subnet_rejected() {
        let mut config = DaemonConfig::default();
        config.auth.jwt_secret = "k".to_string();
        config.network = NetworkConfig::Static {
            subnet: "10.0.0.0/24".parse().unwrap(),
            gateway: Ipv4Addr::new(10, 0, 1, 1),
        };
        assert!(config.validate().is_err());
    }
}
