//! nginx fragment rendering and file management
//!
//! Each tenant gets two fragment files that the top-level nginx config pulls
//! in via `include`: an HTTP `location` block and a TCP `stream` server.
//! Files are always replaced whole, never edited in place.

use crate::config::ProxyConfig;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use webhost_common::{validate_identifier, AgentInfo, Error, Result};

/// Renders and writes per-tenant proxy fragments.
#[derive(Debug, Clone)]
pub struct ProxyConfigWriter {
    locations_dir: PathBuf,
    streams_dir: PathBuf,
    upstream_port: u16,
    ssh_upstream_port: u16,
}

impl ProxyConfigWriter {
    pub fn new(config: &ProxyConfig) -> Self {
        Self {
            locations_dir: config.locations_dir.clone(),
            streams_dir: config.streams_dir.clone(),
            upstream_port: config.upstream_port,
            ssh_upstream_port: config.ssh_upstream_port,
        }
    }

    pub fn location_path(&self, username: &str) -> PathBuf {
        self.locations_dir.join(format!("{}.conf", username))
    }

    pub fn stream_path(&self, username: &str) -> PathBuf {
        self.streams_dir.join(format!("sftp_{}.conf", username))
    }

    /// HTTP location block routing `/code/<username>/` to the VM.
    pub fn render_http(&self, agent: &AgentInfo) -> String {
        format!(
            "# webhost: {hostname}\n\
             location /code/{username}/ {{\n\
             \x20   proxy_pass http://{address}:{port}/;\n\
             \x20   proxy_set_header Host $host;\n\
             \x20   proxy_set_header X-Real-IP $remote_addr;\n\
             }}\n",
            hostname = agent.hostname,
            username = agent.username,
            address = agent.vm_address,
            port = self.upstream_port,
        )
    }

    /// Stream server forwarding the tenant's SSH port to the VM.
    pub fn render_stream(&self, agent: &AgentInfo) -> String {
        format!(
            "# webhost: {hostname}\n\
             server {{\n\
             \x20   listen {listen};\n\
             \x20   proxy_pass {address}:{port};\n\
             }}\n",
            hostname = agent.hostname,
            listen = agent.ssh_port,
            address = agent.vm_address,
            port = self.ssh_upstream_port,
        )
    }

    pub fn write_http_config(&self, agent: &AgentInfo) -> Result<()> {
        agent.validate()?;
        let path = self.location_path(&agent.username);
        write_atomic(&path, &self.render_http(agent))?;
        info!("Wrote HTTP fragment for {} at {:?}", agent.username, path);
        Ok(())
    }

    pub fn write_stream_config(&self, agent: &AgentInfo) -> Result<()> {
        agent.validate()?;
        let path = self.stream_path(&agent.username);
        write_atomic(&path, &self.render_stream(agent))?;
        info!("Wrote stream fragment for {} at {:?}", agent.username, path);
        Ok(())
    }

    /// Delete both fragments for `username`. Missing files are fine.
    pub fn remove_config(&self, username: &str) -> Result<()> {
        validate_identifier("username", username)?;
        for path in [self.location_path(username), self.stream_path(username)] {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!("Removed {:?}", path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!("Fragment {:?} already absent", path);
                }
                Err(e) => {
                    return Err(Error::ProxyConfig(format!(
                        "failed to remove {}: {}",
                        path.display(),
                        e
                    )));
                }
            }
        }
        info!("Removed proxy fragments for {}", username);
        Ok(())
    }
}

/// Replace `path` with `content` so readers see either the old file or the
/// complete new one, and the data is on disk before this returns.
fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::ProxyConfig(format!("{} has no parent directory", path.display())))?;
    let config_err =
        |what: &str, e: std::io::Error| Error::ProxyConfig(format!("{} {}: {}", what, dir.display(), e));

    std::fs::create_dir_all(dir).map_err(|e| config_err("failed to create", e))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| config_err("failed to stage in", e))?;
    tmp.write_all(content.as_bytes())
        .map_err(|e| config_err("failed to write in", e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| config_err("failed to sync in", e))?;
    tmp.persist(path).map_err(|e| {
        Error::ProxyConfig(format!("failed to replace {}: {}", path.display(), e.error))
    })?;

    std::fs::File::open(dir)
        .and_then(|d| d.sync_all())
        .map_err(|e| config_err("failed to sync", e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tempfile::TempDir;

    fn writer(dir: &TempDir) -> ProxyConfigWriter {
        let config = ProxyConfig {
            locations_dir: dir.path().join("locations"),
            streams_dir: dir.path().join("streams"),
            ..Default::default()
        };
        ProxyConfigWriter::new(&config)
    }

    fn alice() -> AgentInfo {
        AgentInfo {
            username: "alice".to_string(),
            hostname: "alice-vm".to_string(),
            vm_address: Ipv4Addr::new(10, 0, 0, 5),
            ssh_port: 20007,
        }
    }

    #[test]
    fn test_render_http() {
        let dir = TempDir::new().unwrap();
        let rendered = writer(&dir).render_http(&alice());

        let location_lines: Vec<&str> = rendered
            .lines()
            .filter(|l| l.trim_start().starts_with("location "))
            .collect();
        assert_eq!(location_lines, vec!["location /code/alice/ {"]);
        assert_eq!(rendered.matches("/code/alice/").count(), 1);
        assert!(rendered.contains("proxy_pass http://10.0.0.5:8080/;"));
        assert_eq!(rendered.matches("10.0.0.5").count(), 1);
    }

    #[test]
    fn test_render_stream_listens_on_ssh_port() {
        let dir = TempDir::new().unwrap();
        let rendered = writer(&dir).render_stream(&alice());
        assert!(rendered.contains("listen 20007;"));
        assert!(rendered.contains("proxy_pass 10.0.0.5:22;"));
    }

    #[test]
    fn test_write_creates_directories_and_overwrites() {
        let dir = TempDir::new().unwrap();
        let w = writer(&dir);
        let mut agent = alice();

        w.write_http_config(&agent).unwrap();
        w.write_stream_config(&agent).unwrap();
        assert!(w.location_path("alice").exists());
        assert!(w.stream_path("alice").exists());

        agent.vm_address = Ipv4Addr::new(10, 0, 0, 9);
        w.write_http_config(&agent).unwrap();
        let content = std::fs::read_to_string(w.location_path("alice")).unwrap();
        assert!(content.contains("10.0.0.9"));
        assert!(!content.contains("10.0.0.5"));

        // No staging files left behind
        let entries = std::fs::read_dir(dir.path().join("locations")).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_write_remove_remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let w = writer(&dir);

        w.write_http_config(&alice()).unwrap();
        w.write_stream_config(&alice()).unwrap();
        w.remove_config("alice").unwrap();
        assert!(!w.location_path("alice").exists());
        assert!(!w.stream_path("alice").exists());
        w.remove_config("alice").unwrap();
    }

    #[test]
    fn test_invalid_agent_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let w = writer(&dir);
        let mut agent = alice();
        agent.username = "alice;\n}\nserver {".to_string();

        assert!(matches!(w.write_http_config(&agent), Err(Error::Validation(_))));
        assert!(!dir.path().join("locations").exists());
        assert!(matches!(w.remove_config("../etc"), Err(Error::Validation(_))));
    }

    #[test]
    fn test_unwritable_directory_is_proxy_config_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("locations");
        std::fs::write(&blocker, "not a directory").unwrap();

        let result = writer(&dir).write_http_config(&alice());
        assert!(matches!(result, Err(Error::ProxyConfig(_))));
    }
}
