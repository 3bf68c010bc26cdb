//! Proxy reload triggers

use crate::config::ReloadConfig;
use async_trait::async_trait;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};
use webhost_common::{Error, Result};

/// Tells the running proxy to re-read its configuration.
#[async_trait]
pub trait ProxyReloader: Send + Sync {
    async fn reload(&self) -> Result<()>;
}

/// Pick the reloader described by `config`.
pub fn from_config(config: &ReloadConfig) -> Result<Arc<dyn ProxyReloader>> {
    let timeout = Duration::from_secs(config.timeout_secs);
    match &config.pid_file {
        Some(pid_file) => Ok(Arc::new(SignalReloader::new(pid_file.clone()))),
        None => Ok(Arc::new(CommandReloader::new(
            config.command.clone(),
            config.test_command.clone(),
            timeout,
        )?)),
    }
}

/// Runs an external reload command such as `nginx -s reload`.
pub struct CommandReloader {
    command: Vec<String>,
    test_command: Option<Vec<String>>,
    timeout: Duration,
}

impl CommandReloader {
    pub fn new(
        command: Vec<String>,
        test_command: Option<Vec<String>>,
        timeout: Duration,
    ) -> Result<Self> {
        if command.is_empty() {
            return Err(Error::Validation("reload command is empty".to_string()));
        }
        if test_command.as_ref().is_some_and(|c| c.is_empty()) {
            return Err(Error::Validation("reload test command is empty".to_string()));
        }
        Ok(Self {
            command,
            test_command,
            timeout,
        })
    }

    async fn run(&self, argv: &[String]) -> Result<()> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| Error::ProxyReload("empty command".to_string()))?;
        debug!("Running: {} {}", program, args.join(" "));

        let output = tokio::time::timeout(
            self.timeout,
            Command::new(program).args(args).kill_on_drop(true).output(),
        )
        .await
        .map_err(|_| Error::timeout(format!("proxy reload ({})", program), self.timeout))?
        .map_err(|e| Error::ProxyReload(format!("failed to run {}: {}", program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::ProxyReload(format!(
                "{} exited with {}: {}",
                argv.join(" "),
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ProxyReloader for CommandReloader {
    async fn reload(&self) -> Result<()> {
        if let Some(test) = &self.test_command {
            self.run(test).await?;
        }
        self.run(&self.command).await?;
        info!("Proxy reloaded");
        Ok(())
    }
}

/// Sends SIGHUP to the proxy master process named in a pid file.
pub struct SignalReloader {
    pid_file: PathBuf,
}

impl SignalReloader {
    pub fn new(pid_file: PathBuf) -> Self {
        Self { pid_file }
    }

    async fn read_pid(&self) -> Result<Pid> {
        let content = tokio::fs::read_to_string(&self.pid_file).await.map_err(|e| {
            Error::ProxyReload(format!("failed to read {}: {}", self.pid_file.display(), e))
        })?;
        let pid: i32 = content.trim().parse().map_err(|_| {
            Error::ProxyReload(format!(
                "{} does not contain a pid: {:?}",
                self.pid_file.display(),
                content.trim()
            ))
        })?;
        if pid <= 0 {
            return Err(Error::ProxyReload(format!("invalid pid {}", pid)));
        }
        Ok(Pid::from_raw(pid))
    }
}

#[async_trait]
impl ProxyReloader for SignalReloader {
    async fn reload(&self) -> Result<()> {
        let pid = self.read_pid().await?;
        kill(pid, Signal::SIGHUP)
            .map_err(|e| Error::ProxyReload(format!("failed to signal {}: {}", pid, e)))?;
        info!("Sent SIGHUP to proxy (pid {})", pid);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_command_success() {
        let reloader = CommandReloader::new(argv(&["true"]), None, Duration::from_secs(5)).unwrap();
        reloader.reload().await.unwrap();
    }

    #[tokio::test]
    async fn test_command_failure_carries_stderr() {
        let reloader = CommandReloader::new(
            argv(&["sh", "-c", "echo 'emerg: bad directive' >&2; exit 1"]),
            None,
            Duration::from_secs(5),
        )
        .unwrap();
        match reloader.reload().await {
            Err(Error::ProxyReload(msg)) => assert!(msg.contains("bad directive")),
            other => panic!("expected ProxyReload, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failed_check_skips_reload() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("reloaded");
        let reloader = CommandReloader::new(
            argv(&["touch", marker.to_str().unwrap()]),
            Some(argv(&["false"])),
            Duration::from_secs(5),
        )
        .unwrap();

        assert!(reloader.reload().await.is_err());
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_command_timeout() {
        let reloader =
            CommandReloader::new(argv(&["sleep", "5"]), None, Duration::from_millis(100)).unwrap();
        assert!(matches!(reloader.reload().await, Err(Error::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let reloader = CommandReloader::new(
            argv(&["/nonexistent/nginx", "-s", "reload"]),
            None,
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(matches!(reloader.reload().await, Err(Error::ProxyReload(_))));
    }

    #[test]
    fn test_empty_command_rejected() {
        assert!(CommandReloader::new(vec![], None, Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn test_signal_reloader_bad_pid_file() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("nginx.pid");

        let reloader = SignalReloader::new(pid_file.clone());
        assert!(matches!(reloader.reload().await, Err(Error::ProxyReload(_))));

        std::fs::write(&pid_file, "garbage\n").unwrap();
        assert!(matches!(reloader.reload().await, Err(Error::ProxyReload(_))));
    }

    #[tokio::test]
    async fn test_signal_reloader_signals_child() {
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("nginx.pid");
        std::fs::write(&pid_file, format!("{}\n", child.id())).unwrap();

        SignalReloader::new(pid_file).reload().await.unwrap();

        // sleep has no SIGHUP handler, so the signal terminates it
        let status = child.wait().unwrap();
        assert!(!status.success());
    }
}
