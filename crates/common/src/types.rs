//! Core types for Webhost

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// Longest identifier accepted in proxy fragment names and VM names.
pub const MAX_IDENTIFIER_LEN: usize = 64;

/// Hosting lifecycle status.
///
/// `Deleted` is terminal: a new hosting for the same owner is a fresh record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostingStatus {
    Provisioning,
    Running,
    Stopped,
    Deleted,
}

impl HostingStatus {
    pub fn can_transition_to(self, next: HostingStatus) -> bool {
        use HostingStatus::*;
        matches!(
            (self, next),
            (Provisioning, Running)
                | (Running, Stopped)
                | (Stopped, Running)
                | (Provisioning, Deleted)
                | (Running, Deleted)
                | (Stopped, Deleted)
        )
    }

    /// Fail with `InvalidStateTransition` unless `next` is reachable.
    pub fn ensure_transition(self, next: HostingStatus) -> Result<()> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(Error::InvalidStateTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl std::fmt::Display for HostingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostingStatus::Provisioning => write!(f, "provisioning"),
            HostingStatus::Running => write!(f, "running"),
            HostingStatus::Stopped => write!(f, "stopped"),
            HostingStatus::Deleted => write!(f, "deleted"),
        }
    }
}

impl std::str::FromStr for HostingStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "provisioning" => Ok(HostingStatus::Provisioning),
            "running" => Ok(HostingStatus::Running),
            "stopped" => Ok(HostingStatus::Stopped),
            "deleted" => Ok(HostingStatus::Deleted),
            other => Err(Error::Internal(format!("unknown hosting status: {}", other))),
        }
    }
}

/// A persisted hosting record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hosting {
    pub id: i64,
    pub user_id: i64,
    pub vm_name: String,
    pub ip_address: Ipv4Addr,
    pub ssh_port: u16,
    pub proxy_path: String,
    /// Disk path or cloud instance id, depending on the provisioner backend.
    pub instance_ref: Option<String>,
    pub status: HostingStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Input for reserving a hosting row before its VM exists.
#[derive(Debug, Clone)]
pub struct NewHosting {
    pub user_id: i64,
    pub vm_name: String,
    pub proxy_path: String,
}

/// Live power state as reported by a provisioner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmPowerState {
    Running,
    Stopped,
    Unknown,
}

impl std::fmt::Display for VmPowerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VmPowerState::Running => write!(f, "running"),
            VmPowerState::Stopped => write!(f, "stopped"),
            VmPowerState::Unknown => write!(f, "unknown"),
        }
    }
}

/// Template input for one tenant's proxy fragments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentInfo {
    pub username: String,
    pub hostname: String,
    pub vm_address: Ipv4Addr,
    pub ssh_port: u16,
}

impl AgentInfo {
    /// Reject values that could smuggle directives into the nginx grammar.
    pub fn validate(&self) -> Result<()> {
        validate_identifier("username", &self.username)?;
        validate_identifier("hostname", &self.hostname)?;
        if self.ssh_port == 0 {
            return Err(Error::Validation("sshPort must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Check that `value` is safe to use in a file name and in proxy config text.
pub fn validate_identifier(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::Validation(format!("{} is required", field)));
    }
    if value.len() > MAX_IDENTIFIER_LEN {
        return Err(Error::Validation(format!(
            "{} exceeds {} bytes",
            field, MAX_IDENTIFIER_LEN
        )));
    }
    if value.starts_with('.') || value.starts_with('-') {
        return Err(Error::Validation(format!(
            "{} may not start with '.' or '-'",
            field
        )));
    }
    if let Some(c) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(Error::Validation(format!(
            "{} contains invalid character {:?}",
            field, c
        )));
    }
    Ok(())
}

/// Derive the owner key from an email: the local part, lower-cased, with
/// anything outside `[a-z0-9_-]` replaced by `-`.
pub fn owner_key_from_email(email: &str) -> Result<String> {
    let local = email.split('@').next().unwrap_or_default().trim();
    let key: String = local
        .chars()
        .map(|c| c.to_ascii_lowercase())
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let key = key.trim_start_matches('-').to_string();
    validate_identifier("owner key", &key)?;
    Ok(key)
}

/// VM name for an owner key.
pub fn vm_name_for(owner_key: &str) -> String {
    format!("{}-vm", owner_key)
}

/// HTTP location prefix under which a tenant's site is proxied.
pub fn proxy_path_for(owner_key: &str) -> String {
    format!("/code/{}/", owner_key)
}

/// User role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    User,
    Reader,
}

impl Default for Role {
    fn default() -> Self {
        Self::User
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Admin => write!(f, "admin"),
            Role::User => write!(f, "user"),
            Role::Reader => write!(f, "reader"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "admin" => Ok(Role::Admin),
            "user" => Ok(Role::User),
            "reader" => Ok(Role::Reader),
            other => Err(Error::Validation(format!("unknown role: {}", other))),
        }
    }
}

/// A registered account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub name: String,
    pub role: Role,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deleted_is_terminal() {
        for next in [
            HostingStatus::Provisioning,
            HostingStatus::Running,
            HostingStatus::Stopped,
            HostingStatus::Deleted,
        ] {
            assert!(!HostingStatus::Deleted.can_transition_to(next));
        }
        assert!(HostingStatus::Running.can_transition_to(HostingStatus::Stopped));
        assert!(HostingStatus::Stopped.can_transition_to(HostingStatus::Running));
        assert!(HostingStatus::Running
            .ensure_transition(HostingStatus::Provisioning)
            .is_err());
    }

    #[test]
    fn test_owner_key_from_email() {
        assert_eq!(owner_key_from_email("alice@example.com").unwrap(), "alice");
        assert_eq!(owner_key_from_email("Bob.Smith+web@x.io").unwrap(), "bob-smith-web");
        assert_eq!(owner_key_from_email("carol").unwrap(), "carol");
        assert!(owner_key_from_email("@example.com").is_err());
        assert_eq!(vm_name_for("alice"), "alice-vm");
        assert_eq!(proxy_path_for("alice"), "/code/alice/");
    }

    #[test]
    fn test_agent_info_rejects_directive_injection() {
        let mut agent = AgentInfo {
            username: "alice".to_string(),
            hostname: "alice-vm".to_string(),
            vm_address: Ipv4Addr::new(10, 0, 0, 5),
            ssh_port: 20000,
        };
        assert!(agent.validate().is_ok());

        agent.username = "alice; include /etc/passwd".to_string();
        assert!(matches!(agent.validate(), Err(Error::Validation(_))));

        agent.username = "../alice".to_string();
        assert!(agent.validate().is_err());

        agent.username = "alice".to_string();
        agent.ssh_port = 0;
        assert!(agent.validate().is_err());
    }

    #[test]
    fn test_agent_info_wire_names() {
        let json = r#"{"username":"alice","hostname":"alice-vm","vmAddress":"10.0.0.5","sshPort":22022}"#;
        let agent: AgentInfo = serde_json::from_str(json).unwrap();
        assert_eq!(agent.vm_address, Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(agent.ssh_port, 22022);
    }
}
