//! Error types for Webhost

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type alias using Webhost Error
pub type Result<T> = std::result::Result<T, Error>;

/// Webhost error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Provisioner error: {0}")]
    UpstreamProvision(String),

    #[error("Proxy configuration error: {0}")]
    ProxyConfig(String),

    #[error("Proxy reload error: {0}")]
    ProxyReload(String),

    #[error("Resource not found: {kind} with id {id}")]
    NotFound { kind: String, id: String },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    /// `limit` is `None` for a timeout relayed from a remote peer, in which
    /// case `operation` carries the peer's message.
    #[error("{}", describe_timeout(.operation, .limit))]
    Timeout {
        operation: String,
        limit: Option<Duration>,
    },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Permission denied: {0}")]
    Forbidden(String),

    #[error("{operation} failed at step '{failed}': {source}")]
    StepFailed {
        operation: String,
        failed: String,
        completed: Vec<String>,
        #[source]
        source: Box<Error>,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Stable classification of an [`Error`], used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Conflict,
    ResourceExhausted,
    UpstreamProvision,
    ProxyConfig,
    ProxyReload,
    NotFound,
    Timeout,
    Unauthorized,
    Forbidden,
    Internal,
}

impl ErrorKind {
    /// HTTP status code for this kind of failure.
    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::Validation => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::ProxyConfig | ErrorKind::ProxyReload | ErrorKind::Internal => 500,
            ErrorKind::UpstreamProvision => 502,
            ErrorKind::ResourceExhausted => 503,
            ErrorKind::Timeout => 504,
        }
    }

    /// Rebuild an error from a kind and message received from a remote peer.
    pub fn into_error(self, message: String) -> Error {
        match self {
            ErrorKind::Validation => Error::Validation(message),
            ErrorKind::Conflict => Error::Conflict(message),
            ErrorKind::ResourceExhausted => Error::ResourceExhausted(message),
            ErrorKind::UpstreamProvision => Error::UpstreamProvision(message),
            ErrorKind::ProxyConfig => Error::ProxyConfig(message),
            ErrorKind::ProxyReload => Error::ProxyReload(message),
            ErrorKind::NotFound => Error::NotFound {
                kind: "resource".to_string(),
                id: message,
            },
            ErrorKind::Timeout => Error::Timeout {
                operation: message,
                limit: None,
            },
            ErrorKind::Unauthorized => Error::Unauthorized(message),
            ErrorKind::Forbidden => Error::Forbidden(message),
            ErrorKind::Internal => Error::Internal(message),
        }
    }
}

fn describe_timeout(operation: &str, limit: &Option<Duration>) -> String {
    match limit {
        Some(limit) => format!("{} timed out after {:?}", operation, limit),
        None => operation.to_string(),
    }
}

impl Error {
    pub fn timeout(operation: impl Into<String>, limit: Duration) -> Self {
        Error::Timeout {
            operation: operation.into(),
            limit: Some(limit),
        }
    }

    pub fn not_found(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Error::NotFound {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// Classify this error. Step failures take the kind of their cause.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::Conflict(_) | Error::InvalidStateTransition { .. } => ErrorKind::Conflict,
            Error::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            Error::UpstreamProvision(_) => ErrorKind::UpstreamProvision,
            Error::ProxyConfig(_) => ErrorKind::ProxyConfig,
            Error::ProxyReload(_) => ErrorKind::ProxyReload,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::Unauthorized(_) => ErrorKind::Unauthorized,
            Error::Forbidden(_) => ErrorKind::Forbidden,
            Error::StepFailed { source, .. } => source.kind(),
            Error::Io(_) | Error::Database(_) | Error::Serialization(_) | Error::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    pub fn status_code(&self) -> u16 {
        self.kind().status_code()
    }

    /// JSON body rendered by the HTTP boundaries.
    pub fn to_body(&self) -> ErrorBody {
        let (failed_step, completed_steps) = match self {
            Error::StepFailed {
                failed, completed, ..
            } => (Some(failed.clone()), Some(completed.clone())),
            _ => (None, None),
        };
        ErrorBody {
            error: self.to_string(),
            kind: self.kind(),
            failed_step,
            completed_steps,
        }
    }
}

/// Wire shape of an error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: ErrorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_steps: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(Error::Validation("x".into()).status_code(), 400);
        assert_eq!(Error::Conflict("x".into()).status_code(), 409);
        assert_eq!(Error::ResourceExhausted("x".into()).status_code(), 503);
        assert_eq!(Error::UpstreamProvision("x".into()).status_code(), 502);
        assert_eq!(Error::ProxyConfig("x".into()).status_code(), 500);
        assert_eq!(Error::ProxyReload("x".into()).status_code(), 500);
        assert_eq!(Error::not_found("hosting", "a-vm").status_code(), 404);
    }

    #[test]
    fn test_timeout_message_keeps_sub_second_limit() {
        let err = Error::timeout("provision_vm", Duration::from_millis(300));
        assert_eq!(err.to_string(), "provision_vm timed out after 300ms");
        assert_eq!(err.status_code(), 504);

        let remote = ErrorKind::Timeout.into_error("nginx -s reload timed out after 30s".into());
        assert_eq!(remote.to_string(), "nginx -s reload timed out after 30s");
    }

    #[test]
    fn test_step_failure_takes_cause_kind() {
        let err = Error::StepFailed {
            operation: "create hosting".into(),
            failed: "reload_proxy".into(),
            completed: vec!["reserve".into(), "provision_vm".into()],
            source: Box::new(Error::ProxyReload("exit status 1".into())),
        };
        assert_eq!(err.kind(), ErrorKind::ProxyReload);

        let body = err.to_body();
        assert_eq!(body.failed_step.as_deref(), Some("reload_proxy"));
        assert_eq!(body.completed_steps.unwrap().len(), 2);
        assert!(body.error.contains("exit status 1"));
    }

    #[test]
    fn test_kind_round_trips_through_body() {
        let body = Error::Validation("bad username".into()).to_body();
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("\"kind\":\"validation\""));

        let parsed: ErrorBody = serde_json::from_str(&json).unwrap();
        let rebuilt = parsed.kind.into_error(parsed.error);
        assert_eq!(rebuilt.status_code(), 400);
    }
}
