//! Webhost Common Library
//!
//! Shared types, allocation, persistence and errors for the Webhost
//! control plane and its proxy sidecar.

pub mod alloc;
pub mod db;
pub mod error;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use alloc::{AllocationPolicy, PortRange, Subnet};
pub use db::Database;
pub use error::{Error, ErrorBody, ErrorKind, Result};
pub use store::HostingStore;
pub use types::*;

/// Webhost version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default state directory
pub fn default_store_path() -> std::path::PathBuf {
    std::path::PathBuf::from("/var/lib/webhost")
}

/// Default database path
pub fn default_db_path() -> std::path::PathBuf {
    default_store_path().join("webhost.db")
}
