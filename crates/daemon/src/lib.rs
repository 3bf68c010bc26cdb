//! Webhost daemon library
//!
//! Hosting lifecycle orchestration, VM provisioning, proxy control and the
//! user-facing HTTP API.

pub mod api;
pub mod auth;
pub mod cloud_init;
pub mod config;
pub mod libvirt;
pub mod orchestrator;
pub mod provisioner;
pub mod proxy_client;
pub mod users;

pub use api::{router, AppState};
pub use config::DaemonConfig;
pub use orchestrator::{HostingOrchestrator, Timeouts};
pub use provisioner::{ProvisionRequest, ProvisionedVm, VmProvisioner};
pub use proxy_client::{LocalProxy, ProxyControl, RemoteProxy};
