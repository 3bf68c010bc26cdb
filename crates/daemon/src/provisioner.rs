//! VM provisioner abstraction
//!
//! Every operation is keyed by owner key, so one tenant can never address
//! another tenant's machine by passing a free-form name.

use async_trait::async_trait;
use std::net::Ipv4Addr;
use webhost_common::{Result, Subnet, VmPowerState};

/// Everything a backend needs to bring up a tenant VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionRequest {
    pub owner_key: String,
    pub vm_name: String,
    pub address: Ipv4Addr,
    pub subnet: Subnet,
    pub gateway: Ipv4Addr,
}

/// What a backend reports after a successful start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedVm {
    /// Disk path or cloud instance id
    pub instance_ref: String,
    /// Address the VM is reachable on from the proxy host
    pub address: Ipv4Addr,
}

#[async_trait]
pub trait VmProvisioner: Send + Sync {
    /// Create and boot a new VM.
    async fn start(&self, request: &ProvisionRequest) -> Result<ProvisionedVm>;

    /// Shut down a running VM, keeping its disk.
    async fn stop(&self, owner_key: &str) -> Result<()>;

    /// Boot a previously stopped VM.
    async fn start_existing(&self, owner_key: &str) -> Result<()>;

    /// Destroy the VM and its disk.
    async fn terminate(&self, owner_key: &str) -> Result<()>;

    async fn status(&self, owner_key: &str) -> Result<VmPowerState>;
}
