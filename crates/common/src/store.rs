//! Persistence seam for hosting records

use crate::alloc::{AllocationPolicy, PortRange};
use crate::types::{Hosting, HostingStatus, NewHosting};
use crate::Result;
use std::collections::HashSet;
use std::net::Ipv4Addr;

/// Storage for hosting records.
///
/// Only non-deleted rows count as "used" for allocation and ownership.
pub trait HostingStore: Send + Sync {
    /// Insert a fully-formed record. Returns the new row id.
    fn create(&self, record: &Hosting) -> Result<i64>;

    /// Allocate an address and port and insert a `provisioning` row, as one
    /// transaction. Fails with `Conflict` if the owner already has an active
    /// hosting and `ResourceExhausted` if nothing is free.
    fn reserve(&self, new: &NewHosting, policy: &AllocationPolicy) -> Result<Hosting>;

    /// Promote a reservation to `running` with the provisioner's results.
    fn complete(&self, id: i64, instance_ref: &str, address: Ipv4Addr) -> Result<Hosting>;

    /// Drop a reservation that never reached `running`.
    fn release(&self, id: i64) -> Result<()>;

    fn update_status(&self, vm_name: &str, status: HostingStatus) -> Result<()>;

    /// Active record by VM name.
    fn find_by_vm_name(&self, vm_name: &str) -> Result<Option<Hosting>>;

    fn find_active_by_owner(&self, user_id: i64) -> Result<Option<Hosting>>;

    /// All records for an owner, deleted ones included, newest first.
    fn list_by_owner(&self, user_id: i64) -> Result<Vec<Hosting>>;

    fn list_all(&self) -> Result<Vec<Hosting>>;

    fn list_used_addresses(&self) -> Result<HashSet<Ipv4Addr>>;

    fn list_used_ports(&self, range: &PortRange) -> Result<HashSet<u16>>;

    fn mark_deleted(&self, vm_name: &str) -> Result<()>;
}
