//! Hosting lifecycle orchestration
//!
//! Create runs `reserve -> provision_vm -> write_proxy_config -> reload_proxy
//! -> persist`; delete runs `terminate_vm -> remove_proxy_config ->
//! reload_proxy -> mark_deleted`. The first failing step aborts the sequence.
//! Side effects of completed steps are not rolled back; they are reported in
//! `Error::StepFailed` instead.

use crate::provisioner::{ProvisionRequest, VmProvisioner};
use crate::proxy_client::ProxyControl;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use webhost_common::{
    owner_key_from_email, proxy_path_for, vm_name_for, AgentInfo, AllocationPolicy, Error,
    Hosting, HostingStatus, HostingStore, NewHosting, Result, User, VmPowerState,
};

pub const STEP_PROVISION: &str = "provision_vm";
pub const STEP_WRITE_PROXY: &str = "write_proxy_config";
pub const STEP_RELOAD_PROXY: &str = "reload_proxy";
pub const STEP_PERSIST: &str = "persist";
pub const STEP_TERMINATE: &str = "terminate_vm";
pub const STEP_REMOVE_PROXY: &str = "remove_proxy_config";
pub const STEP_MARK_DELETED: &str = "mark_deleted";

/// Limits applied to every external call.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub provisioner: Duration,
    pub proxy: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            provisioner: Duration::from_secs(300),
            proxy: Duration::from_secs(30),
        }
    }
}

/// Stored status together with what the provisioner reports.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub vm_name: String,
    pub status: HostingStatus,
    pub power_state: VmPowerState,
}

#[derive(Debug, Clone, Serialize)]
pub struct HostingDetail {
    pub hosting: Hosting,
    pub owner_email: String,
    pub power_state: VmPowerState,
}

/// Tracks progress through a multi-step operation.
struct Steps {
    operation: &'static str,
    completed: Vec<String>,
}

impl Steps {
    fn new(operation: &'static str) -> Self {
        Self {
            operation,
            completed: Vec::new(),
        }
    }

    fn done(&mut self, step: &str) {
        self.completed.push(step.to_string());
    }

    fn fail(&self, step: &str, source: Error) -> Error {
        error!(
            "{} failed at {} (completed: [{}]): {}",
            self.operation,
            step,
            self.completed.join(", "),
            source
        );
        Error::StepFailed {
            operation: self.operation.to_string(),
            failed: step.to_string(),
            completed: self.completed.clone(),
            source: Box::new(source),
        }
    }
}

async fn with_timeout<T, F>(operation: &str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| Error::timeout(operation, limit))?
}

/// Composes allocation, provisioning, proxy control and persistence.
pub struct HostingOrchestrator {
    store: Arc<dyn HostingStore>,
    provisioner: Arc<dyn VmProvisioner>,
    proxy: Arc<dyn ProxyControl>,
    policy: AllocationPolicy,
    timeouts: Timeouts,
}

impl HostingOrchestrator {
    pub fn new(
        store: Arc<dyn HostingStore>,
        provisioner: Arc<dyn VmProvisioner>,
        proxy: Arc<dyn ProxyControl>,
        policy: AllocationPolicy,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            store,
            provisioner,
            proxy,
            policy,
            timeouts,
        }
    }

    pub fn policy(&self) -> &AllocationPolicy {
        &self.policy
    }

    /// Bring up a hosting for `owner`.
    ///
    /// A failed `provision_vm` releases the reservation; a timed-out one
    /// releases it only after the VM is terminated. Failures after
    /// provisioning keep the row in `provisioning`, with its address and port
    /// claimed, so a later delete can clean up the VM.
    pub async fn create(&self, owner: &User) -> Result<Hosting> {
        let key = owner_key_from_email(&owner.email)?;
        let vm_name = vm_name_for(&key);
        let mut steps = Steps::new("create hosting");

        let reserved = self.store.reserve(
            &NewHosting {
                user_id: owner.id,
                vm_name: vm_name.clone(),
                proxy_path: proxy_path_for(&key),
            },
            &self.policy,
        )?;
        info!(
            "Reserved {} / ssh {} for {}",
            reserved.ip_address, reserved.ssh_port, vm_name
        );

        let request = ProvisionRequest {
            owner_key: key.clone(),
            vm_name: vm_name.clone(),
            address: reserved.ip_address,
            subnet: self.policy.subnet,
            gateway: self.policy.gateway,
        };
        let provisioned = match with_timeout(
            STEP_PROVISION,
            self.timeouts.provisioner,
            self.provisioner.start(&request),
        )
        .await
        {
            Ok(vm) => vm,
            Err(e) => {
                if matches!(e, Error::Timeout { .. }) {
                    self.abandon_start(&key, reserved.id).await;
                } else {
                    self.release(reserved.id);
                }
                return Err(steps.fail(STEP_PROVISION, e));
            }
        };
        steps.done(STEP_PROVISION);

        let agent = AgentInfo {
            username: key.clone(),
            hostname: vm_name.clone(),
            vm_address: provisioned.address,
            ssh_port: reserved.ssh_port,
        };
        with_timeout(
            STEP_WRITE_PROXY,
            self.timeouts.proxy,
            self.proxy.write_config(&agent),
        )
        .await
        .map_err(|e| steps.fail(STEP_WRITE_PROXY, e))?;
        steps.done(STEP_WRITE_PROXY);

        with_timeout(STEP_RELOAD_PROXY, self.timeouts.proxy, self.proxy.reload())
            .await
            .map_err(|e| steps.fail(STEP_RELOAD_PROXY, e))?;
        steps.done(STEP_RELOAD_PROXY);

        let hosting = self
            .store
            .complete(reserved.id, &provisioned.instance_ref, provisioned.address)
            .map_err(|e| steps.fail(STEP_PERSIST, e))?;

        info!(
            "Hosting {} running at {} (ssh port {})",
            hosting.vm_name, hosting.ip_address, hosting.ssh_port
        );
        Ok(hosting)
    }

    /// Tear down the owner's active hosting.
    pub async fn delete(&self, owner: &User) -> Result<Hosting> {
        let key = owner_key_from_email(&owner.email)?;
        let mut hosting = self.active_hosting(owner)?;
        let mut steps = Steps::new("delete hosting");

        with_timeout(
            STEP_TERMINATE,
            self.timeouts.provisioner,
            self.provisioner.terminate(&key),
        )
        .await
        .map_err(|e| steps.fail(STEP_TERMINATE, e))?;
        steps.done(STEP_TERMINATE);

        with_timeout(
            STEP_REMOVE_PROXY,
            self.timeouts.proxy,
            self.proxy.remove_config(&key),
        )
        .await
        .map_err(|e| steps.fail(STEP_REMOVE_PROXY, e))?;
        steps.done(STEP_REMOVE_PROXY);

        with_timeout(STEP_RELOAD_PROXY, self.timeouts.proxy, self.proxy.reload())
            .await
            .map_err(|e| steps.fail(STEP_RELOAD_PROXY, e))?;
        steps.done(STEP_RELOAD_PROXY);

        self.store
            .mark_deleted(&hosting.vm_name)
            .map_err(|e| steps.fail(STEP_MARK_DELETED, e))?;

        info!("Hosting {} deleted", hosting.vm_name);
        hosting.status = HostingStatus::Deleted;
        Ok(hosting)
    }

    pub async fn start(&self, owner: &User) -> Result<Hosting> {
        self.transition(owner, HostingStatus::Running).await
    }

    pub async fn stop(&self, owner: &User) -> Result<Hosting> {
        self.transition(owner, HostingStatus::Stopped).await
    }

    async fn transition(&self, owner: &User, target: HostingStatus) -> Result<Hosting> {
        let key = owner_key_from_email(&owner.email)?;
        let hosting = self.active_hosting(owner)?;
        hosting.status.ensure_transition(target)?;

        let call = match target {
            HostingStatus::Running => self.provisioner.start_existing(&key),
            _ => self.provisioner.stop(&key),
        };
        with_timeout(
            &format!("{} {}", target, hosting.vm_name),
            self.timeouts.provisioner,
            call,
        )
        .await?;

        self.store.update_status(&hosting.vm_name, target)?;
        info!("Hosting {} is {}", hosting.vm_name, target);
        self.store
            .find_by_vm_name(&hosting.vm_name)?
            .ok_or_else(|| Error::not_found("hosting", hosting.vm_name.clone()))
    }

    pub async fn status(&self, owner: &User) -> Result<StatusReport> {
        let key = owner_key_from_email(&owner.email)?;
        let hosting = self.active_hosting(owner)?;
        let power_state = with_timeout(
            "vm status",
            self.timeouts.provisioner,
            self.provisioner.status(&key),
        )
        .await?;

        if hosting.status == HostingStatus::Running && power_state == VmPowerState::Stopped {
            warn!("Hosting {} is recorded running but the VM is stopped", hosting.vm_name);
        }

        Ok(StatusReport {
            vm_name: hosting.vm_name,
            status: hosting.status,
            power_state,
        })
    }

    pub async fn detail(&self, owner: &User) -> Result<HostingDetail> {
        let report = self.status(owner).await?;
        let hosting = self
            .store
            .find_by_vm_name(&report.vm_name)?
            .ok_or_else(|| Error::not_found("hosting", report.vm_name.clone()))?;
        Ok(HostingDetail {
            hosting,
            owner_email: owner.email.clone(),
            power_state: report.power_state,
        })
    }

    /// Every hosting the owner ever had, newest first.
    pub fn history(&self, owner: &User) -> Result<Vec<Hosting>> {
        self.store.list_by_owner(owner.id)
    }

    /// A timed-out start may have left a VM running on the reserved address.
    /// The reservation is only released once that VM is terminated;
    /// otherwise it stays in `provisioning` for a later delete.
    async fn abandon_start(&self, key: &str, reservation: i64) {
        match with_timeout(
            STEP_TERMINATE,
            self.timeouts.provisioner,
            self.provisioner.terminate(key),
        )
        .await
        {
            Ok(()) => self.release(reservation),
            Err(e) => warn!(
                "Keeping reservation {} after failed cleanup of {}: {}",
                reservation, key, e
            ),
        }
    }

    fn release(&self, reservation: i64) {
        if let Err(e) = self.store.release(reservation) {
            warn!("Failed to release reservation {}: {}", reservation, e);
        }
    }

    /// Every hosting record across all owners.
    pub fn list_all(&self) -> Result<Vec<Hosting>> {
        self.store.list_all()
    }

    fn active_hosting(&self, owner: &User) -> Result<Hosting> {
        self.store
            .find_active_by_owner(owner.id)?
            .ok_or_else(|| Error::not_found("hosting", owner.email.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provisioner::ProvisionedVm;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use webhost_common::{Database, ErrorKind, PortRange, Role};

    #[derive(Default)]
    struct FakeProvisioner {
        calls: Mutex<Vec<String>>,
        fail_start: bool,
        fail_terminate: bool,
        slow_start: bool,
    }

    #[async_trait]
    impl VmProvisioner for FakeProvisioner {
        async fn start(&self, request: &ProvisionRequest) -> Result<ProvisionedVm> {
            self.calls.lock().push(format!("start {}", request.owner_key));
            if self.slow_start {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            if self.fail_start {
                return Err(Error::UpstreamProvision("virsh define failed".to_string()));
            }
            Ok(ProvisionedVm {
                instance_ref: format!("/images/{}/disk.qcow2", request.vm_name),
                address: request.address,
            })
        }

        async fn stop(&self, owner_key: &str) -> Result<()> {
            self.calls.lock().push(format!("stop {}", owner_key));
            Ok(())
        }

        async fn start_existing(&self, owner_key: &str) -> Result<()> {
            self.calls.lock().push(format!("start_existing {}", owner_key));
            Ok(())
        }

        async fn terminate(&self, owner_key: &str) -> Result<()> {
            self.calls.lock().push(format!("terminate {}", owner_key));
            if self.fail_terminate {
                return Err(Error::UpstreamProvision("virsh destroy failed".to_string()));
            }
            Ok(())
        }

        async fn status(&self, owner_key: &str) -> Result<VmPowerState> {
            self.calls.lock().push(format!("status {}", owner_key));
            Ok(VmPowerState::Running)
        }
    }

    #[derive(Default)]
    struct FakeProxy {
        calls: Mutex<Vec<String>>,
        fail_reload: bool,
    }

    #[async_trait]
    impl ProxyControl for FakeProxy {
        async fn write_config(&self, agent: &AgentInfo) -> Result<()> {
            self.calls.lock().push(format!(
                "write {} {} {}",
                agent.username, agent.vm_address, agent.ssh_port
            ));
            Ok(())
        }

        async fn remove_config(&self, username: &str) -> Result<()> {
            self.calls.lock().push(format!("remove {}", username));
            Ok(())
        }

        async fn reload(&self) -> Result<()> {
            self.calls.lock().push("reload".to_string());
            if self.fail_reload {
                return Err(Error::ProxyReload("nginx -s reload exited 1".to_string()));
            }
            Ok(())
        }
    }

    struct Harness {
        db: Arc<Database>,
        provisioner: Arc<FakeProvisioner>,
        proxy: Arc<FakeProxy>,
        orchestrator: HostingOrchestrator,
    }

    fn harness(provisioner: FakeProvisioner, proxy: FakeProxy) -> Harness {
        let db = Arc::new(Database::open_memory().unwrap());
        let provisioner = Arc::new(provisioner);
        let proxy = Arc::new(proxy);
        let policy = AllocationPolicy::new(
            "10.0.0.0/29".parse().unwrap(),
            "10.0.0.1".parse().unwrap(),
            PortRange::new(20000, 20003).unwrap(),
        )
        .unwrap();
        let orchestrator = HostingOrchestrator::new(
            db.clone(),
            provisioner.clone(),
            proxy.clone(),
            policy,
            Timeouts {
                provisioner: Duration::from_millis(200),
                proxy: Duration::from_millis(200),
            },
        );
        Harness {
            db,
            provisioner,
            proxy,
            orchestrator,
        }
    }

    fn user(db: &Database, email: &str) -> User {
        db.create_user(email, "hash", "Tenant", Role::User).unwrap()
    }

    #[tokio::test]
    async fn test_create_then_duplicate_conflicts() {
        let h = harness(FakeProvisioner::default(), FakeProxy::default());
        let alice = user(&h.db, "alice@example.com");

        let hosting = h.orchestrator.create(&alice).await.unwrap();
        assert_eq!(hosting.status, HostingStatus::Running);
        assert_eq!(hosting.vm_name, "alice-vm");
        assert_eq!(hosting.proxy_path, "/code/alice/");
        assert!(h.orchestrator.policy().subnet.is_host(hosting.ip_address));
        assert_ne!(hosting.ip_address, h.orchestrator.policy().gateway);
        assert!(h.orchestrator.policy().ports.contains(hosting.ssh_port));

        let proxy_calls = h.proxy.calls.lock().clone();
        assert_eq!(
            proxy_calls,
            vec![
                format!("write alice {} {}", hosting.ip_address, hosting.ssh_port),
                "reload".to_string()
            ]
        );

        let err = h.orchestrator.create(&alice).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(h.provisioner.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_tenants_get_distinct_resources() {
        let h = harness(FakeProvisioner::default(), FakeProxy::default());
        let mut addrs = HashSet::new();
        let mut ports = HashSet::new();
        for name in ["a", "b", "c"] {
            let owner = user(&h.db, &format!("{}@example.com", name));
            let hosting = h.orchestrator.create(&owner).await.unwrap();
            assert!(addrs.insert(hosting.ip_address));
            assert!(ports.insert(hosting.ssh_port));
        }
    }

    #[tokio::test]
    async fn test_exhausted_ports() {
        let h = harness(FakeProvisioner::default(), FakeProxy::default());
        for i in 0..4 {
            let owner = user(&h.db, &format!("t{}@example.com", i));
            h.orchestrator.create(&owner).await.unwrap();
        }
        let owner = user(&h.db, "late@example.com");
        let err = h.orchestrator.create(&owner).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
        assert_eq!(err.status_code(), 503);
    }

    #[tokio::test]
    async fn test_delete_missing_makes_no_external_calls() {
        let h = harness(FakeProvisioner::default(), FakeProxy::default());
        let alice = user(&h.db, "alice@example.com");

        let err = h.orchestrator.delete(&alice).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        assert!(h.provisioner.calls.lock().is_empty());
        assert!(h.proxy.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_delete_sequence_and_recreate() {
        let h = harness(FakeProvisioner::default(), FakeProxy::default());
        let alice = user(&h.db, "alice@example.com");
        let first = h.orchestrator.create(&alice).await.unwrap();

        let deleted = h.orchestrator.delete(&alice).await.unwrap();
        assert_eq!(deleted.status, HostingStatus::Deleted);
        assert_eq!(
            h.provisioner.calls.lock().last().map(String::as_str),
            Some("terminate alice")
        );
        let proxy_calls = h.proxy.calls.lock().clone();
        assert_eq!(&proxy_calls[2..], &["remove alice".to_string(), "reload".to_string()]);

        let second = h.orchestrator.create(&alice).await.unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(h.orchestrator.history(&alice).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_provision_failure_releases_reservation() {
        let h = harness(
            FakeProvisioner {
                fail_start: true,
                ..Default::default()
            },
            FakeProxy::default(),
        );
        let alice = user(&h.db, "alice@example.com");

        let err = h.orchestrator.create(&alice).await.unwrap_err();
        match &err {
            Error::StepFailed {
                failed, completed, ..
            } => {
                assert_eq!(failed, STEP_PROVISION);
                assert!(completed.is_empty());
            }
            other => panic!("expected StepFailed, got {:?}", other),
        }
        assert_eq!(err.status_code(), 502);
        assert!(h.proxy.calls.lock().is_empty());
        assert!(h.db.find_active_by_owner(alice.id).unwrap().is_none());
        assert!(h.db.list_used_addresses().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_provision_timeout_terminates_then_releases() {
        let h = harness(
            FakeProvisioner {
                slow_start: true,
                ..Default::default()
            },
            FakeProxy::default(),
        );
        let alice = user(&h.db, "alice@example.com");

        let err = h.orchestrator.create(&alice).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(err.status_code(), 504);
        assert!(err.to_string().contains("timed out after 200ms"));
        assert_eq!(
            *h.provisioner.calls.lock(),
            vec!["start alice".to_string(), "terminate alice".to_string()]
        );
        assert!(h.db.find_active_by_owner(alice.id).unwrap().is_none());
        assert!(h.db.list_used_addresses().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_provision_timeout_keeps_reservation_when_cleanup_fails() {
        let h = harness(
            FakeProvisioner {
                slow_start: true,
                fail_terminate: true,
                ..Default::default()
            },
            FakeProxy::default(),
        );
        let alice = user(&h.db, "alice@example.com");

        let err = h.orchestrator.create(&alice).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);

        // The VM may still be up, so its address must not be handed out again
        let pending = h.db.find_active_by_owner(alice.id).unwrap().unwrap();
        assert_eq!(pending.status, HostingStatus::Provisioning);
        let bob = user(&h.db, "bob@example.com");
        let bob_row = h
            .db
            .reserve(
                &NewHosting {
                    user_id: bob.id,
                    vm_name: "bob-vm".to_string(),
                    proxy_path: "/code/bob/".to_string(),
                },
                h.orchestrator.policy(),
            )
            .unwrap();
        assert_ne!(bob_row.ip_address, pending.ip_address);

        // A delete is still offered for the stuck tenant
        let err = h.orchestrator.delete(&alice).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpstreamProvision);
        assert_eq!(
            h.provisioner.calls.lock().last().map(String::as_str),
            Some("terminate alice")
        );
    }

    #[tokio::test]
    async fn test_reload_failure_reports_completed_steps() {
        let h = harness(
            FakeProvisioner::default(),
            FakeProxy {
                fail_reload: true,
                ..Default::default()
            },
        );
        let alice = user(&h.db, "alice@example.com");

        let err = h.orchestrator.create(&alice).await.unwrap_err();
        match &err {
            Error::StepFailed {
                failed, completed, ..
            } => {
                assert_eq!(failed, STEP_RELOAD_PROXY);
                assert_eq!(completed, &vec![STEP_PROVISION.to_string(), STEP_WRITE_PROXY.to_string()]);
            }
            other => panic!("expected StepFailed, got {:?}", other),
        }
        assert_eq!(err.kind(), ErrorKind::ProxyReload);

        // Still claimed so the VM's address is not handed out twice
        let pending = h.db.find_active_by_owner(alice.id).unwrap().unwrap();
        assert_eq!(pending.status, HostingStatus::Provisioning);
    }

    #[tokio::test]
    async fn test_delete_cleans_up_failed_create() {
        let h = harness(
            FakeProvisioner::default(),
            FakeProxy {
                fail_reload: true,
                ..Default::default()
            },
        );
        let alice = user(&h.db, "alice@example.com");
        h.orchestrator.create(&alice).await.unwrap_err();

        // Reload still fails, but terminate and remove have happened
        let err = h.orchestrator.delete(&alice).await.unwrap_err();
        match err {
            Error::StepFailed { failed, completed, .. } => {
                assert_eq!(failed, STEP_RELOAD_PROXY);
                assert_eq!(completed, vec![STEP_TERMINATE.to_string(), STEP_REMOVE_PROXY.to_string()]);
            }
            other => panic!("expected StepFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_terminate_failure_aborts_delete() {
        let h = harness(
            FakeProvisioner {
                fail_terminate: true,
                ..Default::default()
            },
            FakeProxy::default(),
        );
        let alice = user(&h.db, "alice@example.com");
        h.orchestrator.create(&alice).await.unwrap();

        let err = h.orchestrator.delete(&alice).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpstreamProvision);
        assert_eq!(h.proxy.calls.lock().len(), 2);
        assert!(h.db.find_active_by_owner(alice.id).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_stop_start_cycle() {
        let h = harness(FakeProvisioner::default(), FakeProxy::default());
        let alice = user(&h.db, "alice@example.com");
        h.orchestrator.create(&alice).await.unwrap();

        let err = h.orchestrator.start(&alice).await.unwrap_err();
        assert!(matches!(err, Error::InvalidStateTransition { .. }));

        let stopped = h.orchestrator.stop(&alice).await.unwrap();
        assert_eq!(stopped.status, HostingStatus::Stopped);
        let running = h.orchestrator.start(&alice).await.unwrap();
        assert_eq!(running.status, HostingStatus::Running);

        let calls = h.provisioner.calls.lock().clone();
        assert_eq!(&calls[1..], &["stop alice".to_string(), "start_existing alice".to_string()]);
        // No proxy traffic for power changes
        assert_eq!(h.proxy.calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_status_and_detail() {
        let h = harness(FakeProvisioner::default(), FakeProxy::default());
        let alice = user(&h.db, "alice@example.com");
        assert!(matches!(
            h.orchestrator.status(&alice).await,
            Err(Error::NotFound { .. })
        ));

        h.orchestrator.create(&alice).await.unwrap();
        let report = h.orchestrator.status(&alice).await.unwrap();
        assert_eq!(report.vm_name, "alice-vm");
        assert_eq!(report.power_state, VmPowerState::Running);

        let detail = h.orchestrator.detail(&alice).await.unwrap();
        assert_eq!(detail.owner_email, "alice@example.com");
        assert_eq!(detail.hosting.status, HostingStatus::Running);
        assert!(detail.hosting.instance_ref.is_some());
    }
}
