//! libvirt-backed VM provisioner
//!
//! Drives `virsh`, `qemu-img` and a NoCloud seed tool as subprocesses. Each
//! tenant VM lives in `<images_dir>/<vm_name>/` with its qcow2 overlay, seed
//! ISO and domain XML.

use crate::cloud_init::CloudInitSeed;
use crate::config::ProvisionerConfig;
use crate::provisioner::{ProvisionRequest, ProvisionedVm, VmProvisioner};
use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info, warn};
use webhost_common::{validate_identifier, vm_name_for, Error, Result, Subnet, VmPowerState};

const DISK_FILE: &str = "disk.qcow2";
const SEED_FILE: &str = "seed.iso";
const DOMAIN_FILE: &str = "domain.xml";

/// Provisioner backed by a local libvirt daemon
pub struct LibvirtProvisioner {
    config: ProvisionerConfig,
}

impl LibvirtProvisioner {
    pub fn new(config: ProvisionerConfig) -> Self {
        Self { config }
    }

    fn instance_dir(&self, vm_name: &str) -> PathBuf {
        self.config.images_dir.join(vm_name)
    }

    fn vm_name(&self, owner_key: &str) -> Result<String> {
        validate_identifier("owner key", owner_key)?;
        Ok(vm_name_for(owner_key))
    }

    async fn virsh(&self, args: &[&str]) -> Result<String> {
        let mut argv = vec!["-c", self.config.uri.as_str()];
        argv.extend_from_slice(args);
        run(&self.config.virsh, &argv).await
    }

    async fn create_disk(&self, dir: &Path) -> Result<PathBuf> {
        let disk = dir.join(DISK_FILE);
        let template = self.config.template_image.to_string_lossy().to_string();
        let disk_str = disk.to_string_lossy().to_string();
        run(
            &self.config.qemu_img,
            &["create", "-f", "qcow2", "-F", "qcow2", "-b", &template, &disk_str],
        )
        .await?;
        debug!("Created overlay {:?} on {:?}", disk, self.config.template_image);
        Ok(disk)
    }

    async fn create_seed(&self, dir: &Path, request: &ProvisionRequest) -> Result<PathBuf> {
        let seed = CloudInitSeed {
            request,
            default_user: &self.config.default_user,
            ssh_authorized_keys: &self.config.ssh_authorized_keys,
        };

        let user_data = dir.join("user-data");
        let meta_data = dir.join("meta-data");
        let network_config = dir.join("network-config");
        fs::write(&user_data, seed.user_data()).await?;
        fs::write(&meta_data, seed.meta_data()).await?;
        fs::write(&network_config, seed.network_config()).await?;

        let iso = dir.join(SEED_FILE);
        let network_arg = format!("--network-config={}", network_config.display());
        let iso_str = iso.to_string_lossy().to_string();
        let user_str = user_data.to_string_lossy().to_string();
        let meta_str = meta_data.to_string_lossy().to_string();
        run(
            &self.config.seed_tool,
            &[&network_arg, &iso_str, &user_str, &meta_str],
        )
        .await?;
        debug!("Created seed image {:?}", iso);
        Ok(iso)
    }

    async fn provision(&self, dir: &Path, request: &ProvisionRequest) -> Result<PathBuf> {
        fs::create_dir_all(dir).await?;
        let disk = self.create_disk(dir).await?;
        let seed = self.create_seed(dir, request).await?;

        let xml = domain_xml(&self.config, request, &disk, &seed);
        let xml_path = dir.join(DOMAIN_FILE);
        fs::write(&xml_path, xml).await?;

        let xml_str = xml_path.to_string_lossy().to_string();
        self.virsh(&["define", &xml_str]).await?;
        self.virsh(&["start", &request.vm_name]).await?;
        Ok(disk)
    }

    /// Destroy and undefine the domain, then delete its directory. A domain
    /// that is not running or no longer defined is not an error.
    async fn remove_instance(&self, vm_name: &str) -> Result<()> {
        match self.virsh(&["destroy", vm_name]).await {
            Ok(_) => debug!("Destroyed {}", vm_name),
            Err(Error::UpstreamProvision(msg)) if msg.contains("not running") => {
                debug!("{} was not running", vm_name);
            }
            Err(Error::UpstreamProvision(msg)) if is_missing_domain(&msg) => {
                debug!("{} is not defined", vm_name);
            }
            Err(e) => return Err(e),
        }

        match self.virsh(&["undefine", vm_name]).await {
            Ok(_) => {}
            Err(Error::UpstreamProvision(msg)) if is_missing_domain(&msg) => {
                warn!("Domain {} already undefined", vm_name);
            }
            Err(e) => return Err(e),
        }

        let dir = self.instance_dir(vm_name);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::UpstreamProvision(format!(
                "failed to remove {}: {}",
                dir.display(),
                e
            ))),
        }
    }

    /// Best-effort removal of whatever a failed `start` left behind.
    async fn cleanup(&self, vm_name: &str, dir: &Path) {
        if let Err(e) = self.virsh(&["undefine", vm_name]).await {
            debug!("Cleanup undefine {}: {}", vm_name, e);
        }
        if let Err(e) = fs::remove_dir_all(dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove {:?}: {}", dir, e);
            }
        }
    }
}

#[async_trait]
impl VmProvisioner for LibvirtProvisioner {
    async fn start(&self, request: &ProvisionRequest) -> Result<ProvisionedVm> {
        let vm_name = self.vm_name(&request.owner_key)?;
        if vm_name != request.vm_name {
            return Err(Error::Validation(format!(
                "VM name {} does not belong to owner {}",
                request.vm_name, request.owner_key
            )));
        }

        // The caller holds the owner's only reservation, so anything already
        // under this name is left over from an abandoned attempt.
        let dir = self.instance_dir(&vm_name);
        if fs::try_exists(&dir).await? {
            warn!("Reclaiming leftovers of {} at {:?}", vm_name, dir);
            self.remove_instance(&vm_name).await?;
        }

        info!("Provisioning {} at {}", vm_name, request.address);
        match self.provision(&dir, request).await {
            Ok(disk) => {
                info!("VM {} started", vm_name);
                Ok(ProvisionedVm {
                    instance_ref: disk.to_string_lossy().to_string(),
                    address: request.address,
                })
            }
            Err(e) => {
                self.cleanup(&vm_name, &dir).await;
                Err(e)
            }
        }
    }

    async fn stop(&self, owner_key: &str) -> Result<()> {
        let vm_name = self.vm_name(owner_key)?;
        self.virsh(&["shutdown", &vm_name]).await?;
        info!("VM {} shutting down", vm_name);
        Ok(())
    }

    async fn start_existing(&self, owner_key: &str) -> Result<()> {
        let vm_name = self.vm_name(owner_key)?;
        self.virsh(&["start", &vm_name]).await?;
        info!("VM {} started", vm_name);
        Ok(())
    }

    async fn terminate(&self, owner_key: &str) -> Result<()> {
        let vm_name = self.vm_name(owner_key)?;
        self.remove_instance(&vm_name).await?;
        info!("VM {} terminated", vm_name);
        Ok(())
    }

    async fn status(&self, owner_key: &str) -> Result<VmPowerState> {
        let vm_name = self.vm_name(owner_key)?;
        match self.virsh(&["domstate", &vm_name]).await {
            Ok(out) => Ok(parse_domstate(&out)),
            Err(Error::UpstreamProvision(msg)) if is_missing_domain(&msg) => {
                warn!("Domain {} not found", vm_name);
                Ok(VmPowerState::Unknown)
            }
            Err(e) => Err(e),
        }
    }
}

/// Read the subnet and gateway of a libvirt network.
pub async fn discover_network(uri: &str, network: &str) -> Result<(Subnet, Ipv4Addr)> {
    let xml = run("virsh", &["-c", uri, "net-dumpxml", network]).await?;
    let (subnet, gateway) = parse_network_xml(&xml)?;
    info!("Network {}: subnet {}, gateway {}", network, subnet, gateway);
    Ok((subnet, gateway))
}

/// Extract `<ip address=.. netmask=..>` from network XML. The address is the
/// host's address on the network and serves as the gateway.
pub fn parse_network_xml(xml: &str) -> Result<(Subnet, Ipv4Addr)> {
    let tag_re = regex_lite::Regex::new(r"<ip\s[^>]*>")
        .map_err(|e| Error::Internal(e.to_string()))?;
    let attr_re = regex_lite::Regex::new(r#"(\w+)\s*=\s*['"]([^'"]*)['"]"#)
        .map_err(|e| Error::Internal(e.to_string()))?;

    for tag in tag_re.find_iter(xml) {
        let mut address = None;
        let mut netmask = None;
        let mut prefix = None;
        let mut family = None;
        for caps in attr_re.captures_iter(tag.as_str()) {
            let value = caps.get(2).map(|m| m.as_str());
            match caps.get(1).map(|m| m.as_str()) {
                Some("address") => address = value,
                Some("netmask") => netmask = value,
                Some("prefix") => prefix = value,
                Some("family") => family = value,
                _ => {}
            }
        }
        if family.is_some_and(|f| f != "ipv4") {
            continue;
        }
        let Some(address) = address else { continue };
        let gateway: Ipv4Addr = match address.parse() {
            Ok(a) => a,
            Err(_) => continue,
        };

        let subnet = match (netmask, prefix) {
            (Some(mask), _) => {
                let mask: Ipv4Addr = mask
                    .parse()
                    .map_err(|_| Error::Validation(format!("invalid netmask {:?}", mask)))?;
                Subnet::from_address_and_netmask(gateway, mask)?
            }
            (None, Some(prefix)) => {
                let prefix: u8 = prefix
                    .parse()
                    .map_err(|_| Error::Validation(format!("invalid prefix {:?}", prefix)))?;
                Subnet::new(gateway, prefix)?
            }
            (None, None) => continue,
        };
        return Ok((subnet, gateway));
    }

    Err(Error::UpstreamProvision(
        "network XML has no IPv4 <ip> element".to_string(),
    ))
}

/// Map `virsh domstate` output to a power state.
pub fn parse_domstate(output: &str) -> VmPowerState {
    match output.trim() {
        "running" | "idle" | "in shutdown" => VmPowerState::Running,
        "shut off" | "crashed" | "pmsuspended" => VmPowerState::Stopped,
        _ => VmPowerState::Unknown,
    }
}

fn is_missing_domain(msg: &str) -> bool {
    msg.contains("failed to get domain") || msg.contains("Domain not found")
}

/// Libvirt domain definition for a tenant VM.
pub fn domain_xml(
    config: &ProvisionerConfig,
    request: &ProvisionRequest,
    disk: &Path,
    seed: &Path,
) -> String {
    format!(
        r#"<domain type='kvm'>
  <name>{name}</name>
  <metadata>
    <webhost:owner xmlns:webhost="https://webhost.dev/xmlns/owner/1.0">{owner}</webhost:owner>
  </metadata>
  <memory unit='MiB'>{memory}</memory>
  <vcpu>{vcpus}</vcpu>
  <os>
    <type arch='x86_64'>hvm</type>
    <boot dev='hd'/>
  </os>
  <features>
    <acpi/>
    <apic/>
  </features>
  <devices>
    <disk type='file' device='disk'>
      <driver name='qemu' type='qcow2'/>
      <source file='{disk}'/>
      <target dev='vda' bus='virtio'/>
    </disk>
    <disk type='file' device='cdrom'>
      <driver name='qemu' type='raw'/>
      <source file='{seed}'/>
      <target dev='sda' bus='sata'/>
      <readonly/>
    </disk>
    <interface type='network'>
      <source network='{network}'/>
      <model type='virtio'/>
    </interface>
    <console type='pty'/>
    <graphics type='vnc' autoport='yes' listen='127.0.0.1'/>
  </devices>
</domain>
"#,
        name = xml_escape(&request.vm_name),
        owner = xml_escape(&request.owner_key),
        memory = config.memory_mb,
        vcpus = config.vcpus,
        disk = xml_escape(&disk.to_string_lossy()),
        seed = xml_escape(&seed.to_string_lossy()),
        network = xml_escape(&config.network),
    )
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('\'', "&apos;")
        .replace('"', "&quot;")
}

/// Run a tool to completion, returning stdout. Non-zero exit is an
/// `UpstreamProvision` error carrying stderr.
async fn run(program: &str, args: &[&str]) -> Result<String> {
    debug!("Running: {} {}", program, args.join(" "));
    let output = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| Error::UpstreamProvision(format!("failed to run {}: {}", program, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::UpstreamProvision(format!(
            "{} {} failed: {}",
            program,
            args.join(" "),
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}
