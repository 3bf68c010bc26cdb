//! cloud-init NoCloud seed generation

use crate::provisioner::ProvisionRequest;
use std::fmt::Write as _;

const CLOUD_CONFIG_HEADER: &str = "#cloud-config";

/// Seed documents for one tenant VM.
pub struct CloudInitSeed<'a> {
    pub request: &'a ProvisionRequest,
    pub default_user: &'a str,
    pub ssh_authorized_keys: &'a [String],
}

impl CloudInitSeed<'_> {
    pub fn user_data(&self) -> String {
        let mut keys = String::new();
        for key in self.ssh_authorized_keys {
            let _ = writeln!(keys, "      - {}", key.trim());
        }
        if keys.is_empty() {
            keys.push_str("      []\n");
        }

        format!(
            r"{header}
hostname: {hostname}
manage_etc_hosts: true

users:
  - name: {user}
    gecos: Webhost Tenant
    sudo: ['ALL=(ALL) NOPASSWD:ALL']
    groups: sudo
    shell: /bin/bash
    ssh_authorized_keys:
{keys}
ssh_pwauth: false
disable_root: true
timezone: UTC
",
            header = CLOUD_CONFIG_HEADER,
            hostname = self.request.vm_name,
            user = self.default_user,
            keys = keys.trim_end_matches('\n'),
        )
    }

    pub fn meta_data(&self) -> String {
        format!(
            "instance-id: {name}\nlocal-hostname: {name}\n",
            name = self.request.vm_name
        )
    }

    /// Netplan v2 document pinning the allocated address.
    pub fn network_config(&self) -> String {
        format!(
            r#"version: 2
ethernets:
  primary:
    match:
      name: "e*"
    dhcp4: false
    dhcp6: false
    addresses: ["{address}/{prefix}"]
    routes:
      - to: default
        via: {gateway}
    nameservers:
      addresses: [{gateway}]
"#,
            address = self.request.address,
            prefix = self.request.subnet.prefix(),
            gateway = self.request.gateway,
        )
    }
}
