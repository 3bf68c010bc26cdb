//! Address and port allocation
//!
//! Both allocators are pure functions of their inputs. The "used" sets come
//! from persistence at call time; nothing here caches or reserves.
//!
//! Address enumeration is a linear scan over the subnet, which is fine for
//! /24-class libvirt networks and not meant for large pools.

use crate::{Error, Result};
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::Ipv4Addr;

/// An IPv4 subnet whose network address has its host bits cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Subnet(Ipv4Network);

impl Subnet {
    pub fn new(addr: Ipv4Addr, prefix: u8) -> Result<Self> {
        let net = Ipv4Network::new(addr, prefix)
            .map_err(|e| Error::Validation(format!("invalid subnet {}/{}: {}", addr, prefix, e)))?;
        let cleared = Ipv4Network::new(net.network(), prefix)
            .map_err(|e| Error::Validation(e.to_string()))?;
        Ok(Self(cleared))
    }

    /// Build from an interface address and dotted netmask, as reported by a
    /// virtual network (e.g. `192.168.122.1` / `255.255.255.0`).
    pub fn from_address_and_netmask(addr: Ipv4Addr, netmask: Ipv4Addr) -> Result<Self> {
        let net = Ipv4Network::with_netmask(addr, netmask).map_err(|e| {
            Error::Validation(format!("invalid netmask {} for {}: {}", netmask, addr, e))
        })?;
        Self::new(net.network(), net.prefix())
    }

    pub fn network(&self) -> Ipv4Addr {
        self.0.network()
    }

    pub fn broadcast(&self) -> Ipv4Addr {
        self.0.broadcast()
    }

    pub fn prefix(&self) -> u8 {
        self.0.prefix()
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        self.0.contains(addr)
    }

    /// True if `addr` lies strictly between the network and broadcast addresses.
    pub fn is_host(&self, addr: Ipv4Addr) -> bool {
        let a = u32::from(addr);
        a > u32::from(self.network()) && a < u32::from(self.broadcast())
    }
}

impl std::fmt::Display for Subnet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.network(), self.prefix())
    }
}

impl std::str::FromStr for Subnet {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let net: Ipv4Network = s
            .trim()
            .parse()
            .map_err(|e| Error::Validation(format!("invalid CIDR {:?}: {}", s, e)))?;
        Self::new(net.ip(), net.prefix())
    }
}

impl TryFrom<String> for Subnet {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Subnet> for String {
    fn from(subnet: Subnet) -> Self {
        subnet.to_string()
    }
}

/// Ascending iterator over assignable host addresses of a subnet.
pub struct UsableAddresses<'a> {
    next: u64,
    end: u64,
    gateway: Ipv4Addr,
    used: &'a HashSet<Ipv4Addr>,
}

impl Iterator for UsableAddresses<'_> {
    type Item = Ipv4Addr;

    fn next(&mut self) -> Option<Ipv4Addr> {
        while self.next < self.end {
            let candidate = Ipv4Addr::from(self.next as u32);
            self.next += 1;
            if candidate == self.gateway || self.used.contains(&candidate) {
                continue;
            }
            return Some(candidate);
        }
        None
    }
}

/// Addresses from network+1 up to (excluding) broadcast, skipping the
/// gateway and every address in `used`.
pub fn usable_addresses<'a>(
    subnet: &Subnet,
    gateway: Ipv4Addr,
    used: &'a HashSet<Ipv4Addr>,
) -> Result<UsableAddresses<'a>> {
    if !subnet.contains(gateway) {
        return Err(Error::Validation(format!(
            "gateway {} is outside subnet {}",
            gateway, subnet
        )));
    }
    Ok(UsableAddresses {
        next: u64::from(u32::from(subnet.network())) + 1,
        end: u64::from(u32::from(subnet.broadcast())),
        gateway,
        used,
    })
}

/// Ordered list of usable addresses; empty when the subnet is exhausted.
pub fn list_usable_addresses(
    subnet: &Subnet,
    gateway: Ipv4Addr,
    used: &HashSet<Ipv4Addr>,
) -> Result<Vec<Ipv4Addr>> {
    Ok(usable_addresses(subnet, gateway, used)?.collect())
}

/// First usable address, or `ResourceExhausted`.
pub fn next_free_address(
    subnet: &Subnet,
    gateway: Ipv4Addr,
    used: &HashSet<Ipv4Addr>,
) -> Result<Ipv4Addr> {
    usable_addresses(subnet, gateway, used)?
        .next()
        .ok_or_else(|| Error::ResourceExhausted(format!("no free address in {}", subnet)))
}

/// Inclusive TCP port range handed out for SSH forwarding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub base: u16,
    pub max: u16,
}

impl PortRange {
    pub fn new(base: u16, max: u16) -> Result<Self> {
        let range = Self { base, max };
        range.validate()?;
        Ok(range)
    }

    pub fn validate(&self) -> Result<()> {
        if self.base == 0 || self.base > self.max {
            return Err(Error::Validation(format!(
                "invalid port range {}..={}",
                self.base, self.max
            )));
        }
        Ok(())
    }

    pub fn contains(&self, port: u16) -> bool {
        port >= self.base && port <= self.max
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            base: 20000,
            max: 30000,
        }
    }
}

/// Smallest port in `range` not present in `used`.
pub fn next_free_port(range: &PortRange, used: &HashSet<u16>) -> Result<u16> {
    (range.base..=range.max)
        .find(|port| !used.contains(port))
        .ok_or_else(|| {
            Error::ResourceExhausted(format!(
                "no available port in {}..={}",
                range.base, range.max
            ))
        })
}

/// Everything needed to pick an address and port for a new hosting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationPolicy {
    pub subnet: Subnet,
    pub gateway: Ipv4Addr,
    pub ports: PortRange,
}

impl AllocationPolicy {
    pub fn new(subnet: Subnet, gateway: Ipv4Addr, ports: PortRange) -> Result<Self> {
        if !subnet.contains(gateway) {
            return Err(Error::Validation(format!(
                "gateway {} is outside subnet {}",
                gateway, subnet
            )));
        }
        ports.validate()?;
        Ok(Self {
            subnet,
            gateway,
            ports,
        })
    }

    pub fn allocate(
        &self,
        used_addresses: &HashSet<Ipv4Addr>,
        used_ports: &HashSet<u16>,
    ) -> Result<(Ipv4Addr, u16)> {
        let address = next_free_address(&self.subnet, self.gateway, used_addresses)?;
        let port = next_free_port(&self.ports, used_ports)?;
        Ok((address, port))
    }
}
