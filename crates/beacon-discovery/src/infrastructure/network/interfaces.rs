//! Local interface enumeration.
//!
//! Discovery is sent from every LAN-facing interface of the host.  An address
//! qualifies when it is IPv4, not on a loopback interface, and private
//! (`10.0.0.0/8`, `172.16.0.0/12`, `192.168.0.0/16`).  Link-local
//! (`169.254.x.x`), public and virtual-bridge addresses outside those ranges
//! are skipped since they produce spurious or no answers.
//!
//! The OS only reports addresses for interfaces that are configured, which is
//! what "up" means here.

use std::net::{IpAddr, Ipv4Addr};

use tracing::{debug, warn};

/// Source of candidate local addresses for a discovery run.
///
/// The production implementation queries the OS; tests and embedders use
/// [`StaticInterfaces`] to pin the run to known addresses (including loopback,
/// which the OS source always excludes).
pub trait InterfaceSource: Send + Sync {
    /// Returns the addresses to bind, possibly empty.
    fn local_addresses(&self) -> Vec<Ipv4Addr>;
}

/// Enumerates the host's interfaces through `if-addrs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemInterfaces;

impl InterfaceSource for SystemInterfaces {
    fn local_addresses(&self) -> Vec<Ipv4Addr> {
        list_local_addresses()
    }
}

/// A fixed address list.
#[derive(Debug, Clone, Default)]
pub struct StaticInterfaces(pub Vec<Ipv4Addr>);

impl InterfaceSource for StaticInterfaces {
    fn local_addresses(&self) -> Vec<Ipv4Addr> {
        self.0.clone()
    }
}

/// Returns the private IPv4 addresses of all non-loopback interfaces.
///
/// An enumeration failure is logged and treated as "no interfaces": the run
/// then completes immediately with no responses.
pub fn list_local_addresses() -> Vec<Ipv4Addr> {
    let interfaces = match if_addrs::get_if_addrs() {
        Ok(list) => list,
        Err(e) => {
            warn!("failed to enumerate network interfaces: {e}");
            return Vec::new();
        }
    };

    let mut addrs = Vec::new();
    for iface in interfaces {
        let IpAddr::V4(ipv4) = iface.ip() else {
            continue;
        };
        if !is_usable(ipv4, iface.is_loopback()) {
            debug!("skipping interface {} ({ipv4})", iface.name);
            continue;
        }
        if !addrs.contains(&ipv4) {
            addrs.push(ipv4);
        }
    }

    debug!("usable discovery addresses: {addrs:?}");
    addrs
}

/// Filter applied to every interface address.
fn is_usable(addr: Ipv4Addr, on_loopback_interface: bool) -> bool {
    !on_loopback_interface && !addr.is_loopback() && addr.is_private()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
