//! The discovery request handed to the engine.
//!
//! A request is an immutable value: the already-encoded protocol payload, the
//! multicast group and port to send it to, how long to listen for answers, and
//! how large a single answer may be.
//!
//! # What is a multicast address? (for beginners)
//!
//! IPv4 reserves `224.0.0.0/4` (224.x.x.x – 239.x.x.x) for *multicast groups*.
//! A datagram sent to a group address is delivered to every host on the LAN
//! that has joined the group, instead of to one host.  SSDP and WS-Discovery
//! both use the group `239.255.255.250`; SSDP listens on port 1900 and
//! WS-Discovery on port 3702.  Devices answer with a normal *unicast* datagram
//! back to the sender's address and port.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::{Duration, Instant};

use crate::error::DiscoveryError;

/// Multicast group used by SSDP (UPnP).
pub const DEFAULT_SSDP_MULTICAST_ADDR: &str = "239.255.255.250";
/// UDP port SSDP devices listen on.
pub const DEFAULT_SSDP_PORT: u16 = 1900;
/// Multicast group used by WS-Discovery.
pub const DEFAULT_WS_DISCOVERY_MULTICAST_ADDR: &str = "239.255.255.250";
/// UDP port WS-Discovery targets listen on.
pub const DEFAULT_WS_DISCOVERY_PORT: u16 = 3702;
/// Default listening window.
pub const DEFAULT_TIMEOUT_SECS: u64 = 3;
/// Default receive buffer size for one datagram.
pub const DEFAULT_RESPONSE_SIZE: usize = 1024;

/// A multicast search request.
///
/// Most devices wait a random time between zero and `timeout` before answering,
/// so the timeout is also the listening window of the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryRequest {
    /// Protocol payload sent verbatim in every datagram.
    pub payload: Vec<u8>,
    /// Multicast group, e.g. `"239.255.255.250"`.
    pub multicast_address: String,
    /// Destination UDP port.
    pub port: u16,
    /// Total listening window, counted from the first transmission.
    pub timeout: Duration,
    /// Largest datagram the receivers will read; longer datagrams are truncated.
    pub max_response_size: usize,
}

impl DiscoveryRequest {
    /// Creates a request for `payload` with the SSDP defaults.
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            multicast_address: DEFAULT_SSDP_MULTICAST_ADDR.to_string(),
            port: DEFAULT_SSDP_PORT,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_response_size: DEFAULT_RESPONSE_SIZE,
        }
    }

    /// Sets the multicast group and port.
    pub fn with_target(mut self, multicast_address: impl Into<String>, port: u16) -> Self {
        self.multicast_address = multicast_address.into();
        self.port = port;
        self
    }

    /// Sets the listening window.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the receive buffer size.
    pub fn with_response_size(mut self, max_response_size: usize) -> Self {
        self.max_response_size = max_response_size;
        self
    }

    /// Checks the request and returns the destination socket address.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::InvalidMulticastAddress`] if the address does
    /// not parse as an IPv4 multicast address, and
    /// [`DiscoveryError::InvalidTimeout`] if the timeout is zero or so large
    /// that the deadline `now + timeout` overflows the clock.
    pub fn validate(&self) -> Result<SocketAddrV4, DiscoveryError> {
        let group: Ipv4Addr = self
            .multicast_address
            .trim()
            .parse()
            .map_err(|_| DiscoveryError::InvalidMulticastAddress(self.multicast_address.clone()))?;
        if !group.is_multicast() {
            return Err(DiscoveryError::InvalidMulticastAddress(
                self.multicast_address.clone(),
            ));
        }
        if self.timeout.is_zero() || Instant::now().checked_add(self.timeout).is_none() {
            return Err(DiscoveryError::InvalidTimeout);
        }
        Ok(SocketAddrV4::new(group, self.port))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
