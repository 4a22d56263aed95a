//! SSDP (Simple Service Discovery Protocol) search codec.
//!
//! A control point multicasts an `M-SEARCH` request to `239.255.255.250:1900`
//! and every matching UPnP device answers with a unicast HTTP-over-UDP
//! response:
//!
//! ```text
//! HTTP/1.1 200 OK
//! CACHE-CONTROL: max-age=1800
//! LOCATION: http://192.168.1.20:49152/description.xml
//! SERVER: Linux/5.10 UPnP/1.0 MiniDLNA/1.3.0
//! ST: urn:schemas-upnp-org:device:MediaServer:1
//! USN: uuid:4d696e69-444c-164e-9d41-b827eb54e5a3::urn:schemas-upnp-org:device:MediaServer:1
//! ```
//!
//! `LOCATION` points to the device description document; fetching it is left
//! to the caller.  `NOTIFY` announcements and other control points' `M-SEARCH`
//! requests that happen to reach the socket are ignored.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use tracing::trace;

use super::DiscoveryProtocol;
use crate::request::{DiscoveryRequest, DEFAULT_SSDP_MULTICAST_ADDR, DEFAULT_SSDP_PORT};
use crate::response::DiscoveryResponse;

/// Search target matching every device and service.
pub const SEARCH_ALL: &str = "ssdp:all";
/// Search target matching root devices only.
pub const SEARCH_ROOT_DEVICES: &str = "upnp:rootdevice";

/// An `M-SEARCH` request for one search target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsdpSearch {
    /// `ST` header, e.g. `"ssdp:all"` or a device/service URN.
    pub search_target: String,
    /// `MX` header: maximum seconds a device may wait before answering.
    pub mx: u32,
    /// `USER-AGENT` header.
    pub user_agent: String,
}

impl SsdpSearch {
    /// Creates a search for `search_target` with a 3-second `MX`.
    pub fn new(search_target: impl Into<String>) -> Self {
        Self {
            search_target: search_target.into(),
            mx: 3,
            user_agent: format!("Beacon/{} UPnP/1.1", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Sets the `MX` value (clamped to at least 1, as UPnP requires).
    pub fn with_mx(mut self, mx: u32) -> Self {
        self.mx = mx.max(1);
        self
    }

    /// Renders the `M-SEARCH` text block.
    pub fn message(&self) -> String {
        format!(
            "M-SEARCH * HTTP/1.1\r\n\
             HOST: {}:{}\r\n\
             MAN: \"ssdp:discover\"\r\n\
             MX: {}\r\n\
             ST: {}\r\n\
             USER-AGENT: {}\r\n\
             \r\n",
            DEFAULT_SSDP_MULTICAST_ADDR,
            DEFAULT_SSDP_PORT,
            self.mx.max(1),
            self.search_target,
            self.user_agent
        )
    }
}

impl Default for SsdpSearch {
    fn default() -> Self {
        Self::new(SEARCH_ALL)
    }
}

impl DiscoveryProtocol for SsdpSearch {
    type Item = SsdpResponse;

    /// The listening window equals `MX`, since devices spread their answers
    /// over that many seconds.
    fn request(&self) -> DiscoveryRequest {
        DiscoveryRequest::new(self.message())
            .with_target(DEFAULT_SSDP_MULTICAST_ADDR, DEFAULT_SSDP_PORT)
            .with_timeout(Duration::from_secs(u64::from(self.mx.max(1))))
    }

    fn decode(&self, response: &DiscoveryResponse) -> Option<SsdpResponse> {
        SsdpResponse::parse(&response.text(), response.sender)
    }
}

/// A parsed `HTTP/1.1 200 OK` answer to an `M-SEARCH`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SsdpResponse {
    /// URL of the device description document.
    pub location: String,
    /// Search target the device matched.
    pub st: String,
    /// Unique service name.
    pub usn: String,
    /// `SERVER` header, if present.
    pub server: Option<String>,
    /// `max-age` from `CACHE-CONTROL`, if present and numeric.
    pub max_age: Option<u32>,
    /// Every header, keyed by upper-cased name.
    pub headers: BTreeMap<String, String>,
    /// Where the datagram came from.
    pub from: SocketAddr,
}

impl SsdpResponse {
    /// Parses a search response.
    ///
    /// Returns `None` for anything that is not a `200` response carrying the
    /// mandatory `LOCATION`, `ST` and `USN` headers.
    pub fn parse(data: &str, from: SocketAddr) -> Option<Self> {
        let mut lines = data.lines();
        let status = lines.next()?.trim();
        let upper = status.to_ascii_uppercase();
        if !(upper.starts_with("HTTP/") && upper.split_whitespace().nth(1) == Some("200")) {
            trace!("ignoring non-response SSDP datagram from {from}: {status}");
            return None;
        }

        let headers = parse_headers(lines);
        let Some(location) = headers.get("LOCATION").cloned() else {
            trace!("SSDP response from {from} missing LOCATION header, ignoring");
            return None;
        };
        let Some(st) = headers.get("ST").cloned() else {
            trace!("SSDP response from {from} missing ST header, ignoring");
            return None;
        };
        let Some(usn) = headers.get("USN").cloned() else {
            trace!("SSDP response from {from} missing USN header, ignoring");
            return None;
        };

        Some(Self {
            location,
            st,
            usn,
            server: headers.get("SERVER").cloned(),
            max_age: headers.get("CACHE-CONTROL").and_then(|v| parse_max_age(v)),
            headers,
            from,
        })
    }

    /// Returns a header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_uppercase())
            .map(String::as_str)
    }
}

/// Collects `NAME: value` lines until the blank line ending the header block.
fn parse_headers<'a, I>(lines: I) -> BTreeMap<String, String>
where
    I: Iterator<Item = &'a str>,
{
    let mut headers = BTreeMap::new();
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            break;
        }

        // Split on the first ':' only; values such as URLs contain more.
        let Some((name, value)) = line.split_once(':') else {
            trace!("skipping SSDP line without colon: '{line}'");
            continue;
        };
        let name = name.trim().to_ascii_uppercase();
        if name.is_empty() {
            continue;
        }
        // Empty values are legal (e.g. `EXT:`).
        headers.insert(name, value.trim().to_string());
    }
    headers
}

/// Extracts `max-age=<n>` from a `CACHE-CONTROL` value.
fn parse_max_age(value: &str) -> Option<u32> {
    let lower = value.to_ascii_lowercase();
    let idx = lower.find("max-age")?;
    let after = lower[idx + "max-age".len()..]
        .trim_start()
        .strip_prefix('=')?
        .trim_start();
    let digits: String = after.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
