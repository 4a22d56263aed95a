//! # beacon-core
//!
//! Shared library for Beacon containing the discovery request and response
//! values, the error taxonomy, and the protocol payload codecs that run on
//! top of the multicast discovery engine.
//!
//! This crate has zero dependencies on OS APIs or network sockets.  The engine
//! that actually binds sockets and sends datagrams lives in `beacon-discovery`.
//!
//! # Architecture overview (for beginners)
//!
//! Multicast discovery means "shout a question to everybody on the LAN and
//! listen for whoever answers".  Protocols such as SSDP (used by UPnP media
//! servers, TVs and routers) and WS-Discovery (used by ONVIF cameras and
//! network printers) all work this way.  They only differ in:
//!
//! - the bytes of the question (an HTTP-like text block or a SOAP document),
//! - the multicast group and UDP port the question is sent to,
//! - how the answers are parsed.
//!
//! This crate defines:
//!
//! - **`request`** / **`response`** – The raw values exchanged with the engine:
//!   payload + target + timeout going in, bytes + sender address coming out.
//!
//! - **`error`** – Every way a discovery run can fail, and which of those are
//!   recovered locally versus surfaced to the caller.
//!
//! - **`protocol`** – The encoder/decoder pairs for SSDP and WS-Discovery, plus
//!   a small de-duplication helper.

pub mod error;
pub mod protocol;
pub mod request;
pub mod response;

// Re-export the most-used types at the crate root so callers can write
// `beacon_core::DiscoveryRequest` instead of `beacon_core::request::DiscoveryRequest`.
pub use error::DiscoveryError;
pub use protocol::{DiscoveryProtocol, Distinct};
pub use request::{
    DiscoveryRequest, DEFAULT_RESPONSE_SIZE, DEFAULT_SSDP_MULTICAST_ADDR, DEFAULT_SSDP_PORT,
    DEFAULT_TIMEOUT_SECS, DEFAULT_WS_DISCOVERY_MULTICAST_ADDR, DEFAULT_WS_DISCOVERY_PORT,
};
pub use response::DiscoveryResponse;
