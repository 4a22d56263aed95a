//! Protocol codecs that run on top of the discovery engine.
//!
//! The engine only moves bytes.  A [`DiscoveryProtocol`] supplies the request
//! (payload, multicast group, port, timeout) and turns raw responses into
//! typed results.
//!
//! # Sub-modules
//!
//! - **`ssdp`** – `M-SEARCH` encoder and search-response decoder (UPnP).
//! - **`ws_discovery`** – SOAP `Probe` encoder and `ProbeMatches` decoder.
//! - **`distinct`** – "first occurrence only" filter used by decoders that
//!   want duplicate answers removed.

pub mod distinct;
pub mod ssdp;
pub mod ws_discovery;

pub use distinct::Distinct;
pub use ssdp::{SsdpResponse, SsdpSearch};
pub use ws_discovery::{ProbeMatch, WsProbe};

use crate::request::DiscoveryRequest;
use crate::response::DiscoveryResponse;

/// Encoder/decoder pair for one multicast discovery protocol.
pub trait DiscoveryProtocol {
    /// Typed result produced from one response datagram.
    type Item;

    /// Builds the request the engine should send.
    fn request(&self) -> DiscoveryRequest;

    /// Decodes one response; `None` means "not an answer for this protocol".
    fn decode(&self, response: &DiscoveryResponse) -> Option<Self::Item>;

    /// Decodes every result carried by one response, in order.
    ///
    /// Protocols whose answers can describe several targets override this;
    /// the default yields at most the single result of [`decode`](Self::decode).
    fn decode_all(&self, response: &DiscoveryResponse) -> Vec<Self::Item> {
        self.decode(response).into_iter().collect()
    }

    /// Whether duplicate results should be dropped before reaching the caller.
    ///
    /// Devices answer every retransmission and every interface they hear the
    /// request on, so the same answer usually arrives several times.
    fn deduplicate(&self) -> bool {
        false
    }
}
