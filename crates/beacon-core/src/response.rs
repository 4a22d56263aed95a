//! A single datagram received during a discovery run.

use std::borrow::Cow;
use std::net::SocketAddr;

/// Raw response bytes together with the address they came from.
///
/// Responses are handed to protocol decoders unmodified; the engine never
/// interprets or de-duplicates them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DiscoveryResponse {
    /// Datagram contents (truncated to the request's `max_response_size`).
    pub data: Vec<u8>,
    /// Address and port of the sender.
    pub sender: SocketAddr,
}

impl DiscoveryResponse {
    /// Creates a response from a received datagram.
    pub fn new(data: impl Into<Vec<u8>>, sender: SocketAddr) -> Self {
        Self {
            data: data.into(),
            sender,
        }
    }

    /// Returns the payload as text, replacing invalid UTF-8 sequences.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_decodes_utf8_payload() {
        let resp = DiscoveryResponse::new(b"PONG".to_vec(), "10.0.0.9:1900".parse().unwrap());
        assert_eq!(resp.text(), "PONG");
    }

    #[test]
    fn test_text_replaces_invalid_utf8() {
        let resp = DiscoveryResponse::new(vec![0x50, 0xFF, 0x4B], "10.0.0.9:1900".parse().unwrap());
        assert_eq!(resp.text(), "P\u{FFFD}K");
    }
}
