//! SearchUseCase: protocol-driven discovery.
//!
//! ```text
//! protocol.request() ──► DiscoverySession ──► DiscoveryStream
//!                                                   │ raw responses
//!                                                   ▼
//!                                       protocol.decode_all()  (drops non-answers)
//!                                                   │
//!                                         Distinct (if protocol.deduplicate())
//!                                                   ▼
//!                                             SearchStream::next()
//! ```
//!
//! Decoding happens on the consumer's task, so a slow decoder slows the
//! consumer but never the receiver threads.

use std::collections::VecDeque;
use std::hash::Hash;

use beacon_core::{DiscoveryError, DiscoveryProtocol, Distinct};
use tracing::trace;

use crate::infrastructure::network::interfaces::{InterfaceSource, SystemInterfaces};
use crate::infrastructure::network::session::{DiscoverySession, DiscoveryStream, SessionOptions};

/// Typed results of one protocol-driven discovery run.
pub struct SearchStream<P: DiscoveryProtocol> {
    protocol: P,
    stream: DiscoveryStream,
    distinct: Option<Distinct<P::Item>>,
    ready: VecDeque<P::Item>,
    discarded: usize,
}

impl<P> SearchStream<P>
where
    P: DiscoveryProtocol,
    P::Item: Clone + Eq + Hash,
{
    /// Waits for the next decoded result.
    ///
    /// Responses the protocol does not recognise and repeated answers (when
    /// the protocol de-duplicates) are skipped.  Ends like
    /// [`DiscoveryStream::recv`].
    pub async fn next(&mut self) -> Option<Result<P::Item, DiscoveryError>> {
        loop {
            while let Some(item) = self.ready.pop_front() {
                if let Some(distinct) = &mut self.distinct {
                    if !distinct.first_seen(&item) {
                        trace!("ignoring repeated result");
                        continue;
                    }
                }
                return Some(Ok(item));
            }

            let response = match self.stream.recv().await? {
                Ok(response) => response,
                Err(e) => return Some(Err(e)),
            };
            let items = self.protocol.decode_all(&response);
            if items.is_empty() {
                self.discarded += 1;
                trace!("ignoring unrecognised response from {}", response.sender);
            }
            self.ready.extend(items);
        }
    }

    /// Ends the run now.
    pub fn cancel(&mut self) {
        self.ready.clear();
        self.stream.cancel();
    }

    /// Drains the stream into a vector.
    ///
    /// # Errors
    ///
    /// Returns the fault that ended the run, if any.
    pub async fn collect(mut self) -> Result<Vec<P::Item>, DiscoveryError> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await {
            items.push(item?);
        }
        Ok(items)
    }

    /// Waits until the run has released all of its sockets.
    pub async fn closed(&mut self) {
        self.stream.closed().await;
    }

    /// Responses dropped so far because the protocol could not decode them.
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    /// The underlying raw stream.
    pub fn raw(&self) -> &DiscoveryStream {
        &self.stream
    }
}

/// Runs `protocol` on every usable local interface.
///
/// # Errors
///
/// See [`DiscoverySession::start`].
pub async fn search<P>(protocol: P, options: SessionOptions) -> Result<SearchStream<P>, DiscoveryError>
where
    P: DiscoveryProtocol,
    P::Item: Clone + Eq + Hash,
{
    search_with(protocol, SystemInterfaces, options).await
}

/// Runs `protocol` on the addresses reported by `interfaces`.
///
/// # Errors
///
/// See [`DiscoverySession::start`].
pub async fn search_with<P, S>(
    protocol: P,
    interfaces: S,
    options: SessionOptions,
) -> Result<SearchStream<P>, DiscoveryError>
where
    P: DiscoveryProtocol,
    P::Item: Clone + Eq + Hash,
    S: InterfaceSource,
{
    let stream = DiscoverySession::with_interfaces(protocol.request(), interfaces)
        .with_options(options)
        .start()
        .await?;
    let distinct = protocol.deduplicate().then(Distinct::new);
    Ok(SearchStream {
        protocol,
        stream,
        distinct,
        ready: VecDeque::new(),
        discarded: 0,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::network::interfaces::StaticInterfaces;
    use beacon_core::{DiscoveryRequest, DiscoveryResponse};
    use std::net::{Ipv4Addr, UdpSocket};
    use std::time::Duration;

    /// Answers are `HELLO <name>`; everything else is noise.
    struct Hello {
        dedup: bool,
    }

    impl DiscoveryProtocol for Hello {
        type Item = String;

        fn request(&self) -> DiscoveryRequest {
            DiscoveryRequest::new("WHO").with_timeout(Duration::from_secs(1))
        }

        fn decode(&self, response: &DiscoveryResponse) -> Option<String> {
            response.text().strip_prefix("HELLO ").map(str::to_string)
        }

        fn deduplicate(&self) -> bool {
            self.dedup
        }
    }

    /// Answers are comma-separated `HELLO <name>` lists.
    struct HelloList;

    impl DiscoveryProtocol for HelloList {
        type Item = String;

        fn request(&self) -> DiscoveryRequest {
            DiscoveryRequest::new("WHO").with_timeout(Duration::from_secs(1))
        }

        fn decode(&self, response: &DiscoveryResponse) -> Option<String> {
            self.decode_all(response).into_iter().next()
        }

        fn decode_all(&self, response: &DiscoveryResponse) -> Vec<String> {
            response
                .text()
                .split(',')
                .filter_map(|part| part.trim().strip_prefix("HELLO ").map(str::to_string))
                .collect()
        }

        fn deduplicate(&self) -> bool {
            true
        }
    }

    async fn run(dedup: bool, replies: &[&[u8]]) -> (Vec<String>, usize) {
        let mut stream = search_with(
            Hello { dedup },
            StaticInterfaces(vec![Ipv4Addr::LOCALHOST]),
            SessionOptions::default(),
        )
        .await
        .expect("start");
        let local = stream.raw().local_addrs()[0];
        let responder = UdpSocket::bind("127.0.0.1:0").unwrap();
        for reply in replies {
            responder.send_to(reply, local).unwrap();
        }

        let mut items = Vec::new();
        while let Some(item) = stream.next().await {
            items.push(item.expect("no fault"));
        }
        (items, stream.discarded())
    }

    #[tokio::test]
    async fn test_search_decodes_and_skips_noise() {
        // Arrange / Act
        let (items, discarded) = run(false, &[b"HELLO a", b"garbage", b"HELLO b"]).await;

        // Assert
        assert_eq!(items, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(discarded, 1);
    }

    #[tokio::test]
    async fn test_search_keeps_duplicates_when_protocol_does_not_deduplicate() {
        let (items, _) = run(false, &[b"HELLO a", b"HELLO a"]).await;
        assert_eq!(items.len(), 2);
    }

    #[tokio::test]
    async fn test_search_removes_duplicates_when_protocol_asks() {
        let (items, _) = run(true, &[b"HELLO a", b"HELLO b", b"HELLO a"]).await;
        assert_eq!(items, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_search_yields_every_result_of_a_multi_result_response() {
        // Arrange
        let mut stream = search_with(
            HelloList,
            StaticInterfaces(vec![Ipv4Addr::LOCALHOST]),
            SessionOptions::default(),
        )
        .await
        .expect("start");
        let local = stream.raw().local_addrs()[0];
        let responder = UdpSocket::bind("127.0.0.1:0").unwrap();

        // Act
        responder.send_to(b"HELLO a, HELLO b", local).unwrap();
        responder.send_to(b"HELLO b, HELLO c", local).unwrap();
        let items = stream.collect().await.expect("no fault");

        // Assert
        assert_eq!(items, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_search_without_interfaces_collects_nothing() {
        // Arrange
        let stream = search_with(
            Hello { dedup: false },
            StaticInterfaces::default(),
            SessionOptions::default(),
        )
        .await
        .expect("start");

        // Act
        let items = stream.collect().await.expect("no fault");

        // Assert
        assert!(items.is_empty());
    }
}
