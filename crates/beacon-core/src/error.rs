//! Error taxonomy for multicast discovery.
//!
//! Not every variant reaches the caller.  The engine recovers from some of
//! them locally and only logs them:
//!
//! | Variant                   | Handling                                                    |
//! |---------------------------|-------------------------------------------------------------|
//! | `InvalidMulticastAddress` | Fatal, returned before any socket is created.               |
//! | `InvalidTimeout`          | Fatal, returned before any socket is created.               |
//! | `NoUsableInterface`       | Logged; the run completes immediately with zero responses.  |
//! | `SocketBind`              | Logged; that address is excluded from the run.              |
//! | `Transmission`            | Terminal error on the response stream.                      |
//! | `Receive`                 | Terminal error on the response stream.                      |
//! | `Overflow`                | Terminal error on the response stream.                      |
//! | `Runtime`                 | Terminal error (thread spawn or task join failure).         |
//!
//! A timeout or a cancellation is never an error: the stream simply ends.

use std::net::SocketAddr;

use thiserror::Error;

/// Error type for discovery operations.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The request target is not an IPv4 multicast address.
    #[error("not a multicast address: {0}")]
    InvalidMulticastAddress(String),

    /// The request timeout is zero, or too large to schedule from now.
    #[error("discovery timeout must be greater than zero and representable as a deadline")]
    InvalidTimeout,

    /// No local interface could be bound for discovery.
    #[error("no usable network interface for multicast discovery")]
    NoUsableInterface,

    /// A socket could not be bound to a local interface address.
    #[error("failed to bind discovery socket on {addr}: {source}")]
    SocketBind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The transmission schedule failed unexpectedly.
    #[error("transmission failed: {0}")]
    Transmission(String),

    /// An unexpected I/O error occurred while receiving on a socket.
    #[error("recv error on {addr}: {source}")]
    Receive {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// A receiver had to buffer more responses than allowed because the
    /// consumer stopped reading.
    #[error("receiver on {addr} overflowed with {pending} undelivered responses")]
    Overflow { addr: SocketAddr, pending: usize },

    /// A worker thread or task could not be started or joined.
    #[error("discovery runtime error: {0}")]
    Runtime(String),
}

impl DiscoveryError {
    /// Returns `true` for errors that must terminate the response stream.
    ///
    /// The remaining variants are either validation errors (returned before
    /// the stream exists) or recovered locally by the engine.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DiscoveryError::Transmission(_)
                | DiscoveryError::Receive { .. }
                | DiscoveryError::Overflow { .. }
                | DiscoveryError::Runtime(_)
        )
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
