//! Network infrastructure for multicast discovery.
//!
//! # Sub-modules
//!
//! - **`interfaces`** – Lists the LAN-facing IPv4 addresses of this host.
//!   Hosts are commonly multi-homed (Ethernet + Wi-Fi), so discovery is sent
//!   from every one of them.
//!
//! - **`socket_pool`** – Creates and binds one UDP socket per local address and
//!   wraps it in a [`socket_pool::BoundSocket`] whose close is idempotent.
//!
//! - **`transmitter`** – Sends the request datagram from every socket: once
//!   immediately, then again at randomised delays.
//!
//! - **`receiver`** – One blocking receive loop per socket on its own thread,
//!   feeding a bounded channel without ever dropping a response silently.
//!
//! - **`session`** – Orchestrates all of the above for one discovery run and
//!   guarantees every socket is closed exactly once, however the run ends.

pub mod interfaces;
pub mod receiver;
pub mod session;
pub mod socket_pool;
pub mod transmitter;

/// Returns `true` for OS timeout / would-block errors that should be retried.
pub(crate) fn is_timeout_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}
