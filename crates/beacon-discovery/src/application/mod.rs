//! Application layer use cases for the discovery engine.
//!
//! # What is the "application" layer? (for beginners)
//!
//! The infrastructure layer knows how to bind sockets and move datagrams; it
//! has no idea what the bytes mean.  The codecs in `beacon_core::protocol`
//! know what the bytes mean but never touch a socket.  A use case in this
//! layer connects the two: it asks a protocol for its request, runs the
//! engine, and feeds every raw response back through the protocol's decoder.
//!
//! # Sub-modules
//!
//! - **`search`** – Runs one protocol-driven discovery and yields typed
//!   results, optionally with duplicates removed.

pub mod search;
