//! beacon-discovery library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.

pub mod application;
pub mod infrastructure;

pub use application::search::{search, SearchStream};
pub use infrastructure::network::session::{
    discover, DiscoverySession, DiscoveryStream, SessionOptions, SessionState,
};
