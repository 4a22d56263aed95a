//! Infrastructure layer for the discovery engine.
//!
//! Contains the OS-facing adapters: interface enumeration, UDP sockets and the
//! threads that drive them, and file-system storage for the configuration.

pub mod network;
pub mod storage;
