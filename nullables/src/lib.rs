//! Nullable infrastructure for deterministic testing.
//!
//! The consensus core reaches the outside world only through the store and
//! network traits. This crate provides implementations that:
//! - keep all state in memory and never touch the filesystem or sockets
//! - record every outbound message for assertions
//! - build account chains with a few calls, deriving sidebands automatically

pub mod network;
pub mod store;

pub use network::{NullChannel, NullNetwork};
pub use store::NullStore;
