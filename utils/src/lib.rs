//! Shared utilities: typed statistics counters and a blocking event queue.

pub mod event_queue;
pub mod stats;

pub use event_queue::EventQueue;
pub use stats::{DetailType, Direction, StatType, Stats};
