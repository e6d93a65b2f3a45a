//! Ledger facade over an abstract [`orv_store::Store`].
//!
//! Answers the questions consensus asks of the block-lattice: where a block
//! sits, whether it and its dependencies are cemented, what a receive's source
//! is, and how much weight a representative holds.

pub mod error;
pub mod ledger;

pub use error::LedgerError;
pub use ledger::Ledger;
