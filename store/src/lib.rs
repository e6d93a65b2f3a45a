//! Abstract storage traits for the ledger.
//!
//! Every storage backend implements these traits. The consensus core depends
//! only on the traits, never on an on-disk format.

pub mod account;
pub mod block;
pub mod confirmation_height;
pub mod error;
pub mod rep_weights;
pub mod write_queue;

pub use account::{AccountInfo, AccountStore};
pub use block::BlockStore;
pub use confirmation_height::ConfirmationHeightStore;
pub use error::StoreError;
pub use rep_weights::RepWeightStore;
pub use write_queue::{WriteGuard, WriteQueue, Writer};

/// Tables a write transaction may be scoped to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Table {
    Accounts,
    Blocks,
    ConfirmationHeight,
    RepWeights,
}

/// A consistent read view. Long walks refresh it so the backend can reclaim
/// space held by old snapshots.
pub trait ReadTxn {
    fn refresh(&mut self);
}

/// A write transaction. Only one may be active at a time system-wide, which the
/// [`WriteQueue`] enforces among writers.
pub trait WriteTxn {
    fn commit(&mut self) -> Result<(), StoreError>;

    /// Commit and immediately begin a fresh transaction over the same tables.
    fn renew(&mut self) -> Result<(), StoreError>;
}

/// Everything the consensus core needs from a ledger backend.
pub trait Store:
    AccountStore + BlockStore + ConfirmationHeightStore + RepWeightStore + Send + Sync
{
    fn tx_begin_read(&self) -> Box<dyn ReadTxn + '_>;
    fn tx_begin_write(&self, tables: &[Table]) -> Box<dyn WriteTxn + '_>;
}
