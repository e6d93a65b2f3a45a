use orv_types::{Account, BlockHash};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("ledger error: {0}")]
    Ledger(#[from] orv_ledger::LedgerError),

    #[error("consensus error: {0}")]
    Consensus(#[from] orv_consensus::ConsensusError),

    #[error("store error: {0}")]
    Store(#[from] orv_store::StoreError),

    #[error("cementing error: {0}")]
    Cement(#[from] CementError),

    #[error("vote from {0} has an invalid signature")]
    InvalidVote(Account),

    #[error("config error: {0}")]
    Config(String),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("logging error: {0}")]
    Logging(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of the confirmation height processor.
#[derive(Debug, Error)]
pub enum CementError {
    /// A block the walk expected is gone. The ledger is corrupt.
    #[error("ledger mismatch: block {0} is missing")]
    MissingBlock(BlockHash),

    #[error("confirmation height processor is stopped")]
    Stopped,

    #[error("ledger error: {0}")]
    Ledger(#[from] orv_ledger::LedgerError),

    #[error("store error: {0}")]
    Store(#[from] orv_store::StoreError),
}
