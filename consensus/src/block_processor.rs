//! Hand-off to the ledger's block processor.

use orv_types::Block;
use orv_utils::EventQueue;
use std::sync::Arc;

/// Receives blocks that consensus wants written into the ledger regardless of
/// what currently occupies their chain position, i.e. a new election winner
/// displacing the block the ledger holds for that root.
pub trait BlockProcessor: Send + Sync {
    fn force(&self, block: Arc<Block>);
}

/// Forced blocks are queued for whoever drives the ledger.
impl BlockProcessor for EventQueue<Arc<Block>> {
    fn force(&self, block: Arc<Block>) {
        self.post(block);
    }
}
