//! Block storage trait.

use crate::StoreError;
use orv_types::{BlockHash, SavedBlock};

/// Read access to the block-lattice.
pub trait BlockStore {
    fn get_block(&self, hash: &BlockHash) -> Result<Option<SavedBlock>, StoreError>;

    fn block_exists(&self, hash: &BlockHash) -> Result<bool, StoreError> {
        self.get_block(hash).map(|b| b.is_some())
    }

    /// Zero when the block is the head of its chain.
    fn successor(&self, hash: &BlockHash) -> Result<Option<BlockHash>, StoreError> {
        Ok(self
            .get_block(hash)?
            .map(|b| b.successor())
            .filter(|s| !s.is_zero()))
    }

    fn block_count(&self) -> Result<u64, StoreError>;
}
