//! The ledger facade.
//!
//! Lookups never fail loudly: a backend error is logged and reported as
//! "absent", which callers already have to handle. Only confirmation height
//! writes surface errors.

use crate::LedgerError;
use orv_store::{AccountInfo, Store, WriteTxn};
use orv_types::{
    Account, Block, BlockHash, ConfirmationHeightInfo, NetworkParams, Root, SavedBlock,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::error;

pub struct Ledger {
    store: Arc<dyn Store>,
    params: NetworkParams,
    cemented_count: AtomicU64,
}

impl Ledger {
    pub fn new(store: Arc<dyn Store>, params: NetworkParams) -> Self {
        Self {
            store,
            params,
            cemented_count: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn params(&self) -> &NetworkParams {
        &self.params
    }

    pub fn is_test_network(&self) -> bool {
        self.params.is_test_network()
    }

    pub fn block(&self, hash: &BlockHash) -> Option<SavedBlock> {
        self.store.get_block(hash).unwrap_or_else(|e| {
            error!(%hash, error = %e, "block lookup failed");
            None
        })
    }

    pub fn block_exists(&self, hash: &BlockHash) -> bool {
        self.store.block_exists(hash).unwrap_or_else(|e| {
            error!(%hash, error = %e, "block existence check failed");
            false
        })
    }

    pub fn account_info(&self, account: &Account) -> Option<AccountInfo> {
        self.store.get_account(account).unwrap_or_else(|e| {
            error!(%account, error = %e, "account lookup failed");
            None
        })
    }

    /// Zero height and frontier when nothing is cemented for `account`.
    pub fn confirmation_height(&self, account: &Account) -> ConfirmationHeightInfo {
        match self.store.get_confirmation_height(account) {
            Ok(info) => info.unwrap_or_default(),
            Err(e) => {
                error!(%account, error = %e, "confirmation height lookup failed");
                ConfirmationHeightInfo::default()
            }
        }
    }

    pub fn block_confirmed(&self, hash: &BlockHash) -> bool {
        self.block(hash)
            .map(|block| self.confirmation_height(&block.account()).height >= block.height())
            .unwrap_or(false)
    }

    pub fn weight(&self, rep: &Account) -> u128 {
        self.store.get_rep_weight(rep).unwrap_or_else(|e| {
            error!(%rep, error = %e, "weight lookup failed");
            None
        })
        .unwrap_or(0)
    }

    pub fn is_epoch_link(&self, link: &BlockHash) -> bool {
        self.params.epochs.is_epoch_link(link)
    }

    /// The send this block receives from, if it is a receive whose source is
    /// in the ledger. Epoch links and state sends yield `None`.
    pub fn receive_source(&self, block: &Block) -> Option<BlockHash> {
        let source = block.source_or_link();
        if source.is_zero() || self.is_epoch_link(&source) {
            return None;
        }
        if self.block_exists(&source) {
            Some(source)
        } else {
            None
        }
    }

    pub fn is_receive(&self, block: &Block) -> bool {
        self.receive_source(block).is_some()
    }

    /// Previous and source (for receives) are both cemented.
    pub fn dependents_confirmed(&self, block: &Block) -> bool {
        let previous = block.previous();
        let previous_ok = previous.is_zero() || self.block_confirmed(&previous);
        previous_ok
            && self
                .receive_source(block)
                .map_or(true, |source| self.block_confirmed(&source))
    }

    /// The block currently occupying `root`'s chain position: the successor of
    /// the root block, or the open block when the root is an account.
    pub fn successor(&self, root: &Root) -> Option<BlockHash> {
        if let Some(block) = self.block(&root.as_block_hash()) {
            let successor = block.successor();
            return (!successor.is_zero()).then_some(successor);
        }
        self.account_info(&root.as_account())
            .map(|info| info.open_block)
            .filter(|open| !open.is_zero())
    }

    /// Resolve `hash` or, failing that, whatever block currently sits at `root`.
    pub fn block_or_successor(&self, hash: &BlockHash, root: &Root) -> Option<SavedBlock> {
        self.block(hash).or_else(|| {
            if root.is_zero() {
                return None;
            }
            self.successor(root).and_then(|s| self.block(&s))
        })
    }

    pub fn write_confirmation_height(
        &self,
        txn: &mut dyn WriteTxn,
        account: &Account,
        blocks_cemented: u64,
        info: &ConfirmationHeightInfo,
    ) -> Result<(), LedgerError> {
        self.store.put_confirmation_height(txn, account, info)?;
        self.cemented_count.fetch_add(blocks_cemented, Ordering::Relaxed);
        Ok(())
    }

    /// Blocks cemented through this ledger since it was opened.
    pub fn cemented_count(&self) -> u64 {
        self.cemented_count.load(Ordering::Relaxed)
    }

    pub fn block_count(&self) -> u64 {
        self.store.block_count().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orv_nullables::NullStore;
    use orv_types::{Amount, NetworkId};

    fn setup() -> (Arc<NullStore>, Ledger) {
        let store = Arc::new(NullStore::new());
        let ledger = Ledger::new(store.clone(), NetworkParams::new(NetworkId::Test));
        (store, ledger)
    }

    #[test]
    fn unknown_block_is_not_confirmed() {
        let (_, ledger) = setup();
        assert!(!ledger.block_confirmed(&BlockHash::from(1)));
        assert_eq!(ledger.confirmation_height(&Account::from(1)).height, 0);
    }

    #[test]
    fn receive_source_ignores_epoch_links_and_sends() {
        let (store, ledger) = setup();
        let genesis = Account::from(1);
        let dest = Account::from(2);
        store.open_genesis(genesis, Amount::raw(100));
        let send = store.send(genesis, dest, Amount::raw(10));
        let receive = store.receive(dest, send.hash());

        assert_eq!(ledger.receive_source(&receive), Some(send.hash()));
        assert!(!ledger.is_receive(&send));

        let epoch = store.epoch(dest, ledger.params().epochs.links()[0]);
        assert!(!ledger.is_receive(&epoch));
    }

    #[test]
    fn dependents_confirmed_tracks_previous_and_source() {
        let (store, ledger) = setup();
        let genesis = Account::from(1);
        let dest = Account::from(2);
        let open = store.open_genesis(genesis, Amount::raw(100));
        let send = store.send(genesis, dest, Amount::raw(10));
        let receive = store.receive(dest, send.hash());

        assert!(ledger.dependents_confirmed(&open));
        assert!(!ledger.dependents_confirmed(&send));
        assert!(!ledger.dependents_confirmed(&receive));

        store.cement(&send.hash());
        assert!(ledger.dependents_confirmed(&send));
        assert!(ledger.dependents_confirmed(&receive));
    }

    #[test]
    fn successor_resolves_block_and_account_roots() {
        let (store, ledger) = setup();
        let genesis = Account::from(1);
        let open = store.open_genesis(genesis, Amount::raw(100));
        let send = store.send(genesis, Account::from(2), Amount::raw(1));

        assert_eq!(ledger.successor(&Root::from(genesis)), Some(open.hash()));
        assert_eq!(ledger.successor(&Root::from(open.hash())), Some(send.hash()));
        assert_eq!(ledger.successor(&Root::from(send.hash())), None);
    }

    #[test]
    fn writing_heights_updates_cemented_count() {
        let (store, ledger) = setup();
        let genesis = Account::from(1);
        let open = store.open_genesis(genesis, Amount::raw(100));
        let mut txn = store.tx_begin_write(&[orv_store::Table::ConfirmationHeight]);
        ledger
            .write_confirmation_height(
                txn.as_mut(),
                &genesis,
                1,
                &ConfirmationHeightInfo::new(1, open.hash()),
            )
            .unwrap();
        txn.commit().unwrap();
        assert_eq!(ledger.cemented_count(), 1);
        assert!(ledger.block_confirmed(&open.hash()));
    }
}
