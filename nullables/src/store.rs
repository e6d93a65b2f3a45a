//! Nullable store: thread-safe in-memory ledger storage for testing.
//!
//! Besides the store traits it offers chain-building helpers (`open_genesis`,
//! `send`, `receive`, ...) that derive sidebands, successors and account info
//! the way a block processor would. The helpers panic on malformed chains
//! since they only ever run inside tests.

use orv_store::{
    AccountInfo, AccountStore, BlockStore, ConfirmationHeightStore, ReadTxn, RepWeightStore,
    Store, StoreError, Table, WriteTxn,
};
use orv_types::{
    Account, Amount, Block, BlockHash, BlockSideband, ConfirmationHeightInfo, SavedBlock,
    StateBlock,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Default)]
struct StoreData {
    blocks: HashMap<BlockHash, SavedBlock>,
    accounts: HashMap<Account, AccountInfo>,
    heights: HashMap<Account, ConfirmationHeightInfo>,
    weights: HashMap<Account, u128>,
}

#[derive(Default)]
pub struct NullStore {
    data: Mutex<StoreData>,
    refreshes: AtomicUsize,
    write_txns: AtomicUsize,
    commits: AtomicUsize,
}

impl NullStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `block` to its account chain and return it with its sideband.
    pub fn process(&self, block: Block) -> SavedBlock {
        let mut data = self.data.lock().unwrap();
        let hash = block.hash();
        assert!(!data.blocks.contains_key(&hash), "block {hash} already stored");

        let previous = block.previous();
        let (account, height, balance_before) = if previous.is_zero() {
            let account = block
                .account_field()
                .expect("an open block names its account");
            (account, 1, Amount::ZERO)
        } else {
            let prev = data
                .blocks
                .get_mut(&previous)
                .expect("previous block is stored");
            assert!(prev.successor().is_zero(), "block {previous} already has a successor");
            prev.set_successor(hash);
            (prev.account(), prev.height() + 1, prev.balance())
        };

        let balance = match block.balance_field() {
            Some(balance) => balance,
            None if !block.source_field().is_zero() => {
                balance_before + Self::amount_sent(&data, &block.source_field())
            }
            None => balance_before,
        };

        let info = data.accounts.entry(account).or_default();
        info.head = hash;
        if height == 1 {
            info.open_block = hash;
        }
        if let Some(rep) = block.representative_field() {
            info.representative = rep;
        }
        info.balance = balance;
        info.block_count = height;

        let saved = SavedBlock::new(
            block,
            BlockSideband {
                account,
                height,
                successor: BlockHash::ZERO,
                balance,
            },
        );
        data.blocks.insert(hash, saved.clone());
        saved
    }

    fn amount_sent(data: &StoreData, send: &BlockHash) -> Amount {
        let send = data.blocks.get(send).expect("source block is stored");
        let before = data
            .blocks
            .get(&send.previous())
            .map(|b| b.balance())
            .unwrap_or(Amount::ZERO);
        before.saturating_sub(send.balance())
    }

    fn state_block(&self, account: Account, balance: Amount, link: BlockHash) -> Block {
        let info = self.account(&account);
        let representative = if info.representative.is_zero() {
            account
        } else {
            info.representative
        };
        Block::State(StateBlock {
            account,
            previous: info.head,
            representative,
            balance,
            link,
        })
    }

    fn account(&self, account: &Account) -> AccountInfo {
        self.data
            .lock()
            .unwrap()
            .accounts
            .get(account)
            .cloned()
            .unwrap_or_default()
    }

    /// Open `account` with `balance` out of thin air.
    pub fn open_genesis(&self, account: Account, balance: Amount) -> SavedBlock {
        self.process(Block::State(StateBlock {
            account,
            previous: BlockHash::ZERO,
            representative: account,
            balance,
            link: BlockHash::ZERO,
        }))
    }

    pub fn send(&self, from: Account, to: Account, amount: Amount) -> SavedBlock {
        let balance = self.account(&from).balance.saturating_sub(amount);
        let block = self.state_block(from, balance, BlockHash::from(to));
        self.process(block)
    }

    /// Receive `source` into `account`, opening the account if needed.
    pub fn receive(&self, account: Account, source: BlockHash) -> SavedBlock {
        let amount = Self::amount_sent(&self.data.lock().unwrap(), &source);
        let balance = self.account(&account).balance + amount;
        let block = self.state_block(account, balance, source);
        self.process(block)
    }

    pub fn change(&self, account: Account, representative: Account) -> SavedBlock {
        let info = self.account(&account);
        self.process(Block::State(StateBlock {
            account,
            previous: info.head,
            representative,
            balance: info.balance,
            link: BlockHash::ZERO,
        }))
    }

    pub fn epoch(&self, account: Account, epoch_link: BlockHash) -> SavedBlock {
        let balance = self.account(&account).balance;
        let block = self.state_block(account, balance, epoch_link);
        self.process(block)
    }

    pub fn set_weight(&self, rep: Account, weight: u128) {
        self.data.lock().unwrap().weights.insert(rep, weight);
    }

    /// Mark `hash` and all its ancestors as cemented.
    pub fn cement(&self, hash: &BlockHash) {
        let mut data = self.data.lock().unwrap();
        let block = data.blocks.get(hash).expect("block is stored").clone();
        data.heights.insert(
            block.account(),
            ConfirmationHeightInfo::new(block.height(), *hash),
        );
    }

    /// Drop a block without touching its neighbours, simulating corruption.
    pub fn remove_block(&self, hash: &BlockHash) {
        self.data.lock().unwrap().blocks.remove(hash);
    }

    pub fn confirmation_height(&self, account: &Account) -> ConfirmationHeightInfo {
        self.data
            .lock()
            .unwrap()
            .heights
            .get(account)
            .copied()
            .unwrap_or_default()
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::Relaxed)
    }

    pub fn write_txn_count(&self) -> usize {
        self.write_txns.load(Ordering::Relaxed)
    }

    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::Relaxed)
    }
}

impl AccountStore for NullStore {
    fn get_account(&self, account: &Account) -> Result<Option<AccountInfo>, StoreError> {
        Ok(self.data.lock().unwrap().accounts.get(account).cloned())
    }

    fn account_count(&self) -> Result<u64, StoreError> {
        Ok(self.data.lock().unwrap().accounts.len() as u64)
    }
}

impl BlockStore for NullStore {
    fn get_block(&self, hash: &BlockHash) -> Result<Option<SavedBlock>, StoreError> {
        Ok(self.data.lock().unwrap().blocks.get(hash).cloned())
    }

    fn block_exists(&self, hash: &BlockHash) -> Result<bool, StoreError> {
        Ok(self.data.lock().unwrap().blocks.contains_key(hash))
    }

    fn block_count(&self) -> Result<u64, StoreError> {
        Ok(self.data.lock().unwrap().blocks.len() as u64)
    }
}

impl ConfirmationHeightStore for NullStore {
    fn get_confirmation_height(
        &self,
        account: &Account,
    ) -> Result<Option<ConfirmationHeightInfo>, StoreError> {
        Ok(self.data.lock().unwrap().heights.get(account).copied())
    }

    fn put_confirmation_height(
        &self,
        _txn: &mut dyn WriteTxn,
        account: &Account,
        info: &ConfirmationHeightInfo,
    ) -> Result<(), StoreError> {
        self.data.lock().unwrap().heights.insert(*account, *info);
        Ok(())
    }
}

impl RepWeightStore for NullStore {
    fn get_rep_weight(&self, rep: &Account) -> Result<Option<u128>, StoreError> {
        Ok(self.data.lock().unwrap().weights.get(rep).copied())
    }

    fn iter_rep_weights(&self) -> Result<Vec<(Account, u128)>, StoreError> {
        Ok(self
            .data
            .lock()
            .unwrap()
            .weights
            .iter()
            .map(|(a, w)| (*a, *w))
            .collect())
    }
}

struct NullReadTxn<'a> {
    store: &'a NullStore,
}

impl ReadTxn for NullReadTxn<'_> {
    fn refresh(&mut self) {
        self.store.refreshes.fetch_add(1, Ordering::Relaxed);
    }
}

/// Writes land immediately; the transaction only counts commits.
struct NullWriteTxn<'a> {
    store: &'a NullStore,
}

impl WriteTxn for NullWriteTxn<'_> {
    fn commit(&mut self) -> Result<(), StoreError> {
        self.store.commits.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn renew(&mut self) -> Result<(), StoreError> {
        self.commit()?;
        self.store.write_txns.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl Store for NullStore {
    fn tx_begin_read(&self) -> Box<dyn ReadTxn + '_> {
        Box::new(NullReadTxn { store: self })
    }

    fn tx_begin_write(&self, _tables: &[Table]) -> Box<dyn WriteTxn + '_> {
        self.write_txns.fetch_add(1, Ordering::Relaxed);
        Box::new(NullWriteTxn { store: self })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_helpers_derive_sidebands() {
        let store = NullStore::new();
        let genesis = Account::from(1);
        let dest = Account::from(2);
        let open = store.open_genesis(genesis, Amount::raw(100));
        let send = store.send(genesis, dest, Amount::raw(30));
        let receive = store.receive(dest, send.hash());

        assert_eq!(open.height(), 1);
        assert_eq!(send.height(), 2);
        assert_eq!(send.balance(), Amount::raw(70));
        assert_eq!(receive.height(), 1);
        assert_eq!(receive.balance(), Amount::raw(30));
        assert_eq!(
            store.get_block(&open.hash()).unwrap().unwrap().successor(),
            send.hash()
        );
        let info = store.get_account(&dest).unwrap().unwrap();
        assert_eq!(info.open_block, receive.hash());
        assert_eq!(info.head, receive.hash());
    }

    #[test]
    fn cement_sets_height_and_frontier() {
        let store = NullStore::new();
        let genesis = Account::from(1);
        store.open_genesis(genesis, Amount::raw(10));
        let change = store.change(genesis, Account::from(9));
        store.cement(&change.hash());
        let info = store.get_confirmation_height(&genesis).unwrap().unwrap();
        assert_eq!(info, ConfirmationHeightInfo::new(2, change.hash()));
    }

    #[test]
    fn transactions_are_counted() {
        let store = NullStore::new();
        let mut txn = store.tx_begin_write(&[Table::ConfirmationHeight]);
        txn.commit().unwrap();
        txn.renew().unwrap();
        drop(txn);
        store.tx_begin_read().refresh();
        assert_eq!(store.write_txn_count(), 2);
        assert_eq!(store.commit_count(), 2);
        assert_eq!(store.refresh_count(), 1);
    }
}
