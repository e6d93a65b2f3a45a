//! Account storage trait.

use crate::StoreError;
use orv_types::{Account, Amount, BlockHash};
use serde::{Deserialize, Serialize};

/// Per-account information stored in the ledger.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    /// Latest block in the account chain.
    pub head: BlockHash,
    /// First block in the account chain.
    pub open_block: BlockHash,
    pub representative: Account,
    pub balance: Amount,
    pub block_count: u64,
}

pub trait AccountStore {
    fn get_account(&self, account: &Account) -> Result<Option<AccountInfo>, StoreError>;
    fn account_count(&self) -> Result<u64, StoreError>;
}
