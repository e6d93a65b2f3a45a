//! Representative weight storage trait.

use crate::StoreError;
use orv_types::Account;

pub trait RepWeightStore {
    /// `None` for accounts nobody delegates to.
    fn get_rep_weight(&self, rep: &Account) -> Result<Option<u128>, StoreError>;

    fn iter_rep_weights(&self) -> Result<Vec<(Account, u128)>, StoreError>;
}
