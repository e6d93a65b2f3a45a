//! Confirmation height storage trait.

use crate::{StoreError, WriteTxn};
use orv_types::{Account, ConfirmationHeightInfo};

/// Per-account cemented height. Accounts with nothing cemented have no entry.
pub trait ConfirmationHeightStore {
    fn get_confirmation_height(
        &self,
        account: &Account,
    ) -> Result<Option<ConfirmationHeightInfo>, StoreError>;

    fn put_confirmation_height(
        &self,
        txn: &mut dyn WriteTxn,
        account: &Account,
        info: &ConfirmationHeightInfo,
    ) -> Result<(), StoreError>;
}
