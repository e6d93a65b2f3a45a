//! Account identifiers.

use crate::error::TypesError;
use crate::keys::PublicKey;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A 32-byte account identifier (the account's Ed25519 public key).
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Account([u8; 32]);

impl Account {
    pub const ZERO: Self = Self([0u8; 32]);

    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0)
    }
}

impl From<&PublicKey> for Account {
    fn from(key: &PublicKey) -> Self {
        Self(key.0)
    }
}

/// Places the integer big-endian in the low bytes. Handy for test fixtures.
impl From<u64> for Account {
    fn from(value: u64) -> Self {
        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&value.to_be_bytes());
        Self(bytes)
    }
}

impl FromStr for Account {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("orv_").unwrap_or(s);
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| TypesError::InvalidHex(s.to_string()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Account({}\u{2026})", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "orv_{}", hex::encode(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_round_trips_through_from_str() {
        let account = Account::from(0xdead_beef);
        let parsed: Account = account.to_string().parse().unwrap();
        assert_eq!(parsed, account);
    }

    #[test]
    fn rejects_short_hex() {
        assert!("orv_abcd".parse::<Account>().is_err());
    }
}
