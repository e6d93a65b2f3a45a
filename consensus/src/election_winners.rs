//! Registry of winners whose confirmation is in flight.
//!
//! An election registers its winner on confirmation. If another election
//! confirms the same block before it has been cemented, the registry refuses
//! the second registration so the block is only handed to cementing once.
//! Entries are released when the block is cemented.

use orv_types::{BlockHash, QualifiedRoot};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct ElectionWinners {
    winners: Mutex<HashMap<BlockHash, QualifiedRoot>>,
}

impl ElectionWinners {
    pub fn new() -> Self {
        Self::default()
    }

    /// `false` if `hash` is already registered.
    pub fn try_insert(&self, hash: BlockHash, root: QualifiedRoot) -> bool {
        let mut winners = self.winners.lock().unwrap();
        if winners.contains_key(&hash) {
            return false;
        }
        winners.insert(hash, root);
        true
    }

    pub fn remove(&self, hash: &BlockHash) -> Option<QualifiedRoot> {
        self.winners.lock().unwrap().remove(hash)
    }

    pub fn contains(&self, hash: &BlockHash) -> bool {
        self.winners.lock().unwrap().contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.winners.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_registration_is_refused_until_removed() {
        let winners = ElectionWinners::new();
        let hash = BlockHash::from(1);
        assert!(winners.try_insert(hash, QualifiedRoot::default()));
        assert!(!winners.try_insert(hash, QualifiedRoot::default()));
        assert!(winners.remove(&hash).is_some());
        assert!(winners.try_insert(hash, QualifiedRoot::default()));
    }
}
