//! Recently confirmed elections.
//!
//! A bounded FIFO of (root, winner) pairs. Late votes for these hashes count
//! as replays and no new election is opened for these roots. When full, the
//! oldest entry is evicted.

use orv_types::{BlockHash, QualifiedRoot};
use std::collections::{HashMap, VecDeque};

pub struct RecentlyConfirmed {
    by_root: HashMap<QualifiedRoot, BlockHash>,
    by_hash: HashMap<BlockHash, QualifiedRoot>,
    order: VecDeque<QualifiedRoot>,
    capacity: usize,
}

impl RecentlyConfirmed {
    pub fn new(capacity: usize) -> Self {
        Self {
            by_root: HashMap::new(),
            by_hash: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    /// `false` if the root was already present.
    pub fn insert(&mut self, root: QualifiedRoot, hash: BlockHash) -> bool {
        if self.capacity == 0 || self.by_root.contains_key(&root) {
            return false;
        }
        if self.order.len() >= self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                if let Some(old_hash) = self.by_root.remove(&evicted) {
                    self.by_hash.remove(&old_hash);
                }
            }
        }
        self.by_root.insert(root, hash);
        self.by_hash.insert(hash, root);
        self.order.push_back(root);
        true
    }

    pub fn contains_root(&self, root: &QualifiedRoot) -> bool {
        self.by_root.contains_key(root)
    }

    pub fn contains_hash(&self, hash: &BlockHash) -> bool {
        self.by_hash.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orv_types::Root;

    fn root(n: u64) -> QualifiedRoot {
        QualifiedRoot::new(Root::from(BlockHash::from(n)), BlockHash::from(n))
    }

    #[test]
    fn lookups_by_root_and_hash() {
        let mut rc = RecentlyConfirmed::new(4);
        assert!(rc.insert(root(1), BlockHash::from(10)));
        assert!(!rc.insert(root(1), BlockHash::from(11)));
        assert!(rc.contains_root(&root(1)));
        assert!(rc.contains_hash(&BlockHash::from(10)));
        assert!(!rc.contains_hash(&BlockHash::from(11)));
    }

    #[test]
    fn oldest_entry_is_evicted() {
        let mut rc = RecentlyConfirmed::new(2);
        rc.insert(root(1), BlockHash::from(10));
        rc.insert(root(2), BlockHash::from(20));
        rc.insert(root(3), BlockHash::from(30));
        assert_eq!(rc.len(), 2);
        assert!(!rc.contains_root(&root(1)));
        assert!(!rc.contains_hash(&BlockHash::from(10)));
        assert!(rc.contains_hash(&BlockHash::from(30)));
    }
}
