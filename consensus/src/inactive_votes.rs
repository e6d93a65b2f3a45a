//! Votes for hashes that have no election yet.
//!
//! Votes can arrive before the block they vote for, or before an election is
//! started for it. They are parked here and replayed into the election when
//! it starts or when the block is published into an existing election.
//!
//! Each representative keeps only its highest-sequence vote per hash. The
//! cache is bounded: when full, the hash that was cached first is evicted.

use orv_types::{Account, BlockHash};
use std::collections::{HashMap, VecDeque};

/// Representatives remembered per hash. Later voters beyond this are dropped.
const MAX_VOTERS_PER_HASH: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CachedVote {
    pub rep: Account,
    pub sequence: u64,
}

pub struct InactiveVotesCache {
    entries: HashMap<BlockHash, Vec<CachedVote>>,
    order: VecDeque<BlockHash>,
    capacity: usize,
}

impl InactiveVotesCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    pub fn insert(&mut self, hash: BlockHash, rep: Account, sequence: u64) {
        if self.capacity == 0 {
            return;
        }
        if let Some(votes) = self.entries.get_mut(&hash) {
            if let Some(existing) = votes.iter_mut().find(|v| v.rep == rep) {
                existing.sequence = existing.sequence.max(sequence);
            } else if votes.len() < MAX_VOTERS_PER_HASH {
                votes.push(CachedVote { rep, sequence });
            }
            return;
        }
        while self.entries.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
        self.entries.insert(hash, vec![CachedVote { rep, sequence }]);
        self.order.push_back(hash);
    }

    /// Remove and return every vote cached for `hash`.
    pub fn take(&mut self, hash: &BlockHash) -> Vec<CachedVote> {
        match self.entries.remove(hash) {
            Some(votes) => {
                self.order.retain(|h| h != hash);
                votes
            }
            None => Vec::new(),
        }
    }

    pub fn erase(&mut self, hash: &BlockHash) {
        self.take(hash);
    }

    pub fn voters(&self, hash: &BlockHash) -> usize {
        self.entries.get(hash).map_or(0, Vec::len)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_highest_sequence_per_rep() {
        let mut cache = InactiveVotesCache::new(16);
        let hash = BlockHash::from(1);
        cache.insert(hash, Account::from(1), 5);
        cache.insert(hash, Account::from(1), 3);
        cache.insert(hash, Account::from(2), 1);
        assert_eq!(cache.voters(&hash), 2);

        let votes = cache.take(&hash);
        assert!(votes.contains(&CachedVote { rep: Account::from(1), sequence: 5 }));
        assert!(cache.is_empty());
    }

    #[test]
    fn evicts_oldest_hash_when_full() {
        let mut cache = InactiveVotesCache::new(2);
        cache.insert(BlockHash::from(1), Account::from(1), 1);
        cache.insert(BlockHash::from(2), Account::from(1), 1);
        cache.insert(BlockHash::from(3), Account::from(1), 1);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.voters(&BlockHash::from(1)), 0);
        assert_eq!(cache.voters(&BlockHash::from(3)), 1);
    }
}
