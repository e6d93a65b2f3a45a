//! Votes this node generated, indexed by the hashes they cover.
//!
//! The request aggregator answers repeat requests from here, and elections
//! drop entries when the winner they voted for is replaced. Each hash keeps
//! at most one vote per representative (the newest). Bounded FIFO by hash.

use orv_messages::Vote;
use orv_types::BlockHash;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

pub struct VotesCache {
    data: Mutex<CacheData>,
    max_size: usize,
}

#[derive(Default)]
struct CacheData {
    by_hash: HashMap<BlockHash, Vec<Arc<Vote>>>,
    order: VecDeque<BlockHash>,
}

impl VotesCache {
    pub fn new(max_size: usize) -> Self {
        Self {
            data: Mutex::new(CacheData::default()),
            max_size,
        }
    }

    /// Index `vote` under every hash it covers.
    pub fn add(&self, vote: &Arc<Vote>) {
        let mut data = self.data.lock().unwrap();
        for hash in vote.hashes() {
            if let Some(votes) = data.by_hash.get_mut(&hash) {
                votes.retain(|v| v.account != vote.account);
                votes.push(Arc::clone(vote));
                continue;
            }
            while data.by_hash.len() >= self.max_size {
                match data.order.pop_front() {
                    Some(oldest) => {
                        data.by_hash.remove(&oldest);
                    }
                    None => break,
                }
            }
            if self.max_size == 0 {
                return;
            }
            data.by_hash.insert(hash, vec![Arc::clone(vote)]);
            data.order.push_back(hash);
        }
    }

    pub fn find(&self, hash: &BlockHash) -> Vec<Arc<Vote>> {
        self.data
            .lock()
            .unwrap()
            .by_hash
            .get(hash)
            .cloned()
            .unwrap_or_default()
    }

    pub fn remove(&self, hash: &BlockHash) {
        let mut data = self.data.lock().unwrap();
        if data.by_hash.remove(hash).is_some() {
            data.order.retain(|h| h != hash);
        }
    }

    pub fn len(&self) -> usize {
        self.data.lock().unwrap().by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
