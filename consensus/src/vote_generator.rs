//! Local vote generation.
//!
//! The generator signs votes with every local representative key. There are
//! two paths:
//!
//! - [`VoteGenerator::generate`] signs immediately and returns the votes, used
//!   by the request aggregator to answer a peer directly.
//! - [`VoteGenerator::add`] queues a hash for broadcast. A worker thread waits
//!   briefly so several hashes can share one vote, then floods the votes and
//!   posts them to the local-vote queue so our own elections count them.
//!
//! Every generated vote lands in the [`VotesCache`].

use crate::votes_cache::VotesCache;
use orv_messages::{Network, Vote, CONFIRM_ACK_HASHES_MAX};
use orv_types::{Account, BlockHash, KeyPair, Timestamp};
use orv_utils::{DetailType, Direction, EventQueue, StatType, Stats};
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::debug;

struct LocalRep {
    keys: KeyPair,
    sequence: u64,
}

impl LocalRep {
    /// Sequences follow the wall clock in milliseconds so votes signed after
    /// a restart supersede the ones peers saw before it. Votes signed within
    /// the same millisecond still count up.
    fn next_sequence(&mut self, now: Timestamp) -> u64 {
        self.sequence = (self.sequence + 1).max(now.as_millis());
        self.sequence
    }
}

#[derive(Default)]
struct GeneratorQueue {
    hashes: VecDeque<BlockHash>,
    stopped: bool,
}

pub struct VoteGenerator {
    representatives: Mutex<Vec<LocalRep>>,
    votes_cache: Arc<VotesCache>,
    network: Arc<dyn Network>,
    stats: Arc<Stats>,
    local_votes: Arc<EventQueue<Arc<Vote>>>,
    delay: Duration,
    queue: Mutex<GeneratorQueue>,
    condition: Condvar,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl VoteGenerator {
    pub fn new(
        votes_cache: Arc<VotesCache>,
        network: Arc<dyn Network>,
        stats: Arc<Stats>,
        local_votes: Arc<EventQueue<Arc<Vote>>>,
        delay: Duration,
    ) -> Self {
        Self {
            representatives: Mutex::new(Vec::new()),
            votes_cache,
            network,
            stats,
            local_votes,
            delay,
            queue: Mutex::new(GeneratorQueue::default()),
            condition: Condvar::new(),
            thread: Mutex::new(None),
        }
    }

    /// Vote with `keys` from now on. Adding the same account twice is a no-op.
    pub fn add_representative(&self, keys: KeyPair) {
        let mut reps = self.representatives.lock().unwrap();
        let account = keys.account();
        if reps.iter().any(|r| r.keys.account() == account) {
            return;
        }
        reps.push(LocalRep { keys, sequence: 0 });
    }

    pub fn has_representatives(&self) -> bool {
        !self.representatives.lock().unwrap().is_empty()
    }

    pub fn representatives(&self) -> Vec<Account> {
        self.representatives
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.keys.account())
            .collect()
    }

    /// Sign votes for `hashes` with every local representative, at most
    /// [`CONFIRM_ACK_HASHES_MAX`] hashes per vote. Votes are returned in hash
    /// order per representative and are cached before returning.
    pub fn generate(&self, hashes: &[BlockHash]) -> Vec<Arc<Vote>> {
        if hashes.is_empty() {
            return Vec::new();
        }
        let mut votes = Vec::new();
        {
            let now = Timestamp::now();
            let mut reps = self.representatives.lock().unwrap();
            for rep in reps.iter_mut() {
                for chunk in hashes.chunks(CONFIRM_ACK_HASHES_MAX) {
                    let sequence = rep.next_sequence(now);
                    votes.push(Arc::new(Vote::new(&rep.keys, sequence, chunk.to_vec())));
                }
            }
        }
        for vote in &votes {
            self.votes_cache.add(vote);
        }
        self.stats.add_dir(
            StatType::VoteGenerator,
            DetailType::GeneratorVotes,
            Direction::Out,
            votes.len() as u64,
        );
        votes
    }

    /// Queue `hash` for a broadcast vote.
    pub fn add(&self, hash: BlockHash) {
        let mut queue = self.queue.lock().unwrap();
        if queue.stopped || queue.hashes.contains(&hash) {
            return;
        }
        queue.hashes.push_back(hash);
        let full = queue.hashes.len() >= CONFIRM_ACK_HASHES_MAX;
        drop(queue);
        if full {
            self.condition.notify_all();
        } else {
            self.condition.notify_one();
        }
    }

    pub fn queued(&self) -> usize {
        self.queue.lock().unwrap().hashes.len()
    }

    /// Broadcast everything queued without waiting for the worker.
    pub fn flush(&self) {
        loop {
            let batch = {
                let mut queue = self.queue.lock().unwrap();
                Self::take_batch(&mut queue.hashes)
            };
            if batch.is_empty() {
                break;
            }
            self.broadcast(&batch);
        }
    }

    fn take_batch(hashes: &mut VecDeque<BlockHash>) -> Vec<BlockHash> {
        let count = hashes.len().min(CONFIRM_ACK_HASHES_MAX);
        hashes.drain(..count).collect()
    }

    fn broadcast(&self, hashes: &[BlockHash]) {
        let votes = self.generate(hashes);
        for vote in votes {
            self.network.flood_vote(&vote);
            self.local_votes.post(vote);
            self.stats
                .inc_dir(StatType::VoteGenerator, DetailType::GeneratorBroadcasts, Direction::Out);
        }
    }

    pub fn start(self: &Arc<Self>) -> io::Result<()> {
        let mut thread = self.thread.lock().unwrap();
        debug_assert!(thread.is_none());
        let generator = Arc::clone(self);
        *thread = Some(
            thread::Builder::new()
                .name("Voting".to_string())
                .spawn(move || generator.run())?,
        );
        Ok(())
    }

    pub fn stop(&self) {
        self.queue.lock().unwrap().stopped = true;
        self.condition.notify_all();
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    fn run(&self) {
        debug!("vote generator started");
        let mut queue = self.queue.lock().unwrap();
        loop {
            if queue.stopped {
                break;
            }
            if queue.hashes.is_empty() {
                queue = self.condition.wait(queue).unwrap();
                continue;
            }
            if queue.hashes.len() < CONFIRM_ACK_HASHES_MAX {
                // Give more hashes a chance to join this vote.
                let (guard, _) = self
                    .condition
                    .wait_timeout_while(queue, self.delay, |q| {
                        !q.stopped && q.hashes.len() < CONFIRM_ACK_HASHES_MAX
                    })
                    .unwrap();
                queue = guard;
                if queue.stopped {
                    break;
                }
            }
            let batch = Self::take_batch(&mut queue.hashes);
            drop(queue);
            self.broadcast(&batch);
            queue = self.queue.lock().unwrap();
        }
        debug!("vote generator stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orv_crypto::keypair_from_seed;
    use orv_nullables::NullNetwork;

    fn generator() -> (Arc<VoteGenerator>, Arc<NullNetwork>, Arc<EventQueue<Arc<Vote>>>, Arc<Stats>) {
        let network = Arc::new(NullNetwork::new());
        let local_votes = Arc::new(EventQueue::new());
        let stats = Arc::new(Stats::new());
        let generator = Arc::new(VoteGenerator::new(
            Arc::new(VotesCache::new(1024)),
            network.clone(),
            stats.clone(),
            local_votes.clone(),
            Duration::from_millis(10),
        ));
        (generator, network, local_votes, stats)
    }

    fn hashes(n: u64) -> Vec<BlockHash> {
        (1..=n).map(BlockHash::from).collect()
    }

    #[test]
    fn no_representatives_no_votes() {
        let (generator, ..) = generator();
        assert!(generator.generate(&hashes(3)).is_empty());
    }

    #[test]
    fn splits_hashes_at_the_ack_limit() {
        let (generator, _, _, stats) = generator();
        generator.add_representative(keypair_from_seed(&[1u8; 32]));
        let votes = generator.generate(&hashes(13));
        assert_eq!(votes.len(), 2);
        assert_eq!(votes[0].hashes().count(), 12);
        assert_eq!(votes[1].hashes().count(), 1);
        assert!(votes[1].sequence > votes[0].sequence);
        assert!(votes.iter().all(|v| v.validate()));
        assert_eq!(
            stats.count(StatType::VoteGenerator, DetailType::GeneratorVotes, Direction::Out),
            2
        );
    }

    #[test]
    fn sequences_start_from_the_clock() {
        let (generator, ..) = generator();
        generator.add_representative(keypair_from_seed(&[1u8; 32]));
        let before = Timestamp::now().as_millis();
        let first = generator.generate(&hashes(1));
        assert!(first[0].sequence >= before);

        // A restarted generator signs with a higher sequence than before.
        let (restarted, ..) = self::generator();
        restarted.add_representative(keypair_from_seed(&[1u8; 32]));
        let second = restarted.generate(&hashes(1));
        assert!(second[0].sequence >= first[0].sequence);
    }

    #[test]
    fn same_millisecond_still_counts_up() {
        let mut rep = LocalRep {
            keys: keypair_from_seed(&[1u8; 32]),
            sequence: 0,
        };
        let now = Timestamp::new(1_000);
        assert_eq!(rep.next_sequence(now), 1_000);
        assert_eq!(rep.next_sequence(now), 1_001);
        assert_eq!(rep.next_sequence(Timestamp::new(5_000)), 5_000);
    }

    #[test]
    fn one_vote_per_representative() {
        let (generator, ..) = generator();
        generator.add_representative(keypair_from_seed(&[1u8; 32]));
        generator.add_representative(keypair_from_seed(&[2u8; 32]));
        generator.add_representative(keypair_from_seed(&[2u8; 32]));
        assert_eq!(generator.representatives().len(), 2);
        assert_eq!(generator.generate(&hashes(1)).len(), 2);
    }

    #[test]
    fn flush_floods_and_posts_local_votes() {
        let (generator, network, local_votes, _) = generator();
        generator.add_representative(keypair_from_seed(&[1u8; 32]));
        generator.add(BlockHash::from(1));
        generator.add(BlockHash::from(1));
        generator.add(BlockHash::from(2));
        assert_eq!(generator.queued(), 2);

        generator.flush();
        assert_eq!(generator.queued(), 0);
        assert_eq!(network.flooded_votes().len(), 1);
        let local = local_votes.drain();
        assert_eq!(local.len(), 1);
        assert_eq!(local[0].hashes().count(), 2);
    }

    #[test]
    fn worker_broadcasts_queued_hashes() {
        let (generator, network, local_votes, _) = generator();
        generator.add_representative(keypair_from_seed(&[1u8; 32]));
        generator.start().unwrap();
        generator.add(BlockHash::from(9));
        let vote = local_votes.next_blocking().unwrap();
        assert_eq!(vote.hashes().collect::<Vec<_>>(), vec![BlockHash::from(9)]);
        generator.stop();
        assert_eq!(network.flooded_votes().len(), 1);
    }
}
