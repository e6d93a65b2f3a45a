//! Turns peers' confirmation requests into votes.
//!
//! Requests are pooled per endpoint for a short while so one peer asking for
//! many hashes in quick succession gets a few large votes rather than many
//! small ones. A pool is answered once its deadline passes:
//!
//! - each arrival pushes the deadline to `now + small_delay`,
//! - but never past `start + max_delay`.
//!
//! The number of distinct pools is capped. Requests for a new endpoint beyond
//! the cap are dropped.

use crate::active_elections::ActiveElections;
use crate::config::RequestAggregatorConfig;
use crate::vote_generator::VoteGenerator;
use crate::votes_cache::VotesCache;
use orv_ledger::Ledger;
use orv_messages::{Channel, Message, Vote};
use orv_types::{Block, BlockHash, Root};
use orv_utils::{DetailType, Direction, StatType, Stats};
use std::collections::{HashMap, HashSet};
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

struct ChannelPool {
    hashes_roots: Vec<(BlockHash, Root)>,
    queued: HashSet<(BlockHash, Root)>,
    /// Replaced on every add, which keeps the newest channel alive until the
    /// pool is answered.
    channel: Arc<dyn Channel>,
    start: Instant,
    deadline: Instant,
}

impl ChannelPool {
    /// Append pairs not already queued, keeping arrival order.
    fn merge(&mut self, new: &[(BlockHash, Root)]) {
        for pair in new {
            if self.queued.insert(*pair) {
                self.hashes_roots.push(*pair);
            }
        }
    }
}

#[derive(Default)]
struct AggregatorState {
    pools: HashMap<SocketAddr, ChannelPool>,
    stopped: bool,
}

pub struct RequestAggregator {
    config: RequestAggregatorConfig,
    max_delay: Duration,
    small_delay: Duration,
    ledger: Arc<Ledger>,
    active: Arc<ActiveElections>,
    generator: Arc<VoteGenerator>,
    votes_cache: Arc<VotesCache>,
    stats: Arc<Stats>,
    state: Mutex<AggregatorState>,
    condition: Condvar,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl RequestAggregator {
    pub fn new(
        config: RequestAggregatorConfig,
        ledger: Arc<Ledger>,
        active: Arc<ActiveElections>,
        generator: Arc<VoteGenerator>,
        votes_cache: Arc<VotesCache>,
        stats: Arc<Stats>,
    ) -> Self {
        let network = ledger.params().network;
        Self {
            config,
            max_delay: RequestAggregatorConfig::max_delay(network),
            small_delay: RequestAggregatorConfig::small_delay(network),
            ledger,
            active,
            generator,
            votes_cache,
            stats,
            state: Mutex::new(AggregatorState::default()),
            condition: Condvar::new(),
            threads: Mutex::new(Vec::new()),
        }
    }

    /// Queue `hashes_roots` for the channel's endpoint. Returns `false` if the
    /// request was dropped.
    pub fn add(&self, channel: Arc<dyn Channel>, hashes_roots: &[(BlockHash, Root)]) -> bool {
        self.add_at(channel, hashes_roots, Instant::now())
    }

    pub fn add_at(
        &self,
        channel: Arc<dyn Channel>,
        hashes_roots: &[(BlockHash, Root)],
        now: Instant,
    ) -> bool {
        let endpoint = channel.endpoint();
        let mut state = self.state.lock().unwrap();
        let accepted = if state.stopped {
            false
        } else if let Some(pool) = state.pools.get_mut(&endpoint) {
            pool.channel = channel;
            pool.deadline = (pool.start + self.max_delay).min(now + self.small_delay);
            pool.merge(hashes_roots);
            true
        } else if state.pools.len() < self.config.max_queued_requests {
            let mut pool = ChannelPool {
                hashes_roots: Vec::with_capacity(hashes_roots.len()),
                queued: HashSet::with_capacity(hashes_roots.len()),
                channel,
                start: now,
                deadline: now + self.small_delay,
            };
            pool.merge(hashes_roots);
            state.pools.insert(endpoint, pool);
            true
        } else {
            false
        };
        drop(state);

        if accepted {
            self.stats
                .inc(StatType::Aggregator, DetailType::AggregatorAccepted);
            self.condition.notify_all();
        } else {
            self.stats
                .inc(StatType::Aggregator, DetailType::AggregatorDropped);
        }
        accepted
    }

    /// Pools waiting to be answered.
    pub fn size(&self) -> usize {
        self.state.lock().unwrap().pools.len()
    }

    pub fn empty(&self) -> bool {
        self.size() == 0
    }

    /// Answer every pool whose deadline has passed. Returns how many were
    /// answered.
    pub fn process_ready(&self, now: Instant) -> usize {
        let ready: Vec<ChannelPool> = {
            let mut state = self.state.lock().unwrap();
            let endpoints: Vec<SocketAddr> = state
                .pools
                .iter()
                .filter(|(_, pool)| pool.deadline <= now)
                .map(|(endpoint, _)| *endpoint)
                .collect();
            endpoints
                .iter()
                .filter_map(|endpoint| state.pools.remove(endpoint))
                .collect()
        };
        let count = ready.len();
        for pool in ready {
            self.reply(pool);
        }
        count
    }

    /// Answer every pool now, regardless of deadlines.
    pub fn flush(&self) -> usize {
        let pools: Vec<ChannelPool> = {
            let mut state = self.state.lock().unwrap();
            state.pools.drain().map(|(_, pool)| pool).collect()
        };
        let count = pools.len();
        for pool in pools {
            self.reply(pool);
        }
        count
    }

    fn reply(&self, pool: ChannelPool) {
        let channel = pool.channel;
        trace!(endpoint = %channel.endpoint(), requests = pool.hashes_roots.len(), "answering pool");
        let (to_generate, cached_votes) = self.aggregate(&pool.hashes_roots, channel.as_ref());

        if !to_generate.is_empty() {
            let votes = self.generator.generate(&to_generate);
            self.stats.add_dir(
                StatType::Requests,
                DetailType::RequestsGeneratedHashes,
                Direction::In,
                to_generate.len() as u64,
            );
            self.stats.add_dir(
                StatType::Requests,
                DetailType::RequestsGeneratedVotes,
                Direction::In,
                votes.len() as u64,
            );
            for vote in votes {
                channel.send(&Message::confirm_ack(vote));
            }
        }

        self.stats.add_dir(
            StatType::Requests,
            DetailType::RequestsCachedVotes,
            Direction::In,
            cached_votes.len() as u64,
        );
        for vote in cached_votes {
            channel.send(&Message::confirm_ack(vote));
        }
    }

    /// Sort requests into hashes to vote on now and cached votes to resend.
    fn aggregate(
        &self,
        hashes_roots: &[(BlockHash, Root)],
        channel: &dyn Channel,
    ) -> (Vec<BlockHash>, Vec<Arc<Vote>>) {
        let can_generate = self.generator.has_representatives();
        let mut to_generate = Vec::new();
        let mut generate_seen = HashSet::new();
        let mut cached_votes: Vec<Arc<Vote>> = Vec::new();
        let mut cached_seen: HashSet<(orv_types::Account, u64)> = HashSet::new();
        let mut cached_hashes = 0u64;
        let mut cannot_vote = 0u64;
        let mut unknown = 0u64;

        for (hash, root) in hashes_roots {
            let Some(saved) = self.ledger.block_or_successor(hash, root) else {
                unknown += 1;
                continue;
            };
            let block_hash = saved.hash();
            if block_hash != *hash {
                // Tell the peer about the block we have for this root.
                channel.send(&Message::publish(Arc::new(saved.block().clone())));
            }

            if can_generate && self.votable(saved.block(), &block_hash) {
                if generate_seen.insert(block_hash) {
                    to_generate.push(block_hash);
                }
                continue;
            }

            let votes = self.votes_cache.find(&block_hash);
            if votes.is_empty() {
                cannot_vote += 1;
                continue;
            }
            cached_hashes += 1;
            for vote in votes {
                if cached_seen.insert((vote.account, vote.sequence)) {
                    cached_votes.push(vote);
                }
            }
        }

        self.stats.add_dir(
            StatType::Requests,
            DetailType::RequestsUnknown,
            Direction::In,
            unknown,
        );
        self.stats.add_dir(
            StatType::Requests,
            DetailType::RequestsCachedHashes,
            Direction::In,
            cached_hashes,
        );
        self.stats.add_dir(
            StatType::Requests,
            DetailType::RequestsCannotVote,
            Direction::In,
            cannot_vote,
        );
        (to_generate, cached_votes)
    }

    /// A block is voted on when its dependencies are cemented and no running
    /// election for its root favours another block.
    fn votable(&self, block: &Block, hash: &BlockHash) -> bool {
        if !self.ledger.dependents_confirmed(block) {
            return false;
        }
        match self.active.winner(&block.qualified_root()) {
            Some(winner) => winner.hash() == *hash,
            None => true,
        }
    }

    pub fn start(self: &Arc<Self>) -> io::Result<()> {
        let mut threads = self.threads.lock().unwrap();
        for _ in 0..self.config.threads {
            let aggregator = Arc::clone(self);
            threads.push(
                thread::Builder::new()
                    .name("Req aggregator".to_string())
                    .spawn(move || aggregator.run())?,
            );
        }
        Ok(())
    }

    fn run(&self) {
        debug!("request aggregator worker started");
        let mut state = self.state.lock().unwrap();
        while !state.stopped {
            let now = Instant::now();
            let ready = state
                .pools
                .iter()
                .filter(|(_, pool)| pool.deadline <= now)
                .min_by_key(|(_, pool)| pool.deadline)
                .map(|(endpoint, _)| *endpoint);
            if let Some(endpoint) = ready {
                if let Some(pool) = state.pools.remove(&endpoint) {
                    drop(state);
                    self.reply(pool);
                    state = self.state.lock().unwrap();
                }
                continue;
            }
            let wait = state
                .pools
                .values()
                .map(|pool| pool.deadline.saturating_duration_since(now))
                .min()
                .unwrap_or(self.small_delay);
            state = self.condition.wait_timeout(state, wait).unwrap().0;
        }
        debug!("request aggregator worker stopped");
    }

    pub fn stop(&self) {
        self.state.lock().unwrap().stopped = true;
        self.condition.notify_all();
        let threads: Vec<JoinHandle<()>> = self.threads.lock().unwrap().drain(..).collect();
        for handle in threads {
            let _ = handle.join();
        }
    }
}
