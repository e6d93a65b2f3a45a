//! The node struct: wires elections, voting, request aggregation and
//! cementing around one shared ledger.
//!
//! Components never call each other through back-pointers. Elections post
//! [`ElectionEvent`]s and locally generated votes into queues, and two node
//! threads drain them:
//!
//! ```text
//! ActiveElections ──ElectionEvent──> "Election events" ──> ConfirmedProcessor
//!       ^                                                          │
//!       │                                                          v
//!       │                                      ConfirmationHeightProcessor
//!       │                                      cemented observers  │
//!       └───────────── confirm_by_height / winners.remove <────────┘
//!
//! VoteGenerator ──local votes──> "Local votes" ──> ActiveElections::vote
//! ```

use std::io;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use orv_consensus::{
    ActiveElections, ConfirmationAction, ElectionEvent, ElectionServices, ElectionWinners,
    OnlineReps, PublishOutcome, RequestAggregator, VoteCode, VoteGenerator, VotesCache,
};
use orv_ledger::Ledger;
use orv_messages::{Channel, Network, Vote};
use orv_store::{Store, WriteQueue};
use orv_types::{Block, BlockHash, KeyPair, NetworkParams, Root};
use orv_utils::{EventQueue, Stats};

use crate::cementing::ConfirmationHeightProcessor;
use crate::config::NodeConfig;
use crate::confirmed::ConfirmedProcessor;
use crate::error::NodeError;
use crate::metrics::{NodeGauges, NodeMetrics};

/// Window over which representatives count as online after their last vote.
const ONLINE_WEIGHT_WINDOW: Duration = Duration::from_secs(5 * 60);

/// A consensus node over a caller-supplied store and network.
pub struct ConsensusNode {
    pub config: NodeConfig,
    pub ledger: Arc<Ledger>,
    pub stats: Arc<Stats>,
    pub write_queue: Arc<WriteQueue>,
    pub winners: Arc<ElectionWinners>,
    pub votes_cache: Arc<VotesCache>,
    pub vote_generator: Arc<VoteGenerator>,
    pub active: Arc<ActiveElections>,
    pub aggregator: Arc<RequestAggregator>,
    pub cementing: Arc<ConfirmationHeightProcessor>,
    /// Confirmed winners on their way to cementing.
    pub confirmed: Arc<ConfirmedProcessor>,
    pub metrics: NodeMetrics,
    /// Blocks elections want re-processed, for whoever drives the ledger.
    pub forced_blocks: Arc<EventQueue<Arc<Block>>>,
    events: Arc<EventQueue<ElectionEvent>>,
    local_votes: Arc<EventQueue<Arc<Vote>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl ConsensusNode {
    pub fn new(
        config: NodeConfig,
        store: Arc<dyn Store>,
        network: Arc<dyn Network>,
    ) -> Result<Self, NodeError> {
        config.validate()?;
        let ledger = Arc::new(Ledger::new(store, NetworkParams::new(config.network)));
        let stats = Arc::new(Stats::new());
        let write_queue = Arc::new(WriteQueue::new(false));
        let events = Arc::new(EventQueue::new());
        let local_votes = Arc::new(EventQueue::new());
        let forced_blocks = Arc::new(EventQueue::new());

        let votes_cache = Arc::new(VotesCache::new(config.voting.votes_cache_max));
        let vote_generator = Arc::new(VoteGenerator::new(
            votes_cache.clone(),
            network.clone(),
            stats.clone(),
            local_votes.clone(),
            config.voting.vote_generator_delay(),
        ));
        let online_reps = Arc::new(OnlineReps::new(
            ledger.clone(),
            config.elections.online_weight_minimum.number(),
            ONLINE_WEIGHT_WINDOW,
        ));
        let winners = Arc::new(ElectionWinners::new());
        let services = Arc::new(ElectionServices {
            ledger: ledger.clone(),
            online_reps,
            network,
            stats: stats.clone(),
            winners: winners.clone(),
            votes_cache: votes_cache.clone(),
            vote_generator: vote_generator.clone(),
            block_processor: forced_blocks.clone(),
            events: events.clone(),
            config: config.elections.clone(),
            voting: config.voting.clone(),
        });
        let active = Arc::new(ActiveElections::new(services));
        let aggregator = Arc::new(RequestAggregator::new(
            config.request_aggregator.clone(),
            ledger.clone(),
            active.clone(),
            vote_generator.clone(),
            votes_cache.clone(),
            stats.clone(),
        ));
        let cementing = Arc::new(ConfirmationHeightProcessor::new(
            ledger.clone(),
            write_queue.clone(),
            stats.clone(),
            &config.cementing,
        ));
        let confirmed = Arc::new(ConfirmedProcessor::new(
            ledger.clone(),
            cementing.clone(),
            winners.clone(),
            stats.clone(),
        ));

        {
            let active = active.clone();
            let winners = winners.clone();
            cementing.add_cemented_observer(Box::new(move |block| {
                let hash = block.hash();
                active.confirm_by_height(&hash, Instant::now());
                winners.remove(&hash);
            }));
        }
        {
            let winners = winners.clone();
            cementing.add_already_cemented_observer(Box::new(move |hash| {
                winners.remove(hash);
            }));
        }

        Ok(Self {
            metrics: NodeMetrics::new()?,
            config,
            ledger,
            stats,
            write_queue,
            winners,
            votes_cache,
            vote_generator,
            active,
            aggregator,
            cementing,
            confirmed,
            forced_blocks,
            events,
            local_votes,
            threads: Mutex::new(Vec::new()),
        })
    }

    /// Vote with `keys` when elections ask for it.
    pub fn add_representative(&self, keys: KeyPair) {
        info!(account = %keys.account(), "voting as representative");
        self.vote_generator.add_representative(keys);
    }

    /// Route an incoming vote into the elections it covers.
    pub fn process_vote(&self, vote: &Vote) -> Result<VoteCode, NodeError> {
        if !vote.validate() {
            return Err(NodeError::InvalidVote(vote.account));
        }
        Ok(self.active.vote(vote, Instant::now()))
    }

    /// Answer a peer's confirmation request. `false` if it was dropped.
    pub fn process_confirm_req(
        &self,
        channel: Arc<dyn Channel>,
        hashes_roots: &[(BlockHash, Root)],
    ) -> bool {
        self.aggregator.add(channel, hashes_roots)
    }

    /// Offer a block to the election for its root, if any.
    pub fn process_publish(&self, block: Arc<Block>) -> Option<PublishOutcome> {
        self.active.publish(block, Instant::now())
    }

    /// Start an election for `block` right away, skipping the passive phase.
    pub fn block_confirm(
        &self,
        block: Arc<Block>,
        action: Option<ConfirmationAction>,
    ) -> Result<(), NodeError> {
        self.active.insert(block, action, true, Instant::now())?;
        Ok(())
    }

    pub fn start(&self) -> Result<(), NodeError> {
        info!(network = self.config.network.as_str(), "starting node");
        self.cementing.start()?;
        self.confirmed.start()?;
        self.vote_generator.start()?;
        self.active.start()?;
        self.aggregator.start()?;

        let mut threads = self.threads.lock().unwrap();
        threads.push(self.spawn_event_dispatcher()?);
        threads.push(self.spawn_local_vote_feed()?);
        Ok(())
    }

    fn spawn_event_dispatcher(&self) -> io::Result<JoinHandle<()>> {
        let events = self.events.clone();
        let confirmed = self.confirmed.clone();
        thread::Builder::new()
            .name("Election events".to_string())
            .spawn(move || {
                while let Some(event) = events.next_blocking() {
                    dispatch_event(&confirmed, event);
                }
            })
    }

    fn spawn_local_vote_feed(&self) -> io::Result<JoinHandle<()>> {
        let local_votes = self.local_votes.clone();
        let active = self.active.clone();
        thread::Builder::new()
            .name("Local votes".to_string())
            .spawn(move || {
                while let Some(vote) = local_votes.next_blocking() {
                    active.vote(&vote, Instant::now());
                }
            })
    }

    /// Hand every queued event to its consumer on the calling thread, after
    /// retrying deferred confirmations once. Used when the node is driven
    /// without its worker threads.
    pub fn dispatch_pending(&self) -> usize {
        let mut count = self.confirmed.retry_all();
        loop {
            let events = self.events.drain();
            let votes = self.local_votes.drain();
            if events.is_empty() && votes.is_empty() {
                return count;
            }
            count += events.len() + votes.len();
            for event in events {
                dispatch_event(&self.confirmed, event);
            }
            for vote in votes {
                self.active.vote(&vote, Instant::now());
            }
        }
    }

    pub fn update_metrics(&self) {
        self.metrics.record_stats(&self.stats);
        self.metrics.record_gauges(&NodeGauges {
            active_elections: self.active.size(),
            cemented_count: self.ledger.cemented_count(),
            block_count: self.ledger.block_count(),
            aggregator_pools: self.aggregator.size(),
            cementing_backlog: self.cementing.awaiting_processing_size(),
        });
    }

    pub fn stop(&self) {
        info!("stopping node");
        self.aggregator.stop();
        self.active.stop();
        self.vote_generator.stop();
        self.events.stop();
        self.local_votes.stop();
        for handle in self.threads.lock().unwrap().drain(..) {
            let _ = handle.join();
        }
        self.confirmed.stop();
        self.cementing.stop();
        self.forced_blocks.stop();
    }
}

fn dispatch_event(confirmed: &ConfirmedProcessor, event: ElectionEvent) {
    match event {
        ElectionEvent::Confirmed { status, action } => {
            confirmed.process(status.winner.hash(), Instant::now());
            if let Some(action) = action {
                action(&status.winner);
            }
        }
        ElectionEvent::Stopped(hash) => debug!(%hash, "election stopped"),
    }
}
