//! Fixtures shared by the unit tests of this crate.

use crate::config::{ElectionConfig, VotingConfig};
use crate::confirmation_solicitor::ConfirmationSolicitor;
use crate::election::{ElectionEvent, ElectionServices};
use crate::election_winners::ElectionWinners;
use crate::online_reps::OnlineReps;
use crate::vote_generator::VoteGenerator;
use crate::votes_cache::VotesCache;
use orv_ledger::Ledger;
use orv_messages::{Network, RepresentativeChannel, Vote};
use orv_nullables::{NullChannel, NullNetwork, NullStore};
use orv_types::{Account, Amount, Block, BlockHash, NetworkId, NetworkParams, SavedBlock, StateBlock};
use orv_utils::{EventQueue, Stats};
use std::sync::Arc;
use std::time::Duration;

pub(crate) struct TestContext {
    pub store: Arc<NullStore>,
    pub ledger: Arc<Ledger>,
    pub network: Arc<NullNetwork>,
    pub stats: Arc<Stats>,
    pub events: Arc<EventQueue<ElectionEvent>>,
    pub forced: Arc<EventQueue<Arc<Block>>>,
    pub local_votes: Arc<EventQueue<Arc<Vote>>>,
    pub services: Arc<ElectionServices>,
}

impl TestContext {
    /// Test network, online weight minimum of 1000 raw and 50% quorum.
    pub fn new() -> Self {
        Self::with_network(NetworkId::Test)
    }

    pub fn live() -> Self {
        Self::with_network(NetworkId::Live)
    }

    fn with_network(network_id: NetworkId) -> Self {
        let config = ElectionConfig {
            online_weight_minimum: Amount::raw(1000),
            ..Default::default()
        };
        let voting = VotingConfig::default();
        let store = Arc::new(NullStore::new());
        let ledger = Arc::new(Ledger::new(store.clone(), NetworkParams::new(network_id)));
        let network = Arc::new(NullNetwork::new());
        let stats = Arc::new(Stats::new());
        let events = Arc::new(EventQueue::new());
        let forced = Arc::new(EventQueue::new());
        let local_votes = Arc::new(EventQueue::new());
        let votes_cache = Arc::new(VotesCache::new(voting.votes_cache_max));
        let vote_generator = Arc::new(VoteGenerator::new(
            votes_cache.clone(),
            network.clone(),
            stats.clone(),
            local_votes.clone(),
            voting.vote_generator_delay(),
        ));
        let online_reps = Arc::new(OnlineReps::new(
            ledger.clone(),
            config.online_weight_minimum.number(),
            Duration::from_secs(300),
        ));
        let services = Arc::new(ElectionServices {
            ledger: ledger.clone(),
            online_reps,
            network: network.clone(),
            stats: stats.clone(),
            winners: Arc::new(ElectionWinners::new()),
            votes_cache,
            vote_generator,
            block_processor: forced.clone(),
            events: events.clone(),
            config,
            voting,
        });
        Self {
            store,
            ledger,
            network,
            stats,
            events,
            forced,
            local_votes,
            services,
        }
    }

    /// Register `rep` with the network on a fresh channel.
    pub fn solicitor_with_rep(&self, rep: Account) -> (Arc<NullChannel>, ConfirmationSolicitor) {
        let channel = Arc::new(NullChannel::with_port(7075));
        self.network.add_representative(rep, channel.clone());
        let solicitor = ConfirmationSolicitor::new(
            self.network.clone(),
            self.stats.clone(),
            self.ledger.is_test_network(),
        );
        (channel, solicitor)
    }

    pub fn network_reps(&self) -> Vec<RepresentativeChannel> {
        self.network.representatives()
    }

    /// A block with a root of its own, not stored in the ledger.
    pub fn chain_block(&self, n: u64) -> Arc<Block> {
        Arc::new(Block::State(StateBlock {
            account: Account::from(n),
            previous: BlockHash::from(n),
            representative: Account::from(n),
            balance: Amount::raw(1),
            link: BlockHash::ZERO,
        }))
    }
}

/// `n` variants competing for the same root.
pub(crate) fn fork(n: usize) -> Vec<Arc<Block>> {
    (0..n)
        .map(|i| {
            Arc::new(Block::State(StateBlock {
                account: Account::from(100),
                previous: BlockHash::from(100),
                representative: Account::from(100),
                balance: Amount::raw(i as u128 + 1),
                link: BlockHash::ZERO,
            }))
        })
        .collect()
}

pub(crate) fn arc(block: &SavedBlock) -> Arc<Block> {
    Arc::new(block.block().clone())
}
