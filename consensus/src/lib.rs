//! Consensus: resolving forks with open representative voting.
//!
//! Every account delegates its balance to a representative. When blocks
//! compete for the same chain position an [`Election`] collects
//! representative votes, weighted by delegated balance, and confirms the
//! variant that leads by the quorum delta of online stake.
//!
//! ## Module overview
//!
//! - [`election`]: the per-root state machine, tally and quorum rules.
//! - [`active_elections`]: the container that owns elections and drives them.
//! - [`confirmation_solicitor`]: batches rebroadcasts and confirmation requests.
//! - [`vote_generator`]: signs local votes and broadcasts them.
//! - [`request_aggregator`]: answers peers' confirmation requests.
//! - [`online_reps`]: online stake and quorum delta.

pub mod active_elections;
pub mod block_processor;
pub mod config;
pub mod confirmation_solicitor;
pub mod election;
pub mod election_winners;
pub mod error;
pub mod inactive_votes;
pub mod online_reps;
pub mod recently_confirmed;
pub mod request_aggregator;
pub mod vote_generator;
pub mod vote_info;
pub mod votes_cache;

#[cfg(test)]
mod test_support;

pub use active_elections::{ActiveElections, VoteCode};
pub use block_processor::BlockProcessor;
pub use config::{ElectionConfig, RequestAggregatorConfig, VotingConfig};
pub use confirmation_solicitor::ConfirmationSolicitor;
pub use election::{
    vote_cooldown, ConfirmationAction, Election, ElectionEvent, ElectionServices, ElectionState,
    ElectionStatus, ElectionStatusType, PublishOutcome,
};
pub use election_winners::ElectionWinners;
pub use error::ConsensusError;
pub use inactive_votes::InactiveVotesCache;
pub use online_reps::OnlineReps;
pub use recently_confirmed::RecentlyConfirmed;
pub use request_aggregator::RequestAggregator;
pub use vote_generator::VoteGenerator;
pub use vote_info::{VoteInfo, VoteResult};
pub use votes_cache::VotesCache;
