//! Typed statistics counters.
//!
//! Every counter is addressed by a `(StatType, DetailType, Direction)` triple.
//! Counters are created lazily on first use and updated with relaxed atomics,
//! so the hot path only takes a shared read lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StatType {
    Election,
    Vote,
    Requests,
    Aggregator,
    ConfirmationHeight,
    VoteGenerator,
    Solicitor,
}

impl StatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Election => "election",
            Self::Vote => "vote",
            Self::Requests => "requests",
            Self::Aggregator => "aggregator",
            Self::ConfirmationHeight => "confirmation_height",
            Self::VoteGenerator => "vote_generator",
            Self::Solicitor => "solicitor",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DetailType {
    All,

    // election
    ElectionStart,
    ElectionConfirmed,
    ElectionExpired,
    ElectionDrop,
    ElectionBlockConflict,
    ElectionWinnerChanged,
    ElectionDifficultyUpdate,
    ElectionDependencyActivated,
    ElectionPublishRejected,

    // vote
    VoteNew,
    VoteReplay,
    VoteIndeterminate,
    VoteIgnored,
    VoteCooldown,
    VoteCached,

    // requests
    RequestsUnknown,
    RequestsGeneratedHashes,
    RequestsGeneratedVotes,
    RequestsCachedHashes,
    RequestsCachedVotes,
    RequestsCannotVote,

    // aggregator
    AggregatorAccepted,
    AggregatorDropped,

    // confirmation height
    BlocksConfirmed,
    BlocksConfirmedBounded,
    InvalidBlock,
    AlreadyCemented,
    ConfirmedDeferred,
    ConfirmedDropped,

    // vote generator
    GeneratorBroadcasts,
    GeneratorVotes,

    // solicitor
    ConfirmReq,
    Publish,
}

impl DetailType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::ElectionStart => "election_start",
            Self::ElectionConfirmed => "election_confirmed",
            Self::ElectionExpired => "election_expired",
            Self::ElectionDrop => "election_drop",
            Self::ElectionBlockConflict => "election_block_conflict",
            Self::ElectionWinnerChanged => "election_winner_changed",
            Self::ElectionDifficultyUpdate => "election_difficulty_update",
            Self::ElectionDependencyActivated => "election_dependency_activated",
            Self::ElectionPublishRejected => "election_publish_rejected",
            Self::VoteNew => "vote_new",
            Self::VoteReplay => "vote_replay",
            Self::VoteIndeterminate => "vote_indeterminate",
            Self::VoteIgnored => "vote_ignored",
            Self::VoteCooldown => "vote_cooldown",
            Self::VoteCached => "vote_cached",
            Self::RequestsUnknown => "requests_unknown",
            Self::RequestsGeneratedHashes => "requests_generated_hashes",
            Self::RequestsGeneratedVotes => "requests_generated_votes",
            Self::RequestsCachedHashes => "requests_cached_hashes",
            Self::RequestsCachedVotes => "requests_cached_votes",
            Self::RequestsCannotVote => "requests_cannot_vote",
            Self::AggregatorAccepted => "aggregator_accepted",
            Self::AggregatorDropped => "aggregator_dropped",
            Self::BlocksConfirmed => "blocks_confirmed",
            Self::BlocksConfirmedBounded => "blocks_confirmed_bounded",
            Self::InvalidBlock => "invalid_block",
            Self::AlreadyCemented => "already_cemented",
            Self::ConfirmedDeferred => "confirmed_deferred",
            Self::ConfirmedDropped => "confirmed_dropped",
            Self::GeneratorBroadcasts => "generator_broadcasts",
            Self::GeneratorVotes => "generator_votes",
            Self::ConfirmReq => "confirm_req",
            Self::Publish => "publish",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::In => "in",
            Self::Out => "out",
        }
    }
}

type StatKey = (StatType, DetailType, Direction);

/// A thread-safe counter collection.
#[derive(Default)]
pub struct Stats {
    counters: RwLock<HashMap<StatKey, AtomicU64>>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self, stat_type: StatType, detail: DetailType) {
        self.add_dir(stat_type, detail, Direction::In, 1);
    }

    pub fn inc_dir(&self, stat_type: StatType, detail: DetailType, dir: Direction) {
        self.add_dir(stat_type, detail, dir, 1);
    }

    pub fn add(&self, stat_type: StatType, detail: DetailType, value: u64) {
        self.add_dir(stat_type, detail, Direction::In, value);
    }

    /// Also bumps the `All` detail of the same type and direction.
    pub fn add_dir(&self, stat_type: StatType, detail: DetailType, dir: Direction, value: u64) {
        if value == 0 {
            return;
        }
        self.bump((stat_type, detail, dir), value);
        if detail != DetailType::All {
            self.bump((stat_type, DetailType::All, dir), value);
        }
    }

    fn bump(&self, key: StatKey, value: u64) {
        {
            let counters = self.counters.read().unwrap();
            if let Some(counter) = counters.get(&key) {
                counter.fetch_add(value, Ordering::Relaxed);
                return;
            }
        }
        let mut counters = self.counters.write().unwrap();
        counters
            .entry(key)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(value, Ordering::Relaxed);
    }

    pub fn count(&self, stat_type: StatType, detail: DetailType, dir: Direction) -> u64 {
        self.counters
            .read()
            .unwrap()
            .get(&(stat_type, detail, dir))
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// All non-zero counters, sorted by key.
    pub fn snapshot(&self) -> Vec<(StatType, DetailType, Direction, u64)> {
        let counters = self.counters.read().unwrap();
        let mut entries: Vec<_> = counters
            .iter()
            .map(|(&(t, d, dir), v)| (t, d, dir, v.load(Ordering::Relaxed)))
            .collect();
        entries.sort();
        entries
    }

    pub fn clear(&self) {
        self.counters.write().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let stats = Stats::new();
        assert_eq!(stats.count(StatType::Vote, DetailType::VoteNew, Direction::In), 0);
    }

    #[test]
    fn add_updates_detail_and_all() {
        let stats = Stats::new();
        stats.inc(StatType::Requests, DetailType::RequestsUnknown);
        stats.add(StatType::Requests, DetailType::RequestsCannotVote, 3);
        assert_eq!(
            stats.count(StatType::Requests, DetailType::RequestsUnknown, Direction::In),
            1
        );
        assert_eq!(stats.count(StatType::Requests, DetailType::All, Direction::In), 4);
    }

    #[test]
    fn directions_are_separate() {
        let stats = Stats::new();
        stats.inc_dir(StatType::Solicitor, DetailType::ConfirmReq, Direction::Out);
        assert_eq!(stats.count(StatType::Solicitor, DetailType::ConfirmReq, Direction::In), 0);
        assert_eq!(stats.count(StatType::Solicitor, DetailType::ConfirmReq, Direction::Out), 1);
    }

    #[test]
    fn snapshot_lists_touched_counters() {
        let stats = Stats::new();
        stats.inc(StatType::Election, DetailType::ElectionStart);
        let snapshot = stats.snapshot();
        assert!(snapshot.contains(&(StatType::Election, DetailType::ElectionStart, Direction::In, 1)));
        stats.clear();
        assert!(stats.snapshot().is_empty());
    }
}
