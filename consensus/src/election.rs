//! A single election: the contest between blocks competing for one root.
//!
//! An election owns every variant published for its root, the latest vote of
//! each representative and a small state machine driven by the request loop:
//!
//! ```text
//! idle ──> passive ──> active ──> broadcasting ──> backtracking
//!             │           │            │                │
//!             └───────────┴─────┬──────┴────────────────┘
//!                               v
//!                  confirmed / expired_unconfirmed
//!                      │
//!                      v
//!               expired_confirmed
//! ```
//!
//! Any non-terminal state may also fall back to `idle`. Elections never touch
//! the container that owns them. Side effects the container must apply (index
//! updates, dependency activation) are queued as [`ElectionEffect`]s, and
//! everything meant for the rest of the node goes out as an [`ElectionEvent`].

use crate::block_processor::BlockProcessor;
use crate::config::{ElectionConfig, VotingConfig};
use crate::confirmation_solicitor::ConfirmationSolicitor;
use crate::election_winners::ElectionWinners;
use crate::online_reps::OnlineReps;
use crate::vote_generator::VoteGenerator;
use crate::vote_info::{VoteInfo, VoteResult};
use crate::votes_cache::VotesCache;
use orv_ledger::Ledger;
use orv_messages::Network;
use orv_types::{Account, Block, BlockHash, QualifiedRoot, Timestamp};
use orv_utils::{DetailType, EventQueue, StatType, Stats};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Passive elections turn active after this many base latencies.
const PASSIVE_DURATION_FACTOR: u32 = 5;
/// Confirmation requests go out at most once per this many base latencies.
const CONFIRM_REQ_FACTOR: u32 = 5;
/// Active elections start broadcasting after more requests than this.
const ACTIVE_REQUEST_COUNT_MIN: u32 = 2;
/// Broadcasting elections backtrack after this many base latencies.
const ACTIVE_BROADCASTING_DURATION_FACTOR: u32 = 15;
/// The winner is rebroadcast at most once per this many base latencies.
const BLOCK_BROADCAST_FACTOR: u32 = 15;
/// Unconfirmed elections are given up after this long.
const EXPIRE_TIME: Duration = Duration::from_secs(5 * 60);
/// Past this many variants a new one needs 10% of online stake behind it.
const MAX_BLOCKS: usize = 10;

/// Runs once the election confirms, with the winning block.
pub type ConfirmationAction = Arc<dyn Fn(&Arc<Block>) + Send + Sync>;

/// Notifications for the rest of the node.
pub enum ElectionEvent {
    /// An election confirmed its winner. Posted once per winner.
    Confirmed {
        status: ElectionStatus,
        action: Option<ConfirmationAction>,
    },
    /// A block lost its election, or its election expired unconfirmed.
    Stopped(BlockHash),
}

impl fmt::Debug for ElectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Confirmed { status, .. } => f
                .debug_struct("Confirmed")
                .field("winner", &status.winner.hash())
                .field("type", &status.status_type)
                .finish(),
            Self::Stopped(hash) => f.debug_tuple("Stopped").field(hash).finish(),
        }
    }
}

/// Everything an election reads or notifies. Shared by all elections.
pub struct ElectionServices {
    pub ledger: Arc<Ledger>,
    pub online_reps: Arc<OnlineReps>,
    pub network: Arc<dyn Network>,
    pub stats: Arc<Stats>,
    pub winners: Arc<ElectionWinners>,
    pub votes_cache: Arc<VotesCache>,
    pub vote_generator: Arc<VoteGenerator>,
    pub block_processor: Arc<dyn BlockProcessor>,
    pub events: Arc<EventQueue<ElectionEvent>>,
    pub config: ElectionConfig,
    pub voting: VotingConfig,
}

impl ElectionServices {
    pub fn base_latency(&self) -> Duration {
        self.ledger.params().base_latency()
    }

    fn can_vote(&self) -> bool {
        self.voting.enable_voting && self.vote_generator.has_representatives()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElectionState {
    Idle,
    Passive,
    Active,
    Broadcasting,
    Backtracking,
    Confirmed,
    ExpiredConfirmed,
    ExpiredUnconfirmed,
}

impl ElectionState {
    pub fn valid_change(self, to: ElectionState) -> bool {
        use ElectionState::*;
        match self {
            Idle => matches!(to, Passive | Active | ExpiredUnconfirmed),
            Passive => matches!(to, Idle | Active | Confirmed | ExpiredUnconfirmed),
            Active => matches!(to, Idle | Broadcasting | Confirmed | ExpiredUnconfirmed),
            Broadcasting => matches!(to, Idle | Backtracking | Confirmed | ExpiredUnconfirmed),
            Backtracking => matches!(to, Idle | Confirmed | ExpiredUnconfirmed),
            Confirmed => matches!(to, ExpiredConfirmed),
            ExpiredConfirmed | ExpiredUnconfirmed => false,
        }
    }

    pub fn is_confirmed(self) -> bool {
        matches!(self, Self::Confirmed | Self::ExpiredConfirmed)
    }

    pub fn is_expired(self) -> bool {
        matches!(self, Self::ExpiredConfirmed | Self::ExpiredUnconfirmed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Passive => "passive",
            Self::Active => "active",
            Self::Broadcasting => "broadcasting",
            Self::Backtracking => "backtracking",
            Self::Confirmed => "confirmed",
            Self::ExpiredConfirmed => "expired_confirmed",
            Self::ExpiredUnconfirmed => "expired_unconfirmed",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElectionStatusType {
    Ongoing,
    /// Confirmed by votes inside an active election.
    ActiveConfirmedQuorum,
    /// Confirmed because a descendant was cemented while the election ran.
    ActiveConfirmationHeight,
    /// Cemented without an election.
    InactiveConfirmationHeight,
    Stopped,
}

#[derive(Clone, Debug)]
pub struct ElectionStatus {
    pub winner: Arc<Block>,
    /// Weight behind the winner at the last tally.
    pub tally: u128,
    pub election_start: Timestamp,
    pub election_end: Timestamp,
    pub election_duration: Duration,
    pub confirmation_request_count: u32,
    pub block_count: u32,
    pub voter_count: u32,
    pub status_type: ElectionStatusType,
}

impl ElectionStatus {
    pub fn new(winner: Arc<Block>, status_type: ElectionStatusType) -> Self {
        let now = Timestamp::now();
        Self {
            winner,
            tally: 0,
            election_start: now,
            election_end: now,
            election_duration: Duration::ZERO,
            confirmation_request_count: 0,
            block_count: 0,
            voter_count: 0,
            status_type,
        }
    }
}

/// Outcome of offering a block to an election.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Confirmed already, or a spam variant.
    Rejected,
    /// A new variant.
    Inserted,
    /// An already known variant, refreshed.
    Replaced,
}

/// Work for the owning container, drained after every mutating call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElectionEffect {
    WinnerChanged { old: BlockHash, new: BlockHash },
    Confirmed(BlockHash),
    ActivateDependencies,
}

/// Cooldown between two accepted votes of a representative, tiered by its
/// share of online stake.
pub fn vote_cooldown(weight: u128, online_stake: u128) -> Duration {
    if weight < online_stake / 100 {
        Duration::from_secs(15)
    } else if weight < online_stake / 20 {
        Duration::from_secs(5)
    } else {
        Duration::from_secs(1)
    }
}

pub struct Election {
    root: QualifiedRoot,
    status: ElectionStatus,
    confirmation_action: Option<ConfirmationAction>,
    blocks: HashMap<BlockHash, Arc<Block>>,
    last_votes: HashMap<Account, VoteInfo>,
    last_tally: HashMap<BlockHash, u128>,
    /// Winners of other elections that build on this election's winner.
    dependent_blocks: HashSet<BlockHash>,
    state: ElectionState,
    state_start: Instant,
    election_start: Instant,
    last_req: Option<Instant>,
    last_block: Option<Instant>,
    confirmation_request_count: u32,
    multiplier: f64,
    adjusted_multiplier: f64,
    effects: Vec<ElectionEffect>,
    services: Arc<ElectionServices>,
}

impl Election {
    pub fn new(
        services: Arc<ElectionServices>,
        block: Arc<Block>,
        confirmation_action: Option<ConfirmationAction>,
        prioritized: bool,
        multiplier: f64,
        now: Instant,
    ) -> Self {
        let hash = block.hash();
        // Seed the tally so it always has an entry for the initial block.
        let mut last_votes = HashMap::new();
        last_votes.insert(
            services.ledger.params().not_an_account,
            VoteInfo::new(now, 0, hash),
        );
        let mut blocks = HashMap::new();
        blocks.insert(hash, Arc::clone(&block));

        let election = Self {
            root: block.qualified_root(),
            status: ElectionStatus::new(block, ElectionStatusType::Ongoing),
            confirmation_action,
            blocks,
            last_votes,
            last_tally: HashMap::new(),
            dependent_blocks: HashSet::new(),
            state: ElectionState::Idle,
            state_start: now,
            election_start: now,
            last_req: None,
            last_block: None,
            confirmation_request_count: 0,
            multiplier,
            adjusted_multiplier: multiplier,
            effects: Vec::new(),
            services,
        };
        if prioritized {
            election.generate_votes();
        }
        election
    }

    pub fn root(&self) -> &QualifiedRoot {
        &self.root
    }

    pub fn winner(&self) -> &Arc<Block> {
        &self.status.winner
    }

    pub fn status(&self) -> &ElectionStatus {
        &self.status
    }

    pub fn state(&self) -> ElectionState {
        self.state
    }

    pub fn is_confirmed(&self) -> bool {
        self.state.is_confirmed()
    }

    pub fn blocks(&self) -> &HashMap<BlockHash, Arc<Block>> {
        &self.blocks
    }

    pub fn contains(&self, hash: &BlockHash) -> bool {
        self.blocks.contains_key(hash)
    }

    pub fn last_votes(&self) -> &HashMap<Account, VoteInfo> {
        &self.last_votes
    }

    pub fn last_tally(&self) -> &HashMap<BlockHash, u128> {
        &self.last_tally
    }

    pub fn confirmation_request_count(&self) -> u32 {
        self.confirmation_request_count
    }

    pub fn dependent_blocks(&self) -> &HashSet<BlockHash> {
        &self.dependent_blocks
    }

    pub fn add_dependent(&mut self, hash: BlockHash) {
        self.dependent_blocks.insert(hash);
    }

    pub fn remove_dependent(&mut self, hash: &BlockHash) {
        self.dependent_blocks.remove(hash);
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    pub fn adjusted_multiplier(&self) -> f64 {
        self.adjusted_multiplier
    }

    pub fn set_adjusted_multiplier(&mut self, multiplier: f64) {
        self.adjusted_multiplier = multiplier;
    }

    pub fn take_effects(&mut self) -> Vec<ElectionEffect> {
        std::mem::take(&mut self.effects)
    }

    /// Apply a vote from `rep` for `hash`.
    ///
    /// A vote that does not supersede the representative's previous one is a
    /// replay. One that does but arrives inside the cooldown is dropped.
    pub fn vote(
        &mut self,
        rep: &Account,
        sequence: u64,
        hash: &BlockHash,
        now: Instant,
    ) -> VoteResult {
        let services = Arc::clone(&self.services);
        let online_stake = services.online_reps.online_stake();
        let weight = services.ledger.weight(rep);
        if !services.ledger.is_test_network()
            && weight <= services.online_reps.minimum_principal_weight()
        {
            services.stats.inc(StatType::Vote, DetailType::VoteIgnored);
            return VoteResult::IGNORED;
        }

        if let Some(last) = self.last_votes.get(rep) {
            if !last.is_superseded_by(sequence, hash) {
                services.stats.inc(StatType::Vote, DetailType::VoteReplay);
                return VoteResult::REPLAY;
            }
            let cooldown = vote_cooldown(weight, online_stake);
            if now.saturating_duration_since(last.time) < cooldown {
                services.stats.inc(StatType::Vote, DetailType::VoteCooldown);
                return VoteResult::IGNORED;
            }
        }

        services.stats.inc(StatType::Election, DetailType::VoteNew);
        trace!(%rep, %hash, sequence, "vote accepted");
        self.last_votes
            .insert(*rep, VoteInfo::new(now, sequence, *hash));
        if !self.state.is_confirmed() {
            self.confirm_if_quorum(now);
        }
        VoteResult::PROCESSED
    }

    /// Weight behind each known variant, heaviest first. Ties stay separate.
    pub fn tally(&mut self) -> Vec<(u128, Arc<Block>)> {
        let mut weights: HashMap<BlockHash, u128> = HashMap::new();
        for (rep, info) in &self.last_votes {
            let weight = self.services.ledger.weight(rep);
            let entry = weights.entry(info.hash).or_insert(0);
            *entry = entry.saturating_add(weight);
        }
        self.last_tally = weights.clone();

        let mut result: Vec<(u128, Arc<Block>)> = weights
            .into_iter()
            .filter_map(|(hash, weight)| self.blocks.get(&hash).map(|b| (weight, Arc::clone(b))))
            .collect();
        result.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.hash().cmp(&b.1.hash())));
        result
    }

    /// Switch the winner to the heaviest variant and confirm on quorum.
    pub fn confirm_if_quorum(&mut self, now: Instant) {
        let tally = self.tally();
        let Some((top_weight, top_block)) = tally.first().cloned() else {
            return;
        };
        let sum = tally
            .iter()
            .fold(0u128, |acc, (weight, _)| acc.saturating_add(*weight));
        self.status.tally = top_weight;

        let old = self.status.winner.hash();
        let new = top_block.hash();
        if sum >= self.services.config.online_weight_minimum.number() && new != old {
            debug!(root = %self.root.root, %old, %new, "election winner changed");
            self.services
                .stats
                .inc(StatType::Election, DetailType::ElectionWinnerChanged);
            self.services.block_processor.force(Arc::clone(&top_block));
            self.status.winner = top_block;
            self.remove_votes(&old);
            self.generate_votes();
            self.effects.push(ElectionEffect::WinnerChanged { old, new });
        }

        if self.have_quorum(&tally, sum) {
            self.confirm_once(ElectionStatusType::ActiveConfirmedQuorum, now);
        }
    }

    /// Only the two heaviest entries of `tally` are compared.
    pub fn have_quorum(&self, tally: &[(u128, Arc<Block>)], sum: u128) -> bool {
        let mut weights = tally.iter().map(|(weight, _)| *weight);
        let first = weights.next().unwrap_or(0);
        let second = weights.next().unwrap_or(0);
        let delta = self
            .services
            .online_reps
            .delta(self.services.config.online_weight_quorum);
        sum >= self.services.config.online_weight_minimum.number()
            && first > second.saturating_add(delta)
    }

    /// Confirm the current winner. Returns `false` if the election was already
    /// confirmed, or if another election registered the same winner first.
    pub fn confirm_once(&mut self, status_type: ElectionStatusType, now: Instant) -> bool {
        if self.state.is_confirmed() {
            return false;
        }
        // Confirmation may happen from any live state, so it bypasses the
        // transition table.
        self.state = ElectionState::Confirmed;
        self.state_start = now;

        let winner = self.status.winner.hash();
        if !self.services.winners.try_insert(winner, self.root) {
            debug!(%winner, "winner already being confirmed by another election");
            self.services
                .stats
                .inc(StatType::Election, DetailType::ElectionBlockConflict);
            return false;
        }

        self.status.election_end = Timestamp::now();
        self.status.election_duration = now.saturating_duration_since(self.election_start);
        self.status.confirmation_request_count = self.confirmation_request_count;
        self.status.block_count = self.blocks.len() as u32;
        self.status.voter_count = self.last_votes.len() as u32;
        self.status.status_type = status_type;

        debug!(
            %winner,
            tally = self.status.tally,
            voters = self.status.voter_count,
            duration_ms = self.status.election_duration.as_millis() as u64,
            "election confirmed"
        );
        self.services
            .stats
            .inc(StatType::Election, DetailType::ElectionConfirmed);
        self.effects.push(ElectionEffect::Confirmed(winner));
        self.services.events.post(ElectionEvent::Confirmed {
            status: self.status.clone(),
            action: self.confirmation_action.clone(),
        });
        true
    }

    /// Invalid transitions are programming errors and abort.
    fn state_change(&mut self, expected: ElectionState, desired: ElectionState, now: Instant) -> bool {
        assert!(
            expected.valid_change(desired),
            "invalid election state change {} -> {}",
            expected.as_str(),
            desired.as_str()
        );
        if self.state != expected {
            return false;
        }
        self.state = desired;
        self.state_start = now;
        true
    }

    pub fn transition_passive(&mut self, now: Instant) -> bool {
        self.state_change(ElectionState::Idle, ElectionState::Passive, now)
    }

    pub fn transition_active(&mut self, now: Instant) -> bool {
        match self.state {
            ElectionState::Idle => self.state_change(ElectionState::Idle, ElectionState::Active, now),
            ElectionState::Passive => {
                self.state_change(ElectionState::Passive, ElectionState::Active, now)
            }
            _ => false,
        }
    }

    /// Advance the state machine. Returns `true` once the election should be
    /// removed from its container.
    pub fn transition_time(&mut self, solicitor: &mut ConfirmationSolicitor, now: Instant) -> bool {
        if self.state.is_expired() {
            return true;
        }
        let base = self.services.base_latency();
        let in_state = now.saturating_duration_since(self.state_start);
        let mut remove = false;
        match self.state {
            ElectionState::Idle => {}
            ElectionState::Passive => {
                if in_state > base * PASSIVE_DURATION_FACTOR {
                    self.state_change(ElectionState::Passive, ElectionState::Active, now);
                }
            }
            ElectionState::Active => {
                self.send_confirm_req(solicitor, now);
                if self.confirmation_request_count > ACTIVE_REQUEST_COUNT_MIN {
                    self.state_change(ElectionState::Active, ElectionState::Broadcasting, now);
                }
            }
            ElectionState::Broadcasting => {
                self.broadcast_block(solicitor, now);
                self.send_confirm_req(solicitor, now);
                if in_state > base * ACTIVE_BROADCASTING_DURATION_FACTOR {
                    self.state_change(ElectionState::Broadcasting, ElectionState::Backtracking, now);
                    self.effects.push(ElectionEffect::ActivateDependencies);
                }
            }
            ElectionState::Backtracking => {
                self.broadcast_block(solicitor, now);
                self.send_confirm_req(solicitor, now);
            }
            ElectionState::Confirmed => {
                if in_state > base * self.services.config.confirmed_duration_factor {
                    remove = true;
                    self.state_change(ElectionState::Confirmed, ElectionState::ExpiredConfirmed, now);
                }
            }
            ElectionState::ExpiredConfirmed | ElectionState::ExpiredUnconfirmed => {}
        }

        if !self.state.is_confirmed()
            && now.saturating_duration_since(self.election_start) > EXPIRE_TIME
        {
            debug!(root = %self.root.root, state = self.state.as_str(), "election expired");
            remove = true;
            self.state_change(self.state, ElectionState::ExpiredUnconfirmed, now);
            self.status.status_type = ElectionStatusType::Stopped;
        }
        remove
    }

    fn send_confirm_req(&mut self, solicitor: &mut ConfirmationSolicitor, now: Instant) {
        let interval = self.services.base_latency() * CONFIRM_REQ_FACTOR;
        let due = self
            .last_req
            .map_or(true, |last| now.saturating_duration_since(last) > interval);
        if due && solicitor.add(self) {
            self.last_req = Some(now);
            self.confirmation_request_count += 1;
        }
    }

    fn broadcast_block(&mut self, solicitor: &mut ConfirmationSolicitor, now: Instant) {
        let interval = self.services.base_latency() * BLOCK_BROADCAST_FACTOR;
        let due = self
            .last_block
            .map_or(true, |last| now.saturating_duration_since(last) > interval);
        if due && solicitor.broadcast(self) {
            self.last_block = Some(now);
        }
    }

    /// Offer a (possibly new) variant for this root.
    pub fn publish(&mut self, block: Arc<Block>, now: Instant) -> PublishOutcome {
        if self.state.is_confirmed() {
            return PublishOutcome::Rejected;
        }
        let hash = block.hash();
        let known = self.blocks.contains_key(&hash);
        if !known && self.blocks.len() >= MAX_BLOCKS {
            let last = self.last_tally.get(&hash).copied().unwrap_or(0);
            if last < self.services.online_reps.online_stake() / 10 {
                self.services
                    .stats
                    .inc(StatType::Election, DetailType::ElectionPublishRejected);
                return PublishOutcome::Rejected;
            }
        }

        if known {
            self.blocks.insert(hash, Arc::clone(&block));
            if self.status.winner.hash() == hash {
                self.status.winner = Arc::clone(&block);
                self.services.network.flood_block(&block);
            }
            return PublishOutcome::Replaced;
        }

        self.blocks.insert(hash, Arc::clone(&block));
        self.services.network.flood_block(&block);
        // Votes for this hash may already be held by the election.
        self.confirm_if_quorum(now);
        PublishOutcome::Inserted
    }

    /// Notify observers about discarded variants and clear their network
    /// filter entries. Returns every variant hash so the container can drop
    /// them from its indexes.
    pub fn cleanup(&self) -> Vec<BlockHash> {
        let unconfirmed = !self.state.is_confirmed();
        let winner = self.status.winner.hash();
        for (hash, block) in &self.blocks {
            if unconfirmed || *hash != winner {
                self.services.events.post(ElectionEvent::Stopped(*hash));
                self.services.network.clear_publish_filter(block);
            }
        }
        self.blocks.keys().copied().collect()
    }

    /// Forget our own votes for `hash` so new ones can be generated for the
    /// replacement winner.
    fn remove_votes(&mut self, hash: &BlockHash) {
        if !self.services.can_vote() {
            return;
        }
        for vote in self.services.votes_cache.find(hash) {
            self.last_votes.remove(&vote.account);
        }
        self.services.votes_cache.remove(hash);
    }

    pub fn generate_votes(&self) {
        if self.services.can_vote() {
            self.services.vote_generator.add(self.status.winner.hash());
        }
    }

    /// Blocks the winner depends on.
    pub fn dependencies(&self) -> Vec<BlockHash> {
        block_dependencies(&self.services.ledger, &self.status.winner)
    }
}

/// A block's previous block and, for receives, its source.
pub fn block_dependencies(ledger: &Ledger, block: &Block) -> Vec<BlockHash> {
    let mut result = Vec::with_capacity(2);
    let previous = block.previous();
    if !previous.is_zero() {
        result.push(previous);
    }
    if let Some(source) = ledger.receive_source(block) {
        result.push(source);
    }
    result
}
