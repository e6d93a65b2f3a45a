//! The container of all running elections.
//!
//! One mutex guards every election together with the indexes around them:
//! root → election, the global hash → root index, votes waiting for an
//! election and the recently confirmed set. Votes, publishes and the request
//! loop all go through this lock, so an election is never touched by two
//! threads at once.
//!
//! The request loop thread walks the elections by descending adjusted
//! multiplier, advances each one's state machine, sends the batched requests
//! and evicts expired elections.

use crate::confirmation_solicitor::ConfirmationSolicitor;
use crate::election::{
    block_dependencies, ConfirmationAction, Election, ElectionEffect, ElectionServices,
    ElectionState, ElectionStatusType, PublishOutcome,
};
use crate::inactive_votes::InactiveVotesCache;
use crate::recently_confirmed::RecentlyConfirmed;
use crate::ConsensusError;
use orv_messages::{Vote, VoteEntry};
use orv_types::{Block, BlockHash, QualifiedRoot};
use orv_utils::{DetailType, StatType};
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// How often the request loop folds observed reps into the online trend.
const ONLINE_SAMPLE_INTERVAL: Duration = Duration::from_secs(60);

/// Result of routing a vote to the elections.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoteCode {
    /// Nothing new: every hash was replayed or already confirmed.
    Replay,
    /// At least one election accepted the vote.
    Vote,
    /// No election for any hash yet. The vote was cached.
    Indeterminate,
}

struct ActiveData {
    roots: HashMap<QualifiedRoot, Election>,
    blocks: HashMap<BlockHash, QualifiedRoot>,
    inactive_votes: InactiveVotesCache,
    recently_confirmed: RecentlyConfirmed,
    stopped: bool,
}

pub struct ActiveElections {
    services: Arc<ElectionServices>,
    data: Mutex<ActiveData>,
    condition: Condvar,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ActiveElections {
    pub fn new(services: Arc<ElectionServices>) -> Self {
        let data = ActiveData {
            roots: HashMap::new(),
            blocks: HashMap::new(),
            inactive_votes: InactiveVotesCache::new(services.config.inactive_votes_cache_size),
            recently_confirmed: RecentlyConfirmed::new(services.config.recently_confirmed_size),
            stopped: false,
        };
        Self {
            services,
            data: Mutex::new(data),
            condition: Condvar::new(),
            thread: Mutex::new(None),
        }
    }

    pub fn services(&self) -> &Arc<ElectionServices> {
        &self.services
    }

    /// Start an election for `block` with the base multiplier.
    pub fn insert(
        &self,
        block: Arc<Block>,
        confirmation_action: Option<ConfirmationAction>,
        prioritized: bool,
        now: Instant,
    ) -> Result<(), ConsensusError> {
        self.insert_with_multiplier(block, confirmation_action, prioritized, 1.0, now)
    }

    /// Prioritized elections skip the passive phase and vote right away.
    pub fn insert_with_multiplier(
        &self,
        block: Arc<Block>,
        confirmation_action: Option<ConfirmationAction>,
        prioritized: bool,
        multiplier: f64,
        now: Instant,
    ) -> Result<(), ConsensusError> {
        let mut data = self.data.lock().unwrap();
        self.insert_locked(&mut data, block, confirmation_action, prioritized, multiplier, now)
    }

    fn insert_locked(
        &self,
        data: &mut ActiveData,
        block: Arc<Block>,
        confirmation_action: Option<ConfirmationAction>,
        prioritized: bool,
        multiplier: f64,
        now: Instant,
    ) -> Result<(), ConsensusError> {
        if data.stopped {
            return Err(ConsensusError::Stopped);
        }
        let root = block.qualified_root();
        let hash = block.hash();
        if data.roots.contains_key(&root) {
            return Err(ConsensusError::ElectionExists(root.root.to_string()));
        }
        if data.recently_confirmed.contains_root(&root) || self.services.ledger.block_confirmed(&hash)
        {
            return Err(ConsensusError::AlreadyConfirmed(hash.to_string()));
        }
        if data.roots.len() >= self.services.config.active_elections_size {
            return Err(ConsensusError::Full(data.roots.len()));
        }

        let mut election = Election::new(
            Arc::clone(&self.services),
            block,
            confirmation_action,
            prioritized,
            multiplier,
            now,
        );
        if prioritized {
            election.transition_active(now);
        } else {
            election.transition_passive(now);
        }
        let dependencies = election.dependencies();
        data.blocks.insert(hash, root);
        data.roots.insert(root, election);
        self.services
            .stats
            .inc(StatType::Election, DetailType::ElectionStart);
        debug!(%hash, prioritized, "election started");

        for dependency in dependencies {
            if let Some(parent) = Self::election_for_mut(data, &dependency) {
                parent.add_dependent(hash);
            }
        }
        self.replay_inactive_votes(data, &root, &hash, now);
        self.apply_effects(data, &root, now);
        self.update_multipliers(data, hash);
        Ok(())
    }

    fn election_for_mut<'a>(data: &'a mut ActiveData, hash: &BlockHash) -> Option<&'a mut Election> {
        let root = data.blocks.get(hash)?;
        data.roots.get_mut(root)
    }

    fn replay_inactive_votes(
        &self,
        data: &mut ActiveData,
        root: &QualifiedRoot,
        hash: &BlockHash,
        now: Instant,
    ) {
        let cached = data.inactive_votes.take(hash);
        if cached.is_empty() {
            return;
        }
        if let Some(election) = data.roots.get_mut(root) {
            for vote in cached {
                election.vote(&vote.rep, vote.sequence, hash, now);
            }
        }
    }

    /// Route a vote to every election it covers. Hashes without an election
    /// are cached until one starts.
    pub fn vote(&self, vote: &Vote, now: Instant) -> VoteCode {
        self.services.online_reps.observe(&vote.account, now);
        let mut data = self.data.lock().unwrap();
        let mut processed = false;
        let mut replay = false;
        let mut recently_confirmed = 0;
        let mut touched = Vec::new();
        for entry in &vote.entries {
            if let VoteEntry::Block(block) = entry {
                self.publish_locked(&mut data, Arc::clone(block), now);
            }
            let hash = entry.hash();
            if let Some(root) = data.blocks.get(&hash).copied() {
                if let Some(election) = data.roots.get_mut(&root) {
                    let result = election.vote(&vote.account, vote.sequence, &hash, now);
                    processed |= result.processed;
                    replay |= result.replay;
                    touched.push(root);
                }
            } else if data.recently_confirmed.contains_hash(&hash) {
                recently_confirmed += 1;
            } else {
                data.inactive_votes.insert(hash, vote.account, vote.sequence);
                self.services
                    .stats
                    .inc(StatType::Vote, DetailType::VoteCached);
            }
        }
        for root in touched {
            self.apply_effects(&mut data, &root, now);
        }

        if processed {
            VoteCode::Vote
        } else if replay || (recently_confirmed > 0 && recently_confirmed == vote.entries.len()) {
            VoteCode::Replay
        } else {
            self.services
                .stats
                .inc(StatType::Vote, DetailType::VoteIndeterminate);
            VoteCode::Indeterminate
        }
    }

    /// Offer a block to the election for its root. `None` if there is none.
    pub fn publish(&self, block: Arc<Block>, now: Instant) -> Option<PublishOutcome> {
        let mut data = self.data.lock().unwrap();
        self.publish_locked(&mut data, block, now)
    }

    fn publish_locked(
        &self,
        data: &mut ActiveData,
        block: Arc<Block>,
        now: Instant,
    ) -> Option<PublishOutcome> {
        let root = block.qualified_root();
        let hash = block.hash();
        let election = data.roots.get_mut(&root)?;
        let outcome = election.publish(block, now);
        if outcome == PublishOutcome::Inserted {
            data.blocks.insert(hash, root);
            self.replay_inactive_votes(data, &root, &hash, now);
        }
        self.apply_effects(data, &root, now);
        Some(outcome)
    }

    /// Confirm the election whose winner was cemented by other means.
    pub fn confirm_by_height(&self, hash: &BlockHash, now: Instant) -> bool {
        let mut data = self.data.lock().unwrap();
        let Some(root) = data.blocks.get(hash).copied() else {
            return false;
        };
        let confirmed = match data.roots.get_mut(&root) {
            Some(election) if election.winner().hash() == *hash => {
                election.confirm_once(ElectionStatusType::ActiveConfirmationHeight, now)
            }
            _ => false,
        };
        self.apply_effects(&mut data, &root, now);
        confirmed
    }

    /// Drop the election for `root`. `false` if there was none.
    pub fn erase(&self, root: &QualifiedRoot) -> bool {
        let mut data = self.data.lock().unwrap();
        let erased = Self::erase_locked(&mut data, root);
        if erased {
            self.services
                .stats
                .inc(StatType::Election, DetailType::ElectionDrop);
        }
        erased
    }

    fn erase_locked(data: &mut ActiveData, root: &QualifiedRoot) -> bool {
        let Some(election) = data.roots.remove(root) else {
            return false;
        };
        for hash in election.cleanup() {
            if data.blocks.get(&hash) == Some(root) {
                data.blocks.remove(&hash);
            }
            data.inactive_votes.erase(&hash);
        }
        let winner = election.winner().hash();
        for dependency in election.dependencies() {
            if let Some(parent) = Self::election_for_mut(data, &dependency) {
                parent.remove_dependent(&winner);
            }
        }
        debug!(root = %root.root, state = election.state().as_str(), "election erased");
        true
    }

    fn apply_effects(&self, data: &mut ActiveData, root: &QualifiedRoot, now: Instant) {
        let effects = match data.roots.get_mut(root) {
            Some(election) => election.take_effects(),
            None => return,
        };
        for effect in effects {
            match effect {
                ElectionEffect::WinnerChanged { old, new } => {
                    let old_dependencies = data
                        .roots
                        .get(root)
                        .and_then(|e| e.blocks().get(&old).cloned())
                        .map(|block| block_dependencies(&self.services.ledger, &block))
                        .unwrap_or_default();
                    for dependency in old_dependencies {
                        if let Some(parent) = Self::election_for_mut(data, &dependency) {
                            parent.remove_dependent(&old);
                        }
                    }
                    let new_dependencies = data
                        .roots
                        .get(root)
                        .map(Election::dependencies)
                        .unwrap_or_default();
                    for dependency in new_dependencies {
                        if let Some(parent) = Self::election_for_mut(data, &dependency) {
                            parent.add_dependent(new);
                        }
                    }
                    self.update_multipliers(data, new);
                }
                ElectionEffect::Confirmed(hash) => {
                    data.recently_confirmed.insert(*root, hash);
                    self.update_multipliers(data, hash);
                }
                ElectionEffect::ActivateDependencies => {
                    self.activate_dependencies(data, root, now);
                }
            }
        }
    }

    /// Start elections for the unconfirmed blocks the winner of `root`
    /// depends on.
    fn activate_dependencies(&self, data: &mut ActiveData, root: &QualifiedRoot, now: Instant) {
        let Some(election) = data.roots.get(root) else {
            return;
        };
        let child = election.winner().hash();
        for dependency in election.dependencies() {
            if data.blocks.contains_key(&dependency)
                || self.services.ledger.block_confirmed(&dependency)
            {
                continue;
            }
            let Some(saved) = self.services.ledger.block(&dependency) else {
                continue;
            };
            let block = Arc::new(saved.block().clone());
            match self.insert_locked(data, block, None, false, 1.0, now) {
                Ok(()) => {
                    self.services
                        .stats
                        .inc(StatType::Election, DetailType::ElectionDependencyActivated);
                    if let Some(parent) = Self::election_for_mut(data, &dependency) {
                        parent.add_dependent(child);
                    }
                    self.update_multipliers(data, child);
                }
                Err(e) => debug!(%dependency, error = %e, "dependency not activated"),
            }
        }
    }

    /// Recompute adjusted multipliers starting at the election holding
    /// `start` and walking up through dependencies while values change.
    ///
    /// An election's adjusted multiplier is the highest of its own and those
    /// of its unconfirmed dependents.
    fn update_multipliers(&self, data: &mut ActiveData, start: BlockHash) {
        let mut queue = vec![start];
        let mut visited = HashSet::new();
        while let Some(hash) = queue.pop() {
            if !visited.insert(hash) {
                continue;
            }
            let Some(root) = data.blocks.get(&hash).copied() else {
                continue;
            };
            let Some(election) = data.roots.get(&root) else {
                continue;
            };
            let mut adjusted = election.multiplier();
            for dependent in election.dependent_blocks() {
                let child = data.blocks.get(dependent).and_then(|r| data.roots.get(r));
                if let Some(child) = child {
                    if !child.is_confirmed() {
                        adjusted = adjusted.max(child.adjusted_multiplier());
                    }
                }
            }
            let dependencies = election.dependencies();
            let changed = election.adjusted_multiplier() != adjusted;
            if changed {
                if let Some(election) = data.roots.get_mut(&root) {
                    election.set_adjusted_multiplier(adjusted);
                }
                self.services
                    .stats
                    .inc(StatType::Election, DetailType::ElectionDifficultyUpdate);
            }
            if changed || hash == start {
                queue.extend(dependencies);
            }
        }
    }

    /// One pass of the request loop.
    pub fn request_confirm(&self, now: Instant) {
        let representatives = self.services.network.representatives();
        let mut solicitor = ConfirmationSolicitor::new(
            Arc::clone(&self.services.network),
            Arc::clone(&self.services.stats),
            self.services.ledger.is_test_network(),
        );
        solicitor.prepare(&representatives);

        let mut data = self.data.lock().unwrap();
        let mut order: Vec<(f64, QualifiedRoot)> = data
            .roots
            .iter()
            .map(|(root, e)| (e.adjusted_multiplier(), *root))
            .collect();
        order.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

        let mut expired = Vec::new();
        for (_, root) in order {
            let Some(election) = data.roots.get_mut(&root) else {
                continue;
            };
            if election.transition_time(&mut solicitor, now) {
                expired.push((root, election.is_confirmed()));
            }
            self.apply_effects(&mut data, &root, now);
        }
        solicitor.flush();

        for (root, confirmed) in expired {
            if !confirmed {
                self.services
                    .stats
                    .inc(StatType::Election, DetailType::ElectionExpired);
            }
            Self::erase_locked(&mut data, &root);
        }
    }

    pub fn start(self: &Arc<Self>) -> io::Result<()> {
        let mut thread = self.thread.lock().unwrap();
        debug_assert!(thread.is_none());
        let active = Arc::clone(self);
        *thread = Some(
            thread::Builder::new()
                .name("Request loop".to_string())
                .spawn(move || active.run())?,
        );
        Ok(())
    }

    fn run(&self) {
        info!("request loop started");
        let interval = self.services.config.request_interval();
        let mut last_sample = Instant::now();
        let mut data = self.data.lock().unwrap();
        while !data.stopped {
            drop(data);
            let now = Instant::now();
            self.request_confirm(now);
            if now.duration_since(last_sample) >= ONLINE_SAMPLE_INTERVAL {
                self.services.online_reps.sample(now);
                last_sample = now;
            }
            data = self.data.lock().unwrap();
            if !data.stopped {
                data = self.condition.wait_timeout(data, interval).unwrap().0;
            }
        }
        info!("request loop stopped");
    }

    /// Stop the request loop and drop every election without notifying.
    pub fn stop(&self) {
        {
            let mut data = self.data.lock().unwrap();
            data.stopped = true;
        }
        self.condition.notify_all();
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
        let mut data = self.data.lock().unwrap();
        data.roots.clear();
        data.blocks.clear();
    }

    pub fn active(&self, root: &QualifiedRoot) -> bool {
        self.data.lock().unwrap().roots.contains_key(root)
    }

    pub fn active_block(&self, hash: &BlockHash) -> bool {
        self.data.lock().unwrap().blocks.contains_key(hash)
    }

    pub fn winner(&self, root: &QualifiedRoot) -> Option<Arc<Block>> {
        self.data
            .lock()
            .unwrap()
            .roots
            .get(root)
            .map(|e| Arc::clone(e.winner()))
    }

    pub fn state(&self, root: &QualifiedRoot) -> Option<ElectionState> {
        self.data.lock().unwrap().roots.get(root).map(Election::state)
    }

    pub fn adjusted_multiplier(&self, root: &QualifiedRoot) -> Option<f64> {
        self.data
            .lock()
            .unwrap()
            .roots
            .get(root)
            .map(Election::adjusted_multiplier)
    }

    pub fn recently_confirmed(&self, hash: &BlockHash) -> bool {
        self.data.lock().unwrap().recently_confirmed.contains_hash(hash)
    }

    pub fn inactive_votes_len(&self) -> usize {
        self.data.lock().unwrap().inactive_votes.len()
    }

    pub fn size(&self) -> usize {
        self.data.lock().unwrap().roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }
}
