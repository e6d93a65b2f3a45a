//! Hands confirmed election winners to cementing.
//!
//! A winner can be confirmed before the ledger has it, typically after a fork
//! switch where the new winner was only just forced into block processing.
//! Such winners are retried on a fixed interval. Once the attempts run out
//! the winner is released from the [`ElectionWinners`] registry so a later
//! election can confirm it again.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use orv_consensus::ElectionWinners;
use orv_ledger::Ledger;
use orv_types::{BlockHash, NetworkId};
use orv_utils::{DetailType, StatType, Stats};

use crate::cementing::ConfirmationHeightProcessor;

/// Lookups of a confirmed winner before it is given up on.
pub const PROCESS_CONFIRMED_ATTEMPTS: u32 = 40;

pub fn process_confirmed_interval(network: NetworkId) -> Duration {
    if network.is_test_network() {
        Duration::from_millis(50)
    } else {
        Duration::from_millis(500)
    }
}

struct Deferred {
    hash: BlockHash,
    attempt: u32,
    due: Instant,
}

#[derive(Default)]
struct DeferredState {
    entries: VecDeque<Deferred>,
    stopped: bool,
}

pub struct ConfirmedProcessor {
    ledger: Arc<Ledger>,
    cementing: Arc<ConfirmationHeightProcessor>,
    winners: Arc<ElectionWinners>,
    stats: Arc<Stats>,
    interval: Duration,
    state: Mutex<DeferredState>,
    condition: Condvar,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ConfirmedProcessor {
    pub fn new(
        ledger: Arc<Ledger>,
        cementing: Arc<ConfirmationHeightProcessor>,
        winners: Arc<ElectionWinners>,
        stats: Arc<Stats>,
    ) -> Self {
        let interval = process_confirmed_interval(ledger.params().network);
        Self {
            ledger,
            cementing,
            winners,
            stats,
            interval,
            state: Mutex::new(DeferredState::default()),
            condition: Condvar::new(),
            thread: Mutex::new(None),
        }
    }

    /// Queue `hash` for cementing, or schedule another lookup if the ledger
    /// does not have it yet.
    pub fn process(&self, hash: BlockHash, now: Instant) {
        self.process_attempt(hash, 0, now);
    }

    fn process_attempt(&self, hash: BlockHash, attempt: u32, now: Instant) {
        if let Some(block) = self.ledger.block(&hash) {
            trace!(%hash, attempt, "process confirmed");
            if let Err(e) = self.cementing.add(block) {
                debug!(%hash, error = %e, "confirmed block not queued for cementing");
            }
            return;
        }

        if attempt < PROCESS_CONFIRMED_ATTEMPTS {
            self.stats
                .inc(StatType::ConfirmationHeight, DetailType::ConfirmedDeferred);
            let mut state = self.state.lock().unwrap();
            if state.stopped {
                return;
            }
            state.entries.push_back(Deferred {
                hash,
                attempt: attempt + 1,
                due: now + self.interval,
            });
            drop(state);
            self.condition.notify_all();
        } else {
            warn!(%hash, attempts = attempt, "confirmed block never reached the ledger");
            self.stats
                .inc(StatType::ConfirmationHeight, DetailType::ConfirmedDropped);
            self.winners.remove(&hash);
        }
    }

    /// Retry every lookup that is due. Returns how many were retried.
    pub fn retry_due(&self, now: Instant) -> usize {
        let due: VecDeque<Deferred> = {
            let mut state = self.state.lock().unwrap();
            let (due, waiting): (VecDeque<_>, VecDeque<_>) =
                state.entries.drain(..).partition(|d| d.due <= now);
            state.entries = waiting;
            due
        };
        let count = due.len();
        for deferred in due {
            self.process_attempt(deferred.hash, deferred.attempt, now);
        }
        count
    }

    /// Retry every waiting lookup right away, ignoring the interval.
    pub fn retry_all(&self) -> usize {
        let now = Instant::now();
        let all: Vec<Deferred> = self.state.lock().unwrap().entries.drain(..).collect();
        let count = all.len();
        for deferred in all {
            self.process_attempt(deferred.hash, deferred.attempt, now);
        }
        count
    }

    /// Lookups waiting for their next attempt.
    pub fn deferred_len(&self) -> usize {
        self.state.lock().unwrap().entries.len()
    }

    pub fn start(self: &Arc<Self>) -> io::Result<()> {
        let processor = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("Process confirmed".to_string())
            .spawn(move || processor.run())?;
        *self.thread.lock().unwrap() = Some(handle);
        Ok(())
    }

    fn run(&self) {
        let mut state = self.state.lock().unwrap();
        while !state.stopped {
            let now = Instant::now();
            if state.entries.iter().any(|d| d.due <= now) {
                drop(state);
                self.retry_due(now);
                state = self.state.lock().unwrap();
                continue;
            }
            let wait = state
                .entries
                .iter()
                .map(|d| d.due.saturating_duration_since(now))
                .min()
                .unwrap_or(self.interval);
            state = self.condition.wait_timeout(state, wait).unwrap().0;
        }
    }

    pub fn stop(&self) {
        {
            let mut state = self.state.lock().unwrap();
            state.stopped = true;
            state.entries.clear();
        }
        self.condition.notify_all();
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CementingConfig;
    use orv_nullables::NullStore;
    use orv_store::WriteQueue;
    use orv_types::{Account, Amount, Block, NetworkParams, QualifiedRoot, StateBlock};
    use orv_utils::Direction;

    struct Fixture {
        store: Arc<NullStore>,
        ledger: Arc<Ledger>,
        winners: Arc<ElectionWinners>,
        stats: Arc<Stats>,
        cementing: Arc<ConfirmationHeightProcessor>,
        confirmed: ConfirmedProcessor,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(NullStore::new());
        let ledger = Arc::new(Ledger::new(store.clone(), NetworkParams::new(NetworkId::Test)));
        let stats = Arc::new(Stats::new());
        let winners = Arc::new(ElectionWinners::new());
        let cementing = Arc::new(ConfirmationHeightProcessor::new(
            ledger.clone(),
            Arc::new(WriteQueue::new(false)),
            stats.clone(),
            &CementingConfig::default(),
        ));
        let confirmed =
            ConfirmedProcessor::new(ledger.clone(), cementing.clone(), winners.clone(), stats.clone());
        Fixture {
            store,
            ledger,
            winners,
            stats,
            cementing,
            confirmed,
        }
    }

    /// A send from `account` that the store has not seen yet.
    fn unstored_send(account: Account, previous: BlockHash) -> Block {
        Block::State(StateBlock {
            account,
            previous,
            representative: account,
            balance: Amount::raw(90),
            link: BlockHash::from(Account::from(2)),
        })
    }

    #[test]
    fn known_block_is_queued_for_cementing() {
        let f = fixture();
        let open = f.store.open_genesis(Account::from(1), Amount::raw(100));
        f.confirmed.process(open.hash(), Instant::now());
        assert_eq!(f.confirmed.deferred_len(), 0);
        f.cementing.flush();
        assert!(f.ledger.block_confirmed(&open.hash()));
    }

    #[test]
    fn missing_block_is_retried_once_it_arrives() {
        let f = fixture();
        let account = Account::from(1);
        let open = f.store.open_genesis(account, Amount::raw(100));
        let block = unstored_send(account, open.hash());
        let hash = block.hash();

        let start = Instant::now();
        f.confirmed.process(hash, start);
        assert_eq!(f.confirmed.deferred_len(), 1);
        // Not due yet.
        assert_eq!(f.confirmed.retry_due(start), 0);

        f.store.process(block);
        let due = start + process_confirmed_interval(NetworkId::Test);
        assert_eq!(f.confirmed.retry_due(due), 1);
        assert_eq!(f.confirmed.deferred_len(), 0);
        f.cementing.flush();
        assert!(f.ledger.block_confirmed(&hash));
        assert_eq!(
            f.stats.count(StatType::ConfirmationHeight, DetailType::ConfirmedDeferred, Direction::In),
            1
        );
    }

    #[test]
    fn winner_is_released_after_the_last_attempt() {
        let f = fixture();
        let hash = BlockHash::from(42);
        assert!(f.winners.try_insert(hash, QualifiedRoot::default()));

        f.confirmed.process(hash, Instant::now());
        for _ in 0..PROCESS_CONFIRMED_ATTEMPTS {
            assert!(f.winners.contains(&hash));
            assert_eq!(f.confirmed.retry_all(), 1);
        }
        assert_eq!(f.confirmed.deferred_len(), 0);
        assert!(!f.winners.contains(&hash));
        assert_eq!(
            f.stats.count(StatType::ConfirmationHeight, DetailType::ConfirmedDropped, Direction::In),
            1
        );
    }

    #[test]
    fn worker_retries_in_background() {
        let f = fixture();
        let account = Account::from(1);
        let open = f.store.open_genesis(account, Amount::raw(100));
        let block = unstored_send(account, open.hash());
        let hash = block.hash();
        let confirmed = Arc::new(f.confirmed);
        f.cementing.start().unwrap();
        confirmed.start().unwrap();

        confirmed.process(hash, Instant::now());
        f.store.process(block);
        let deadline = Instant::now() + Duration::from_secs(5);
        while !f.ledger.block_confirmed(&hash) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        confirmed.stop();
        f.cementing.stop();
        assert!(f.ledger.block_confirmed(&hash));
    }
}
