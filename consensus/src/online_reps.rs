//! Online representative tracking.
//!
//! Quorum is measured against *online* stake, not total delegated weight. A
//! representative counts as online if it voted within the sampling window.
//!
//! - **Minimum floor**: online stake never drops below `online_weight_minimum`,
//!   so quorum cannot collapse when few representatives are reachable.
//! - **Trend**: an exponential moving average smooths temporary dips.

use orv_ledger::Ledger;
use orv_types::Account;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Decay percentage for the trend (95 means 0.95 of the old value is kept).
const TREND_DECAY_PCT: u128 = 95;

/// A representative with at most this fraction of online stake (1/1000) is
/// not a principal representative and its votes are ignored outside tests.
const PRINCIPAL_WEIGHT_DIVISOR: u128 = 1000;

pub struct OnlineReps {
    ledger: Arc<Ledger>,
    minimum: u128,
    window: Duration,
    data: Mutex<OnlineData>,
}

#[derive(Default)]
struct OnlineData {
    last_seen: HashMap<Account, Instant>,
    online: u128,
    trended: u128,
}

impl OnlineReps {
    pub fn new(ledger: Arc<Ledger>, minimum: u128, window: Duration) -> Self {
        Self {
            ledger,
            minimum,
            window,
            data: Mutex::new(OnlineData::default()),
        }
    }

    /// Record that `rep` voted at `now`. Weightless accounts are not tracked.
    pub fn observe(&self, rep: &Account, now: Instant) {
        if self.ledger.weight(rep) == 0 {
            return;
        }
        let mut data = self.data.lock().unwrap();
        let is_new = data.last_seen.insert(*rep, now).is_none();
        if is_new {
            data.online = self.sum_online(&data.last_seen, now);
        }
    }

    /// Drop representatives outside the window and fold the current online
    /// weight into the trend. Called periodically.
    pub fn sample(&self, now: Instant) {
        let mut data = self.data.lock().unwrap();
        let window = self.window;
        data.last_seen
            .retain(|_, seen| now.saturating_duration_since(*seen) <= window);
        let online = self.sum_online(&data.last_seen, now);
        data.online = online;
        data.trended = if data.trended == 0 {
            online
        } else {
            data.trended / 100 * TREND_DECAY_PCT + online / 100 * (100 - TREND_DECAY_PCT)
        };
    }

    fn sum_online(&self, last_seen: &HashMap<Account, Instant>, now: Instant) -> u128 {
        last_seen
            .iter()
            .filter(|(_, seen)| now.saturating_duration_since(**seen) <= self.window)
            .map(|(rep, _)| self.ledger.weight(rep))
            .fold(0u128, |acc, w| acc.saturating_add(w))
    }

    /// max(observed online weight, trend, configured floor)
    pub fn online_stake(&self) -> u128 {
        let data = self.data.lock().unwrap();
        data.online.max(data.trended).max(self.minimum)
    }

    pub fn trended(&self) -> u128 {
        self.data.lock().unwrap().trended
    }

    pub fn minimum(&self) -> u128 {
        self.minimum
    }

    /// Required lead of the winner over the runner-up.
    pub fn delta(&self, quorum_percent: u8) -> u128 {
        self.online_stake() / 100 * u128::from(quorum_percent)
    }

    pub fn minimum_principal_weight(&self) -> u128 {
        self.online_stake() / PRINCIPAL_WEIGHT_DIVISOR
    }

    pub fn online_count(&self) -> usize {
        self.data.lock().unwrap().last_seen.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orv_nullables::NullStore;
    use orv_types::{NetworkId, NetworkParams};

    fn setup(weights: &[(u64, u128)], minimum: u128) -> OnlineReps {
        let store = Arc::new(NullStore::new());
        for (rep, weight) in weights {
            store.set_weight(Account::from(*rep), *weight);
        }
        let ledger = Arc::new(Ledger::new(store, NetworkParams::new(NetworkId::Test)));
        OnlineReps::new(ledger, minimum, Duration::from_secs(300))
    }

    #[test]
    fn floor_applies_when_nobody_is_online() {
        let reps = setup(&[], 1_000);
        assert_eq!(reps.online_stake(), 1_000);
        assert_eq!(reps.delta(50), 500);
        assert_eq!(reps.minimum_principal_weight(), 1);
    }

    #[test]
    fn observed_weight_raises_online_stake() {
        let reps = setup(&[(1, 4_000), (2, 6_000)], 1_000);
        let now = Instant::now();
        reps.observe(&Account::from(1), now);
        reps.observe(&Account::from(2), now);
        assert_eq!(reps.online_stake(), 10_000);
        assert_eq!(reps.online_count(), 2);
    }

    #[test]
    fn weightless_voters_are_ignored() {
        let reps = setup(&[], 0);
        reps.observe(&Account::from(3), Instant::now());
        assert_eq!(reps.online_count(), 0);
    }

    #[test]
    fn stale_reps_leave_but_trend_lingers() {
        let reps = setup(&[(1, 10_000)], 0);
        let start = Instant::now();
        reps.observe(&Account::from(1), start);
        reps.sample(start);
        assert_eq!(reps.trended(), 10_000);

        reps.sample(start + Duration::from_secs(600));
        assert_eq!(reps.online_count(), 0);
        assert_eq!(reps.trended(), 9_500);
        assert_eq!(reps.online_stake(), 9_500);
    }
}
