//! Tunables for elections, voting and the request aggregator.

use orv_types::{Amount, NetworkId};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ConsensusError;

/// Election and quorum settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectionConfig {
    /// Floor for online stake; also the minimum total tally for quorum.
    pub online_weight_minimum: Amount,
    /// Percentage of online stake the winner must lead the runner-up by.
    pub online_weight_quorum: u8,
    /// Cap on concurrently active elections.
    pub active_elections_size: usize,
    /// Confirmed elections linger this many base latencies before eviction.
    pub confirmed_duration_factor: u32,
    /// Pause between request loop passes.
    pub request_interval_ms: u64,
    /// Recently confirmed roots remembered to suppress re-elections.
    pub recently_confirmed_size: usize,
    /// Votes cached for hashes without an election.
    pub inactive_votes_cache_size: usize,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            online_weight_minimum: Amount::raw(60_000_000 * 10u128.pow(30)),
            online_weight_quorum: 50,
            active_elections_size: 8000,
            confirmed_duration_factor: 5,
            request_interval_ms: 500,
            recently_confirmed_size: 65536,
            inactive_votes_cache_size: 16384,
        }
    }
}

impl ElectionConfig {
    pub fn validate(&self) -> Result<(), ConsensusError> {
        if self.online_weight_quorum > 100 {
            return Err(ConsensusError::InvalidConfig(format!(
                "online_weight_quorum must be at most 100, got {}",
                self.online_weight_quorum
            )));
        }
        if self.active_elections_size == 0 {
            return Err(ConsensusError::InvalidConfig(
                "active_elections_size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn request_interval(&self) -> Duration {
        Duration::from_millis(self.request_interval_ms)
    }
}

/// Local vote generation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VotingConfig {
    pub enable_voting: bool,
    /// Generated votes kept for reuse by the request aggregator.
    pub votes_cache_max: usize,
    /// How long the generator waits to fill a vote before broadcasting it.
    pub vote_generator_delay_ms: u64,
}

impl Default for VotingConfig {
    fn default() -> Self {
        Self {
            enable_voting: true,
            votes_cache_max: 64 * 1024,
            vote_generator_delay_ms: 100,
        }
    }
}

impl VotingConfig {
    pub fn vote_generator_delay(&self) -> Duration {
        Duration::from_millis(self.vote_generator_delay_ms)
    }
}

/// Request aggregator sizing. Delays come from the network, not from here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestAggregatorConfig {
    /// Distinct endpoints that may have requests queued at once.
    pub max_queued_requests: usize,
    pub threads: usize,
}

impl Default for RequestAggregatorConfig {
    fn default() -> Self {
        Self {
            max_queued_requests: 512,
            threads: 1,
        }
    }
}

impl RequestAggregatorConfig {
    pub fn validate(&self) -> Result<(), ConsensusError> {
        if self.threads == 0 {
            return Err(ConsensusError::InvalidConfig(
                "request_aggregator.threads must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Longest a request may wait before being answered.
    pub fn max_delay(network: NetworkId) -> Duration {
        if network.is_test_network() {
            Duration::from_millis(50)
        } else {
            Duration::from_millis(300)
        }
    }

    /// Extra wait granted to a pool each time more requests arrive.
    pub fn small_delay(network: NetworkId) -> Duration {
        if network.is_test_network() {
            Duration::from_millis(10)
        } else {
            Duration::from_millis(50)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(ElectionConfig::default().validate().is_ok());
        assert!(RequestAggregatorConfig::default().validate().is_ok());
    }

    #[test]
    fn quorum_above_hundred_is_rejected() {
        let config = ElectionConfig {
            online_weight_quorum: 101,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConsensusError::InvalidConfig(_))));
    }

    #[test]
    fn test_network_shortens_aggregator_delays() {
        assert!(
            RequestAggregatorConfig::max_delay(NetworkId::Test)
                < RequestAggregatorConfig::max_delay(NetworkId::Live)
        );
        assert_eq!(
            RequestAggregatorConfig::small_delay(NetworkId::Test),
            Duration::from_millis(10)
        );
    }
}
