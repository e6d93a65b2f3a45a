//! Node configuration with TOML file support.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use orv_consensus::{ElectionConfig, RequestAggregatorConfig, VotingConfig};
use orv_types::NetworkId;

use crate::logging::LogFormat;
use crate::NodeError;

/// Configuration for a consensus node.
///
/// Can be loaded from a TOML file via [`NodeConfig::from_toml_file`] or
/// built programmatically (e.g. for tests). Every field has a default, so an
/// empty file is a valid configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Which network's constants to use.
    #[serde(default = "default_network")]
    pub network: NetworkId,

    /// Log format: "human" or "json".
    #[serde(default)]
    pub log_format: LogFormat,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub elections: ElectionConfig,

    #[serde(default)]
    pub voting: VotingConfig,

    #[serde(default)]
    pub request_aggregator: RequestAggregatorConfig,

    #[serde(default)]
    pub cementing: CementingConfig,
}

/// Confirmation height processor tunables.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CementingConfig {
    /// A pending run is written on its own once it has waited this long, even
    /// when more work is queued behind it.
    pub batch_separate_pending_min_time_ms: u64,
    /// Log how long each cementing write took.
    pub enable_timing_logging: bool,
    /// Cap on the checkpoints, receive-source pairs, pending writes and
    /// per-account cache one cementing walk keeps. Reaching it forces a
    /// blocking write.
    pub max_items: usize,
}

impl Default for CementingConfig {
    fn default() -> Self {
        Self {
            batch_separate_pending_min_time_ms: 50,
            enable_timing_logging: false,
            max_items: crate::cementing::MAX_ITEMS,
        }
    }
}

impl CementingConfig {
    pub fn batch_separate_pending_min_time(&self) -> Duration {
        Duration::from_millis(self.batch_separate_pending_min_time_ms)
    }
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_network() -> NetworkId {
    NetworkId::Live
}

fn default_log_level() -> String {
    "info".to_string()
}

// ── Impl ───────────────────────────────────────────────────────────────

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, NodeError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| NodeError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, NodeError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> Result<String, NodeError> {
        toml::to_string_pretty(self).map_err(|e| NodeError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), NodeError> {
        self.elections.validate()?;
        self.request_aggregator.validate()?;
        if self.voting.votes_cache_max == 0 {
            return Err(NodeError::Config(
                "voting.votes_cache_max must be positive".to_string(),
            ));
        }
        if self.cementing.max_items < 2 {
            return Err(NodeError::Config(
                "cementing.max_items must be at least 2".to_string(),
            ));
        }
        Ok(())
    }

    /// Defaults for the given network.
    pub fn for_network(network: NetworkId) -> Self {
        Self {
            network,
            ..Self::default()
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network: default_network(),
            log_format: LogFormat::default(),
            log_level: default_log_level(),
            elections: ElectionConfig::default(),
            voting: VotingConfig::default(),
            request_aggregator: RequestAggregatorConfig::default(),
            cementing: CementingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = NodeConfig::for_network(NetworkId::Beta);
        let toml_str = config.to_toml_string().unwrap();
        let parsed = NodeConfig::from_toml_str(&toml_str).expect("should parse");
        assert_eq!(parsed, config);
    }

    #[test]
    fn minimal_toml_uses_defaults() {
        let config = NodeConfig::from_toml_str("").expect("empty toml should use defaults");
        assert_eq!(config.network, NetworkId::Live);
        assert_eq!(config.log_format, LogFormat::Human);
        assert_eq!(config.elections.online_weight_quorum, 50);
        assert_eq!(config.request_aggregator.max_queued_requests, 512);
        assert_eq!(
            config.cementing.batch_separate_pending_min_time(),
            Duration::from_millis(50)
        );
    }

    #[test]
    fn partial_toml_overrides() {
        let toml = r#"
            network = "test"
            log_format = "json"

            [elections]
            online_weight_quorum = 67

            [request_aggregator]
            max_queued_requests = 8
        "#;
        let config = NodeConfig::from_toml_str(toml).expect("should parse");
        assert_eq!(config.network, NetworkId::Test);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.elections.online_weight_quorum, 67);
        assert_eq!(config.elections.active_elections_size, 8000); // default
        assert_eq!(config.request_aggregator.max_queued_requests, 8);
        assert!(config.voting.enable_voting);
    }

    #[test]
    fn invalid_quorum_is_rejected() {
        let toml = r#"
            [elections]
            online_weight_quorum = 101
        "#;
        let err = NodeConfig::from_toml_str(toml).unwrap_err();
        assert!(matches!(err, NodeError::Consensus(_)));
    }

    #[test]
    fn cementing_cap_is_configurable_but_bounded() {
        let config = NodeConfig::from_toml_str("[cementing]\nmax_items = 64\n").unwrap();
        assert_eq!(config.cementing.max_items, 64);
        assert!(!config.cementing.enable_timing_logging);

        let err = NodeConfig::from_toml_str("[cementing]\nmax_items = 1\n").unwrap_err();
        assert!(matches!(err, NodeError::Config(_)));
    }

    #[test]
    fn malformed_toml_is_a_toml_error() {
        let err = NodeConfig::from_toml_str("network = ").unwrap_err();
        assert!(matches!(err, NodeError::Toml(_)));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "network = \"beta\"\nlog_level = \"debug\"").unwrap();
        let config = NodeConfig::from_toml_file(file.path()).unwrap();
        assert_eq!(config.network, NetworkId::Beta);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn missing_file_returns_config_error() {
        let result = NodeConfig::from_toml_file("/nonexistent/orv.toml");
        assert!(matches!(result, Err(NodeError::Config(_))));
    }
}
