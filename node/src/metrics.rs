//! Prometheus metrics for the node.
//!
//! Every [`Stats`] counter is mirrored into one labelled gauge vector so the
//! exposition stays in step with whatever the consensus code counts. A few
//! queue and ledger sizes are exported alongside. [`NodeMetrics`] owns a
//! dedicated [`Registry`] that can be encoded into the Prometheus text format.

use prometheus::{
    register_int_gauge_vec_with_registry, register_int_gauge_with_registry, Encoder, IntGauge,
    IntGaugeVec, Opts, Registry, TextEncoder,
};

use orv_utils::Stats;

use crate::NodeError;

/// Central collection of all node-level Prometheus metrics.
pub struct NodeMetrics {
    /// The Prometheus registry that owns every metric below.
    pub registry: Registry,

    /// Mirror of the in-process stat counters, labelled by type, detail and
    /// direction.
    pub stats: IntGaugeVec,

    // ── Gauges ──────────────────────────────────────────────────────────
    /// Current number of active elections.
    pub active_elections: IntGauge,
    /// Blocks at or below their account's confirmation height.
    pub cemented_count: IntGauge,
    /// Current number of blocks in the ledger.
    pub block_count: IntGauge,
    /// Endpoints with confirmation requests waiting in the aggregator.
    pub aggregator_pools: IntGauge,
    /// Confirmed blocks waiting for the confirmation height processor.
    pub cementing_backlog: IntGauge,
}

/// Point-in-time sizes the node reports alongside its counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NodeGauges {
    pub active_elections: usize,
    pub cemented_count: u64,
    pub block_count: u64,
    pub aggregator_pools: usize,
    pub cementing_backlog: usize,
}

impl NodeMetrics {
    /// Create a fresh set of metrics, all registered under a new
    /// [`Registry`].
    pub fn new() -> Result<Self, NodeError> {
        let registry = Registry::new();

        let stats = register_int_gauge_vec_with_registry!(
            Opts::new("orv_stats", "Node statistics counters"),
            &["type", "detail", "dir"],
            registry
        )?;

        let active_elections = register_int_gauge_with_registry!(
            Opts::new("orv_active_elections", "Current number of active elections"),
            registry
        )?;

        let cemented_count = register_int_gauge_with_registry!(
            Opts::new("orv_cemented_count", "Number of cemented blocks"),
            registry
        )?;

        let block_count = register_int_gauge_with_registry!(
            Opts::new("orv_block_count", "Current number of blocks in the ledger"),
            registry
        )?;

        let aggregator_pools = register_int_gauge_with_registry!(
            Opts::new(
                "orv_aggregator_pools",
                "Endpoints with queued confirmation requests"
            ),
            registry
        )?;

        let cementing_backlog = register_int_gauge_with_registry!(
            Opts::new(
                "orv_cementing_backlog",
                "Confirmed blocks awaiting cementing"
            ),
            registry
        )?;

        Ok(Self {
            registry,
            stats,
            active_elections,
            cemented_count,
            block_count,
            aggregator_pools,
            cementing_backlog,
        })
    }

    /// Copy every counter in `stats` into the labelled gauge vector.
    pub fn record_stats(&self, stats: &Stats) {
        for (stat_type, detail, dir, value) in stats.snapshot() {
            self.stats
                .with_label_values(&[stat_type.as_str(), detail.as_str(), dir.as_str()])
                .set(clamp(value));
        }
    }

    pub fn record_gauges(&self, gauges: &NodeGauges) {
        self.active_elections.set(clamp(gauges.active_elections as u64));
        self.cemented_count.set(clamp(gauges.cemented_count));
        self.block_count.set(clamp(gauges.block_count));
        self.aggregator_pools.set(clamp(gauges.aggregator_pools as u64));
        self.cementing_backlog
            .set(clamp(gauges.cementing_backlog as u64));
    }

    /// Encode the registry in the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, NodeError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| NodeError::Config(e.to_string()))
    }
}

fn clamp(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use orv_utils::{DetailType, Direction, StatType};

    #[test]
    fn stats_are_exported_with_labels() {
        let metrics = NodeMetrics::new().unwrap();
        let stats = Stats::new();
        stats.add(StatType::ConfirmationHeight, DetailType::BlocksConfirmed, 3);
        metrics.record_stats(&stats);

        let gauge = metrics.stats.with_label_values(&[
            StatType::ConfirmationHeight.as_str(),
            DetailType::BlocksConfirmed.as_str(),
            Direction::In.as_str(),
        ]);
        assert_eq!(gauge.get(), 3);
    }

    #[test]
    fn encoded_text_contains_gauges() {
        let metrics = NodeMetrics::new().unwrap();
        metrics.record_gauges(&NodeGauges {
            active_elections: 2,
            cemented_count: 7,
            ..NodeGauges::default()
        });
        let text = metrics.encode().unwrap();
        assert!(text.contains("orv_active_elections 2"));
        assert!(text.contains("orv_cemented_count 7"));
    }

    #[test]
    fn registries_are_independent() {
        // Each node owns its registry, so two instances never collide.
        let first = NodeMetrics::new().unwrap();
        let second = NodeMetrics::new().unwrap();
        first.active_elections.set(1);
        assert_eq!(second.active_elections.get(), 0);
    }
}
