//! Engine metrics
//!
//! Every [`StreamEngine`](crate::StreamEngine) owns its own [`EngineMetrics`];
//! there is no process-wide registry. Consumers poll
//! [`EngineMetrics::snapshot`] for a read-only name → value map, or build a
//! [`MetricsRegistry`] to expose the same counters in Prometheus text format.

mod registry;

pub use registry::MetricsRegistry;

use prometheus_client::metrics::counter::Counter;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors that can occur in the metrics subsystem
#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Metric encoding error: {0}")]
    EncodingError(String),
}

/// Counters maintained by one engine instance
#[derive(Debug, Default)]
pub struct EngineMetrics {
    /// Events accepted by `ingest` and enqueued
    pub events_ingested: Counter,
    /// Events whose processing completed and whose offset was marked
    pub events_processed: Counter,
    /// Events that arrived behind the watermark
    pub late_events: Counter,
    /// Late events dropped by the late-event policy
    pub events_dropped_late: Counter,
    /// Handler failures
    pub processing_errors: Counter,
    /// Sink failures
    pub sink_errors: Counter,
    /// Partition checkpoints taken
    pub checkpoints_created: Counter,
    /// Windows handed to user functions
    pub windows_emitted: Counter,
    /// Joined records produced
    pub join_results: Counter,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name, help text and counter for every metric
    pub(crate) fn counters(&self) -> [(&'static str, &'static str, &Counter); 9] {
        [
            ("events_ingested", "Events accepted for processing", &self.events_ingested),
            ("events_processed", "Events fully processed", &self.events_processed),
            ("late_events", "Events behind the watermark", &self.late_events),
            ("events_dropped_late", "Late events dropped by policy", &self.events_dropped_late),
            ("processing_errors", "User function failures", &self.processing_errors),
            ("sink_errors", "Output sink failures", &self.sink_errors),
            ("checkpoints_created", "Partition checkpoints taken", &self.checkpoints_created),
            ("windows_emitted", "Completed windows processed", &self.windows_emitted),
            ("join_results", "Joined records produced", &self.join_results),
        ]
    }

    /// Point-in-time copy of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self
                .counters()
                .iter()
                .map(|(name, _, counter)| (name.to_string(), counter.get()))
                .collect(),
        }
    }
}

/// Read-only view of the engine counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    counters: BTreeMap<String, u64>,
}

impl MetricsSnapshot {
    /// Value of a counter, 0 for unknown names
    pub fn get(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.counters.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn as_map(&self) -> &BTreeMap<String, u64> {
        &self.counters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_starts_at_zero() {
        let metrics = EngineMetrics::new();
        let snapshot = metrics.snapshot();

        for name in [
            "events_ingested",
            "events_processed",
            "late_events",
            "processing_errors",
            "sink_errors",
            "checkpoints_created",
        ] {
            assert_eq!(snapshot.get(name), 0, "{}", name);
            assert!(snapshot.as_map().contains_key(name));
        }
        assert_eq!(snapshot.get("no_such_metric"), 0);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let metrics = EngineMetrics::new();
        metrics.events_ingested.inc();
        let before = metrics.snapshot();

        metrics.events_ingested.inc_by(4);

        assert_eq!(before.get("events_ingested"), 1);
        assert_eq!(metrics.snapshot().get("events_ingested"), 5);
    }

    #[test]
    fn test_instances_are_independent() {
        let a = EngineMetrics::new();
        let b = EngineMetrics::new();
        a.sink_errors.inc();

        assert_eq!(a.snapshot().get("sink_errors"), 1);
        assert_eq!(b.snapshot().get("sink_errors"), 0);
    }
}
