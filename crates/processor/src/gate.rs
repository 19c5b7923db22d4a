//! Per-partition exactly-once gate
//!
//! The gate remembers the highest offset whose processing completed on a
//! partition. A redelivered event at or below that offset is filtered before
//! it reaches any user function.
//!
//! This gives exactly-once processing *attempts*: each offset runs to
//! completion at most once. It does not make external side effects exactly
//! once. Sinks that need that must be idempotent, deduplicating on
//! [`StreamOutput::output_id`](crate::core::StreamOutput::output_id).

use serde::{Deserialize, Serialize};

/// Highest-processed-offset ledger for one partition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExactlyOnceGate {
    processed_offset: Option<u64>,
}

impl ExactlyOnceGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when `offset` was already processed
    pub fn is_duplicate(&self, offset: u64) -> bool {
        matches!(self.processed_offset, Some(processed) if offset <= processed)
    }

    /// Record successful processing; never moves backwards
    pub fn mark_processed(&mut self, offset: u64) {
        self.processed_offset = Some(self.processed_offset.map_or(offset, |p| p.max(offset)));
    }

    pub fn processed_offset(&self) -> Option<u64> {
        self.processed_offset
    }

    /// Reset to a checkpointed offset
    pub fn restore(&mut self, processed_offset: Option<u64>) {
        self.processed_offset = processed_offset;
    }
}
