//! Partition assignment for incoming events

use crate::error::{ValidationError, ValidationResult};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use stream_engine_types::StreamEvent;

/// Caller-supplied partition function
pub type PartitionFn = Arc<dyn Fn(&StreamEvent) -> u32 + Send + Sync>;

/// Built-in strategies selectable from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PartitionStrategyKind {
    /// Deterministic hash of the event key
    #[default]
    Hash,
    /// Rotate through partitions; not stable across restarts
    RoundRobin,
}

/// Partitioning strategy
#[derive(Clone)]
pub enum PartitionStrategy {
    /// Use key hash for partitioning
    Hash,
    /// Round-robin partitioning
    RoundRobin,
    /// Caller-supplied function; results outside `[0, N)` are rejected
    Custom(PartitionFn),
}

impl fmt::Debug for PartitionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionStrategy::Hash => write!(f, "Hash"),
            PartitionStrategy::RoundRobin => write!(f, "RoundRobin"),
            PartitionStrategy::Custom(_) => write!(f, "Custom(<fn>)"),
        }
    }
}

impl From<PartitionStrategyKind> for PartitionStrategy {
    fn from(kind: PartitionStrategyKind) -> Self {
        match kind {
            PartitionStrategyKind::Hash => PartitionStrategy::Hash,
            PartitionStrategyKind::RoundRobin => PartitionStrategy::RoundRobin,
        }
    }
}

/// Assigns events to one of `num_partitions` partitions.
///
/// An event that already carries a partition keeps it, provided it is in
/// range.
#[derive(Debug)]
pub struct Partitioner {
    strategy: PartitionStrategy,
    num_partitions: u32,
    next: AtomicU64,
}

impl Partitioner {
    pub fn new(strategy: PartitionStrategy, num_partitions: u32) -> ValidationResult<Self> {
        if num_partitions == 0 {
            return Err(ValidationError::InvalidConfig {
                field: "num_partitions".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }

        Ok(Self {
            strategy,
            num_partitions,
            next: AtomicU64::new(0),
        })
    }

    pub fn num_partitions(&self) -> u32 {
        self.num_partitions
    }

    pub fn strategy(&self) -> &PartitionStrategy {
        &self.strategy
    }

    /// Choose the partition for an event
    pub fn assign(&self, event: &StreamEvent) -> ValidationResult<u32> {
        let partition = match (event.partition(), &self.strategy) {
            (Some(preset), _) => preset,
            (None, PartitionStrategy::Hash) => {
                (hash_key(event.key()) % u64::from(self.num_partitions)) as u32
            }
            (None, PartitionStrategy::RoundRobin) => {
                let n = self.next.fetch_add(1, Ordering::Relaxed);
                (n % u64::from(self.num_partitions)) as u32
            }
            (None, PartitionStrategy::Custom(f)) => f(event),
        };

        if partition >= self.num_partitions {
            return Err(ValidationError::PartitionOutOfRange {
                partition,
                partitions: self.num_partitions,
            });
        }

        Ok(partition)
    }
}

/// Stable hash of a partition key
pub fn hash_key(key: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}
