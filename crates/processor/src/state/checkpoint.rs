//! Checkpoints and the periodic checkpoint coordinator
//!
//! A [`Checkpoint`] is the copy of one partition's state map plus its
//! highest processed offset. The [`CheckpointCoordinator`] takes one for every
//! partition on a fixed interval and hands them to a [`CheckpointSink`]; the
//! engine itself never decides how or where checkpoints are stored.
//!
//! The coordinator locks a partition only while its state map is copied. The
//! export to the sink happens after the lock is released.

use crate::error::{StateError, StateResult};
use crate::metrics::EngineMetrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Point-in-time snapshot of one partition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub checkpoint_id: String,
    pub partition_id: u32,
    pub state_snapshot: BTreeMap<String, Value>,
    /// Highest offset fully processed when the snapshot was taken
    pub processed_offset: Option<u64>,
    /// Changelog records covered by this snapshot
    pub changes_consumed: usize,
    pub timestamp: DateTime<Utc>,
    /// SHA-256 over partition, snapshot and offset
    pub checksum: String,
}

impl Checkpoint {
    pub fn new(
        partition_id: u32,
        state_snapshot: BTreeMap<String, Value>,
        processed_offset: Option<u64>,
        changes_consumed: usize,
    ) -> Self {
        let timestamp = Utc::now();
        let checksum = Self::calculate_checksum(partition_id, &state_snapshot, processed_offset);

        Self {
            checkpoint_id: format!("p{}-{}", partition_id, timestamp.timestamp_micros()),
            partition_id,
            state_snapshot,
            processed_offset,
            changes_consumed,
            timestamp,
            checksum,
        }
    }

    fn calculate_checksum(
        partition_id: u32,
        state_snapshot: &BTreeMap<String, Value>,
        processed_offset: Option<u64>,
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(partition_id.to_be_bytes());
        hasher.update(serde_json::to_vec(state_snapshot).unwrap_or_default());
        match processed_offset {
            Some(offset) => hasher.update(offset.to_be_bytes()),
            None => hasher.update(b"none"),
        }
        format!("{:x}", hasher.finalize())
    }

    /// Validate the checkpoint's integrity
    pub fn validate(&self) -> StateResult<()> {
        let actual = Self::calculate_checksum(
            self.partition_id,
            &self.state_snapshot,
            self.processed_offset,
        );

        if actual != self.checksum {
            return Err(StateError::ChecksumMismatch {
                checkpoint_id: self.checkpoint_id.clone(),
                expected: self.checksum.clone(),
                actual,
            });
        }

        Ok(())
    }

    pub fn entry_count(&self) -> usize {
        self.state_snapshot.len()
    }
}

/// Receives checkpoints from the coordinator and makes them durable
#[async_trait]
pub trait CheckpointSink: Send + Sync {
    async fn persist(&self, checkpoint: Checkpoint) -> anyhow::Result<()>;
}

/// Keeps the newest `retained` checkpoints per partition in memory
#[derive(Debug)]
pub struct InMemoryCheckpointSink {
    retained: usize,
    checkpoints: DashMap<u32, VecDeque<Checkpoint>>,
}

impl InMemoryCheckpointSink {
    pub fn new(retained: usize) -> Self {
        Self {
            retained: retained.max(1),
            checkpoints: DashMap::new(),
        }
    }

    /// Newest checkpoint of a partition
    pub fn latest(&self, partition: u32) -> Option<Checkpoint> {
        self.checkpoints
            .get(&partition)
            .and_then(|list| list.back().cloned())
    }

    /// Retained checkpoints of a partition, oldest first
    pub fn history(&self, partition: u32) -> Vec<Checkpoint> {
        self.checkpoints
            .get(&partition)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Total checkpoints currently retained
    pub fn len(&self) -> usize {
        self.checkpoints.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CheckpointSink for InMemoryCheckpointSink {
    async fn persist(&self, checkpoint: Checkpoint) -> anyhow::Result<()> {
        let mut list = self.checkpoints.entry(checkpoint.partition_id).or_default();
        list.push_back(checkpoint);
        while list.len() > self.retained {
            list.pop_front();
        }
        Ok(())
    }
}

/// Something whose partitions can be snapshotted one at a time
pub trait CheckpointSource: Send + Sync + 'static {
    fn partition_count(&self) -> u32;

    /// Snapshot one partition, holding its lock only for the copy
    fn checkpoint_partition(&self, partition: u32) -> StateResult<Checkpoint>;
}

/// Checkpoint statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointStats {
    /// Checkpoint rounds completed (one round covers every partition)
    pub rounds: u64,
    /// Partition checkpoints created
    pub checkpoints_created: u64,
    /// Checkpoints the sink failed to persist
    pub persist_failures: u64,
    /// Wall-clock duration of the last round
    pub last_round_duration_ms: u64,
    pub last_checkpoint_at: Option<DateTime<Utc>>,
}

/// Periodic checkpointing of every partition
pub struct CheckpointCoordinator<S: CheckpointSource> {
    source: Arc<S>,
    sink: Arc<dyn CheckpointSink>,
    interval: Duration,
    metrics: Arc<EngineMetrics>,
    stats: Arc<RwLock<CheckpointStats>>,
    task_handle: Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: Mutex<Option<oneshot::Sender<bool>>>,
}

impl<S: CheckpointSource> CheckpointCoordinator<S> {
    pub fn new(
        source: Arc<S>,
        sink: Arc<dyn CheckpointSink>,
        interval: Duration,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            source,
            sink,
            interval,
            metrics,
            stats: Arc::new(RwLock::new(CheckpointStats::default())),
            task_handle: Mutex::new(None),
            shutdown_tx: Mutex::new(None),
        }
    }

    /// Start periodic checkpointing on the current tokio runtime
    pub async fn start(&self) {
        let mut handle_guard = self.task_handle.lock().await;

        if handle_guard.is_some() {
            warn!("Checkpoint coordinator already started");
            return;
        }

        info!(interval_ms = self.interval.as_millis() as u64, "Starting checkpoint coordinator");

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<bool>();
        *self.shutdown_tx.lock().await = Some(shutdown_tx);

        let source = Arc::clone(&self.source);
        let sink = Arc::clone(&self.sink);
        let metrics = Arc::clone(&self.metrics);
        let stats = Arc::clone(&self.stats);
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(interval);
            interval_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; skip it so the first
            // checkpoint is taken one interval after start.
            interval_timer.tick().await;

            loop {
                tokio::select! {
                    _ = interval_timer.tick() => {
                        if let Err(e) = Self::run_round(&source, &sink, &metrics, &stats).await {
                            error!(error = %e, "Checkpoint failed");
                        }
                    }
                    final_checkpoint = &mut shutdown_rx => {
                        info!("Checkpoint coordinator shutting down");
                        if final_checkpoint.unwrap_or(false) {
                            if let Err(e) = Self::run_round(&source, &sink, &metrics, &stats).await {
                                error!(error = %e, "Final checkpoint failed");
                            }
                        }
                        break;
                    }
                }
            }
        });

        *handle_guard = Some(handle);
    }

    /// Checkpoint every partition now and return the checkpoints taken
    pub async fn checkpoint_all(&self) -> StateResult<Vec<Checkpoint>> {
        Self::run_round(&self.source, &self.sink, &self.metrics, &self.stats).await
    }

    async fn run_round(
        source: &Arc<S>,
        sink: &Arc<dyn CheckpointSink>,
        metrics: &EngineMetrics,
        stats: &RwLock<CheckpointStats>,
    ) -> StateResult<Vec<Checkpoint>> {
        let started = Instant::now();
        let mut taken = Vec::new();
        let mut first_error = None;

        for partition in 0..source.partition_count() {
            let checkpoint = source.checkpoint_partition(partition)?;
            metrics.checkpoints_created.inc();
            stats.write().checkpoints_created += 1;

            let checkpoint_id = checkpoint.checkpoint_id.clone();
            match sink.persist(checkpoint.clone()).await {
                Ok(()) => {
                    debug!(
                        partition,
                        checkpoint_id = %checkpoint_id,
                        entries = checkpoint.entry_count(),
                        "checkpoint persisted"
                    );
                }
                Err(e) => {
                    error!(partition, checkpoint_id = %checkpoint_id, error = %e, "failed to persist checkpoint");
                    stats.write().persist_failures += 1;
                    if first_error.is_none() {
                        first_error = Some(StateError::PersistFailed {
                            checkpoint_id,
                            reason: e.to_string(),
                        });
                    }
                }
            }

            taken.push(checkpoint);
        }

        {
            let mut guard = stats.write();
            guard.rounds += 1;
            guard.last_round_duration_ms = started.elapsed().as_millis() as u64;
            guard.last_checkpoint_at = Some(Utc::now());
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(taken),
        }
    }

    /// Get checkpoint statistics
    pub fn stats(&self) -> CheckpointStats {
        self.stats.read().clone()
    }

    pub async fn is_running(&self) -> bool {
        self.task_handle.lock().await.is_some()
    }

    /// Stop the periodic task after its current round, optionally taking a
    /// final checkpoint first
    pub async fn shutdown(&self, final_checkpoint: bool) {
        if let Some(tx) = self.shutdown_tx.lock().await.take() {
            let _ = tx.send(final_checkpoint);
        }

        if let Some(handle) = self.task_handle.lock().await.take() {
            if let Err(e) = handle.await {
                error!(error = %e, "Checkpoint task panicked");
            }
        } else if final_checkpoint {
            if let Err(e) = self.checkpoint_all().await {
                error!(error = %e, "Final checkpoint failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateStore;
    use serde_json::json;

    struct Stores {
        stores: Vec<parking_lot::Mutex<StateStore>>,
    }

    impl Stores {
        fn new(n: u32) -> Self {
            Self {
                stores: (0..n)
                    .map(|p| parking_lot::Mutex::new(StateStore::new(p, 100)))
                    .collect(),
            }
        }
    }

    impl CheckpointSource for Stores {
        fn partition_count(&self) -> u32 {
            self.stores.len() as u32
        }

        fn checkpoint_partition(&self, partition: u32) -> StateResult<Checkpoint> {
            let store = self
                .stores
                .get(partition as usize)
                .ok_or(StateError::UnknownPartition {
                    partition,
                    partitions: self.partition_count(),
                })?;
            Ok(store.lock().checkpoint(Some(u64::from(partition))))
        }
    }

    struct FailingSink;

    #[async_trait]
    impl CheckpointSink for FailingSink {
        async fn persist(&self, _checkpoint: Checkpoint) -> anyhow::Result<()> {
            anyhow::bail!("disk full")
        }
    }

    #[test]
    fn test_checkpoint_validation() {
        let mut snapshot = BTreeMap::new();
        snapshot.insert("a".to_string(), json!(1));
        let mut checkpoint = Checkpoint::new(0, snapshot, Some(7), 1);

        assert!(checkpoint.validate().is_ok());
        assert_eq!(checkpoint.entry_count(), 1);

        checkpoint.state_snapshot.insert("b".to_string(), json!(2));
        let err = checkpoint.validate().unwrap_err();
        assert!(matches!(err, StateError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_checksum_covers_offset() {
        let mut checkpoint = Checkpoint::new(0, BTreeMap::new(), Some(7), 0);
        checkpoint.processed_offset = Some(8);
        assert!(checkpoint.validate().is_err());
    }

    #[test]
    fn test_checkpoint_serde() {
        let checkpoint = Checkpoint::new(2, BTreeMap::new(), None, 0);
        let json = serde_json::to_string(&checkpoint).unwrap();
        let back: Checkpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, checkpoint);
        assert!(back.validate().is_ok());
    }

    #[tokio::test]
    async fn test_in_memory_sink_retention() {
        let sink = InMemoryCheckpointSink::new(2);
        for offset in 0..5 {
            sink.persist(Checkpoint::new(1, BTreeMap::new(), Some(offset), 0))
                .await
                .unwrap();
        }

        let history = sink.history(1);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].processed_offset, Some(3));
        assert_eq!(sink.latest(1).unwrap().processed_offset, Some(4));
        assert!(sink.latest(0).is_none());
        assert_eq!(sink.len(), 2);
    }

    #[tokio::test]
    async fn test_checkpoint_all() {
        let source = Arc::new(Stores::new(3));
        source.stores[1].lock().put("x", json!(1));
        let sink = Arc::new(InMemoryCheckpointSink::new(3));
        let metrics = Arc::new(EngineMetrics::new());
        let coordinator = CheckpointCoordinator::new(
            source.clone(),
            sink.clone(),
            Duration::from_secs(60),
            metrics.clone(),
        );

        let taken = coordinator.checkpoint_all().await.unwrap();

        assert_eq!(taken.len(), 3);
        assert_eq!(sink.latest(1).unwrap().state_snapshot.get("x"), Some(&json!(1)));
        assert_eq!(metrics.snapshot().get("checkpoints_created"), 3);
        assert_eq!(coordinator.stats().rounds, 1);
        assert!(source.stores[1].lock().changelog().is_empty());
    }

    #[tokio::test]
    async fn test_persist_failure_counted() {
        let source = Arc::new(Stores::new(2));
        let metrics = Arc::new(EngineMetrics::new());
        let coordinator = CheckpointCoordinator::new(
            source,
            Arc::new(FailingSink),
            Duration::from_secs(60),
            metrics,
        );

        let err = coordinator.checkpoint_all().await.unwrap_err();
        assert!(matches!(err, StateError::PersistFailed { .. }));
        assert_eq!(coordinator.stats().persist_failures, 2);
    }

    #[tokio::test]
    async fn test_periodic_checkpoints() {
        let source = Arc::new(Stores::new(1));
        let sink = Arc::new(InMemoryCheckpointSink::new(10));
        let coordinator = CheckpointCoordinator::new(
            source,
            sink.clone(),
            Duration::from_millis(20),
            Arc::new(EngineMetrics::new()),
        );

        coordinator.start().await;
        assert!(coordinator.is_running().await);
        tokio::time::sleep(Duration::from_millis(110)).await;
        coordinator.shutdown(true).await;

        let stats = coordinator.stats();
        assert!(stats.rounds >= 2, "rounds = {}", stats.rounds);
        assert!(!sink.is_empty());
        assert!(!coordinator.is_running().await);
    }
}
