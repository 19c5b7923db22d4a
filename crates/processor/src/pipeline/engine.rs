//! The stream engine: registration, ingestion and lifecycle

use super::executor::{
    Envelope, ExecutorContext, JoinRegistration, PartitionExecutor, PartitionSet, PartitionStats,
    StreamRegistration,
};
use crate::aggregation::AggregationKind;
use crate::cep::{Pattern, PatternMatch};
use crate::config::EngineConfig;
use crate::core::{ProcessContext, StreamHandler, StreamOutput};
use crate::error::{ProcessorError, Result, ValidationError, ValidationResult};
use crate::join::JoinSpec;
use crate::metrics::{EngineMetrics, MetricsRegistry, MetricsSnapshot};
use crate::partition::{PartitionStrategy, Partitioner};
use crate::sink::{AsyncFnSink, FnSink, OutputSink, SinkDispatcher};
use crate::state::{
    Checkpoint, CheckpointCoordinator, CheckpointSink, CheckpointStats, InMemoryCheckpointSink,
};
use crate::watermark::{Watermark, WatermarkTracker};
use crate::window::{WindowAssigner, WindowSpec};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use stream_engine_types::StreamEvent;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Running,
    Stopped,
}

/// Producer side of one partition queue
struct PartitionInput {
    next_offset: u64,
    tx: Option<mpsc::Sender<Envelope>>,
}

/// Partitioned, windowed, checkpointed stream engine
///
/// Register sinks, streams and joins, then [`start`](Self::start) the engine
/// and feed it with [`ingest`](Self::ingest). Each partition is processed by
/// its own worker task; ordering holds within a partition only.
///
/// ```rust,no_run
/// use stream_processor::{EngineConfig, StreamEngine, StreamEvent};
/// use stream_processor::aggregation::AggregationKind;
/// use stream_processor::window::WindowSpec;
/// use serde_json::json;
///
/// # async fn example() -> stream_processor::Result<()> {
/// let mut engine = StreamEngine::new(EngineConfig::default())?;
/// engine.add_output_sink("stdout", |output| {
///     println!("{}: {}", output.output_id(), output.value);
///     Ok(())
/// })?;
/// engine.process_aggregate(
///     "spend",
///     WindowSpec::tumbling(5_000),
///     AggregationKind::Sum,
///     |event| event.numeric_field("amount").unwrap_or(0.0),
/// )?;
///
/// engine.start().await?;
/// engine
///     .ingest(vec![StreamEvent::new("user_1", json!({"amount": 12.5}), 1_000)])
///     .await?;
/// engine.shutdown().await?;
/// # Ok(())
/// # }
/// ```
pub struct StreamEngine {
    config: EngineConfig,
    partitioner: Partitioner,
    watermark: Arc<WatermarkTracker>,
    metrics: Arc<EngineMetrics>,
    registry: MetricsRegistry,
    partitions: Arc<PartitionSet>,
    inputs: Vec<Mutex<PartitionInput>>,
    streams: Vec<StreamRegistration>,
    joins: Vec<JoinRegistration>,
    sinks: Vec<Arc<dyn OutputSink>>,
    names: HashSet<String>,
    coordinator: CheckpointCoordinator<PartitionSet>,
    stop_tx: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
    lifecycle: Lifecycle,
}

impl StreamEngine {
    /// Create an engine from a validated configuration
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;

        let partitioner =
            Partitioner::new(config.partition_strategy.into(), config.num_partitions)?;
        let watermark = Arc::new(WatermarkTracker::new(config.watermark.max_out_of_order()));
        let metrics = Arc::new(EngineMetrics::new());
        let registry = MetricsRegistry::for_engine(&metrics);
        let partitions = Arc::new(PartitionSet::new(
            config.num_partitions,
            config.checkpoint.changelog_capacity,
        ));
        let inputs = (0..config.num_partitions)
            .map(|_| {
                Mutex::new(PartitionInput {
                    next_offset: 0,
                    tx: None,
                })
            })
            .collect();
        let sink: Arc<dyn CheckpointSink> = Arc::new(InMemoryCheckpointSink::new(
            config.checkpoint.retained_per_partition,
        ));
        let coordinator = CheckpointCoordinator::new(
            partitions.clone(),
            sink,
            config.checkpoint.interval(),
            metrics.clone(),
        );
        let (stop_tx, _) = watch::channel(false);

        info!(
            name = %config.name,
            partitions = config.num_partitions,
            max_out_of_order_ms = config.watermark.max_out_of_order_ms,
            "Created stream engine"
        );

        Ok(Self {
            config,
            partitioner,
            watermark,
            metrics,
            registry,
            partitions,
            inputs,
            streams: Vec::new(),
            joins: Vec::new(),
            sinks: Vec::new(),
            names: HashSet::new(),
            coordinator,
            stop_tx,
            workers: Vec::new(),
            lifecycle: Lifecycle::Created,
        })
    }

    /// Replace the partitioning strategy, e.g. with a custom function
    pub fn with_partition_strategy(mut self, strategy: PartitionStrategy) -> Result<Self> {
        self.ensure_created("change the partition strategy")?;
        self.partitioner = Partitioner::new(strategy, self.config.num_partitions)?;
        Ok(self)
    }

    /// Send checkpoints to `sink` instead of the default in-memory sink
    pub fn with_checkpoint_sink(mut self, sink: Arc<dyn CheckpointSink>) -> Result<Self> {
        self.ensure_created("change the checkpoint sink")?;
        self.coordinator = CheckpointCoordinator::new(
            self.partitions.clone(),
            sink,
            self.config.checkpoint.interval(),
            self.metrics.clone(),
        );
        Ok(self)
    }

    /// Register a synchronous output sink
    pub fn add_output_sink<F>(&mut self, name: impl Into<String>, f: F) -> Result<()>
    where
        F: Fn(&StreamOutput) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.add_sink(Arc::new(FnSink::new(name, f)))
    }

    /// Register an asynchronous output sink
    pub fn add_async_output_sink<F, Fut>(&mut self, name: impl Into<String>, f: F) -> Result<()>
    where
        F: Fn(StreamOutput) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.add_sink(Arc::new(AsyncFnSink::new(name, f)))
    }

    pub fn add_sink(&mut self, sink: Arc<dyn OutputSink>) -> Result<()> {
        self.ensure_created("add an output sink")?;
        debug!(sink = sink.name(), "Registered output sink");
        self.sinks.push(sink);
        Ok(())
    }

    /// Register a user function
    ///
    /// Without a window the function is called once per event with a
    /// one-element slice. With a window it is called once per completed
    /// window with the window's events. A returned value is emitted to every
    /// sink.
    pub fn process_stream<F>(
        &mut self,
        name: impl Into<String>,
        f: F,
        window: Option<WindowSpec>,
    ) -> Result<()>
    where
        F: Fn(&mut ProcessContext<'_, '_>, &[StreamEvent]) -> anyhow::Result<Option<Value>>
            + Send
            + Sync
            + 'static,
    {
        let name = name.into();
        self.register_name(&name, "register a stream")?;

        let membership = self.config.window.sliding_membership;
        let assigner = match window.map(|spec| WindowAssigner::new(spec, membership)).transpose() {
            Ok(assigner) => assigner,
            Err(e) => {
                self.names.remove(&name);
                return Err(e.into());
            }
        };

        info!(stream = %name, window = ?window, "Registered stream");
        let handler: StreamHandler = Arc::new(f);
        self.streams.push(StreamRegistration {
            name,
            handler,
            assigner,
        });
        Ok(())
    }

    /// Register a windowed aggregation emitting `{aggregation, value, count}`
    pub fn process_aggregate<F>(
        &mut self,
        name: impl Into<String>,
        window: WindowSpec,
        kind: AggregationKind,
        value_fn: F,
    ) -> Result<()>
    where
        F: Fn(&StreamEvent) -> f64 + Send + Sync + 'static,
    {
        self.process_stream(
            name,
            move |_ctx, events| {
                Ok(Some(json!({
                    "aggregation": kind.name(),
                    "value": kind.apply(events, &value_fn),
                    "count": events.len(),
                })))
            },
            Some(window),
        )
    }

    /// Register a pattern evaluated over each completed window
    pub fn process_pattern(
        &mut self,
        name: impl Into<String>,
        pattern: Pattern,
        window: WindowSpec,
    ) -> Result<()> {
        self.process_stream(
            name,
            move |ctx, events| {
                if !pattern.matches(events) {
                    return Ok(None);
                }
                let found = PatternMatch::from_events(ctx.stream(), events);
                Ok(Some(serde_json::to_value(found)?))
            },
            Some(window),
        )
    }

    /// Register a time-bounded join between two logical streams
    pub fn add_join(&mut self, name: impl Into<String>, spec: JoinSpec) -> Result<()> {
        let name = name.into();
        self.register_name(&name, "register a join")?;
        info!(join = %name, window_ms = spec.window_ms, "Registered join");
        self.joins.push(JoinRegistration { name, spec });
        Ok(())
    }

    /// Spawn the partition workers and the checkpoint task
    pub async fn start(&mut self) -> Result<()> {
        self.ensure_created("start")?;

        let mut dispatcher = SinkDispatcher::new(self.metrics.clone());
        for sink in self.sinks.drain(..) {
            dispatcher.register(sink);
        }

        let ctx = Arc::new(ExecutorContext {
            streams: std::mem::take(&mut self.streams),
            joins: std::mem::take(&mut self.joins),
            watermark: self.watermark.clone(),
            dispatcher: Arc::new(dispatcher),
            metrics: self.metrics.clone(),
            late_policy: self.config.window.late_events,
            check_interval: self.config.watermark.check_interval(),
            flush_on_close: self.config.window.flush_on_shutdown,
        });

        for partition in 0..self.config.num_partitions {
            let state = self
                .partitions
                .get(partition)
                .cloned()
                .ok_or_else(|| {
                    ProcessorError::Unexpected(format!("missing partition {}", partition))
                })?;
            let (tx, rx) = mpsc::channel(self.config.queue_capacity);
            self.inputs[partition as usize].lock().await.tx = Some(tx);

            let executor =
                PartitionExecutor::new(partition, state, ctx.clone(), rx, self.stop_tx.subscribe());
            self.workers.push(tokio::spawn(executor.run()));
        }

        if self.config.checkpoint.enabled {
            self.coordinator.start().await;
        }

        self.lifecycle = Lifecycle::Running;
        info!(
            name = %self.config.name,
            partitions = self.config.num_partitions,
            streams = ctx.streams.len(),
            joins = ctx.joins.len(),
            sinks = ctx.dispatcher.len(),
            "Stream engine started"
        );
        Ok(())
    }

    /// Route events to their partitions
    ///
    /// Every event is validated before any is enqueued. Suspends while a
    /// partition queue is full.
    pub async fn ingest(&self, events: Vec<StreamEvent>) -> Result<()> {
        if self.lifecycle != Lifecycle::Running {
            return Err(ProcessorError::NotRunning);
        }

        let routed = events
            .into_iter()
            .map(|event| self.partitioner.assign(&event).map(|p| (p, event)))
            .collect::<ValidationResult<Vec<_>>>()?;

        for (partition, event) in routed {
            let mut input = self.inputs[partition as usize].lock().await;
            let offset = match event.offset() {
                Some(offset) => {
                    input.next_offset = input.next_offset.max(offset.saturating_add(1));
                    offset
                }
                None => {
                    let offset = input.next_offset;
                    input.next_offset += 1;
                    offset
                }
            };

            let tx = input.tx.as_ref().ok_or(ProcessorError::NotRunning)?;
            let envelope = Envelope {
                offset,
                event: event.assigned(partition, offset),
            };
            tx.send(envelope)
                .await
                .map_err(|_| ProcessorError::NotRunning)?;
            self.metrics.events_ingested.inc();
        }

        Ok(())
    }

    /// Drain every queue, flush open windows and take a final checkpoint
    pub async fn shutdown(&mut self) -> Result<()> {
        if self.lifecycle != Lifecycle::Running {
            return Err(ProcessorError::NotRunning);
        }
        info!(name = %self.config.name, "Shutting down stream engine");

        self.close_inputs().await;
        self.join_workers().await;
        let final_checkpoint =
            self.config.checkpoint.enabled && self.config.checkpoint.checkpoint_on_shutdown;
        self.coordinator.shutdown(final_checkpoint).await;

        self.lifecycle = Lifecycle::Stopped;
        info!(name = %self.config.name, "Stream engine shut down");
        Ok(())
    }

    /// Stop every worker after its current event, discarding queued input
    pub async fn stop(&mut self) -> Result<()> {
        if self.lifecycle != Lifecycle::Running {
            return Err(ProcessorError::NotRunning);
        }
        info!(name = %self.config.name, "Stopping stream engine");

        let _ = self.stop_tx.send(true);
        self.close_inputs().await;
        self.join_workers().await;
        self.coordinator.shutdown(false).await;

        self.lifecycle = Lifecycle::Stopped;
        Ok(())
    }

    /// Replace a partition's state and processed offset with a checkpoint
    pub fn restore(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.partitions.restore(checkpoint)?;
        info!(
            partition = checkpoint.partition_id,
            checkpoint_id = %checkpoint.checkpoint_id,
            processed_offset = ?checkpoint.processed_offset,
            "Restored partition from checkpoint"
        );
        Ok(())
    }

    /// Checkpoint every partition immediately
    pub async fn checkpoint_now(&self) -> Result<Vec<Checkpoint>> {
        Ok(self.coordinator.checkpoint_all().await?)
    }

    pub fn checkpoint_stats(&self) -> CheckpointStats {
        self.coordinator.stats()
    }

    /// Point-in-time copy of the engine counters
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn metrics_handle(&self) -> Arc<EngineMetrics> {
        self.metrics.clone()
    }

    /// Prometheus registry holding the engine counters
    pub fn metrics_registry(&self) -> &MetricsRegistry {
        &self.registry
    }

    pub fn watermark(&self) -> Watermark {
        self.watermark.current()
    }

    pub fn state_value(&self, partition: u32, key: &str) -> Option<Value> {
        self.partitions.state_value(partition, key)
    }

    pub fn partition_stats(&self, partition: u32) -> Option<PartitionStats> {
        self.partitions.stats(partition)
    }

    pub fn partition_count(&self) -> u32 {
        self.config.num_partitions
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle == Lifecycle::Running
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn ensure_created(&self, operation: &str) -> ValidationResult<()> {
        if self.lifecycle == Lifecycle::Created {
            Ok(())
        } else {
            Err(ValidationError::AlreadyStarted {
                operation: operation.to_string(),
            })
        }
    }

    fn register_name(&mut self, name: &str, operation: &str) -> ValidationResult<()> {
        self.ensure_created(operation)?;
        if !self.names.insert(name.to_string()) {
            return Err(ValidationError::DuplicateRegistration {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    async fn close_inputs(&self) {
        for input in &self.inputs {
            input.lock().await.tx = None;
        }
    }

    async fn join_workers(&mut self) {
        for (partition, handle) in self.workers.drain(..).enumerate() {
            if let Err(e) = handle.await {
                error!(partition, error = %e, "Partition worker panicked");
            }
        }
    }
}

impl Drop for StreamEngine {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(true);
    }
}

impl std::fmt::Debug for StreamEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamEngine")
            .field("name", &self.config.name)
            .field("partitions", &self.config.num_partitions)
            .field("lifecycle", &self.lifecycle)
            .field("watermark", &self.watermark.current())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::CollectingSink;

    fn config(partitions: u32) -> EngineConfig {
        let mut config = EngineConfig::default()
            .with_partitions(partitions)
            .with_max_out_of_order(0);
        config.checkpoint.enabled = false;
        config
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut engine = StreamEngine::new(config(1)).unwrap();
        engine
            .process_stream("s", |_, _| Ok(None), None)
            .unwrap();
        let err = engine
            .add_join("s", JoinSpec::by_header(100, "side", "l", "r"))
            .unwrap_err();
        assert!(matches!(
            err,
            ProcessorError::Validation(ValidationError::DuplicateRegistration { .. })
        ));
    }

    #[test]
    fn test_invalid_window_rejected_and_name_released() {
        let mut engine = StreamEngine::new(config(1)).unwrap();
        let err = engine
            .process_stream("w", |_, _| Ok(None), Some(WindowSpec::sliding(1000, 2000)))
            .unwrap_err();
        assert!(matches!(
            err,
            ProcessorError::Validation(ValidationError::InvalidSlideSize { .. })
        ));
        engine
            .process_stream("w", |_, _| Ok(None), Some(WindowSpec::tumbling(1000)))
            .unwrap();
    }

    #[tokio::test]
    async fn test_ingest_before_start_fails() {
        let engine = StreamEngine::new(config(1)).unwrap();
        let err = engine
            .ingest(vec![StreamEvent::new("k", json!(1), 0)])
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessorError::NotRunning));
    }

    #[tokio::test]
    async fn test_registration_closed_after_start() {
        let mut engine = StreamEngine::new(config(1)).unwrap();
        engine.start().await.unwrap();
        let err = engine
            .add_sink(Arc::new(CollectingSink::new()))
            .unwrap_err();
        assert!(matches!(
            err,
            ProcessorError::Validation(ValidationError::AlreadyStarted { .. })
        ));
        engine.shutdown().await.unwrap();
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn test_offsets_assigned_per_partition() {
        let mut engine = StreamEngine::new(config(2)).unwrap();
        let sink = Arc::new(CollectingSink::new());
        engine.add_sink(sink.clone()).unwrap();
        engine
            .process_stream("echo", |_, events| Ok(Some(json!(events[0].key()))), None)
            .unwrap();
        engine.start().await.unwrap();

        let events = (0..4)
            .map(|i| {
                StreamEvent::new(format!("k{}", i), json!(i), i).with_partition((i % 2) as u32)
            })
            .collect();
        engine.ingest(events).await.unwrap();
        engine.shutdown().await.unwrap();

        let mut ids: Vec<String> = sink.outputs().iter().map(StreamOutput::output_id).collect();
        ids.sort();
        assert_eq!(
            ids,
            vec!["echo/0/event/0", "echo/0/event/1", "echo/1/event/0", "echo/1/event/1"]
        );
    }
}
