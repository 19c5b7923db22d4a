//! Partition workers
//!
//! Each partition has one [`PartitionExecutor`] task draining its bounded
//! queue in order. An event is one unit of work: the exactly-once gate, the
//! watermark update, every registered stream, window firing and joins run
//! synchronously under the partition lock, and the event's offset is marked
//! only if every handler succeeded. On failure all staged state writes and
//! window changes are rolled back. Outputs are dispatched after the lock is
//! released.

use crate::core::{OutputOrigin, ProcessContext, StreamHandler, StreamOutput};
use crate::error::{ProcessingError, StateError, StateResult};
use crate::gate::ExactlyOnceGate;
use crate::join::{JoinEngine, JoinSide, JoinSpec};
use crate::metrics::EngineMetrics;
use crate::sink::SinkDispatcher;
use crate::state::{Checkpoint, CheckpointSource, StateStore, StateTxn};
use crate::watermark::{LateEventPolicy, Watermark, WatermarkTracker};
use crate::window::{FiredWindow, WindowAssigner, WindowBounds, WindowBuffer};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use stream_engine_types::StreamEvent;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

/// An event with its final offset, as queued for a partition
#[derive(Debug)]
pub(crate) struct Envelope {
    pub offset: u64,
    pub event: StreamEvent,
}

/// A registered user function
pub(crate) struct StreamRegistration {
    pub name: String,
    pub handler: StreamHandler,
    pub assigner: Option<WindowAssigner>,
}

/// A registered join
pub(crate) struct JoinRegistration {
    pub name: String,
    pub spec: JoinSpec,
}

/// Per-partition processing statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartitionStats {
    pub partition: u32,
    pub events_processed: u64,
    pub processing_errors: u64,
    pub windows_fired: u64,
    pub open_windows: usize,
    pub buffered_events: usize,
    pub processed_offset: Option<u64>,
    pub state_entries: usize,
}

/// Everything one partition owns
#[derive(Debug)]
pub(crate) struct PartitionState {
    pub partition: u32,
    pub store: StateStore,
    pub gate: ExactlyOnceGate,
    pub windows: HashMap<String, WindowBuffer>,
    pub joins: HashMap<String, JoinEngine>,
    events_processed: u64,
    processing_errors: u64,
    windows_fired: u64,
}

impl PartitionState {
    fn new(partition: u32, changelog_capacity: usize) -> Self {
        Self {
            partition,
            store: StateStore::new(partition, changelog_capacity),
            gate: ExactlyOnceGate::new(),
            windows: HashMap::new(),
            joins: HashMap::new(),
            events_processed: 0,
            processing_errors: 0,
            windows_fired: 0,
        }
    }

    fn stats(&self) -> PartitionStats {
        PartitionStats {
            partition: self.partition,
            events_processed: self.events_processed,
            processing_errors: self.processing_errors,
            windows_fired: self.windows_fired,
            open_windows: self.windows.values().map(WindowBuffer::open_windows).sum(),
            buffered_events: self.windows.values().map(WindowBuffer::buffered_events).sum(),
            processed_offset: self.gate.processed_offset(),
            state_entries: self.store.len(),
        }
    }
}

/// The partitions of one engine
#[derive(Debug)]
pub struct PartitionSet {
    partitions: Vec<Arc<Mutex<PartitionState>>>,
}

impl PartitionSet {
    pub(crate) fn new(num_partitions: u32, changelog_capacity: usize) -> Self {
        Self {
            partitions: (0..num_partitions)
                .map(|p| Arc::new(Mutex::new(PartitionState::new(p, changelog_capacity))))
                .collect(),
        }
    }

    pub(crate) fn get(&self, partition: u32) -> Option<&Arc<Mutex<PartitionState>>> {
        self.partitions.get(partition as usize)
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    pub fn stats(&self, partition: u32) -> Option<PartitionStats> {
        self.get(partition).map(|state| state.lock().stats())
    }

    /// Read one state value of a partition
    pub fn state_value(&self, partition: u32, key: &str) -> Option<Value> {
        self.get(partition)
            .and_then(|state| state.lock().store.get(key).cloned())
    }

    /// Replace a partition's state and offset with a checkpoint
    pub(crate) fn restore(&self, checkpoint: &Checkpoint) -> StateResult<()> {
        checkpoint.validate()?;
        let state = self
            .get(checkpoint.partition_id)
            .ok_or(StateError::UnknownPartition {
                partition: checkpoint.partition_id,
                partitions: self.partition_count(),
            })?;

        let mut guard = state.lock();
        guard.store.restore(&checkpoint.state_snapshot);
        guard.gate.restore(checkpoint.processed_offset);
        Ok(())
    }
}

impl CheckpointSource for PartitionSet {
    fn partition_count(&self) -> u32 {
        self.partitions.len() as u32
    }

    fn checkpoint_partition(&self, partition: u32) -> StateResult<Checkpoint> {
        let state = self.get(partition).ok_or(StateError::UnknownPartition {
            partition,
            partitions: self.partition_count(),
        })?;

        let mut guard = state.lock();
        let offset = guard.gate.processed_offset();
        Ok(guard.store.checkpoint(offset))
    }
}

/// Read-only configuration shared by all partition workers
pub(crate) struct ExecutorContext {
    pub streams: Vec<StreamRegistration>,
    pub joins: Vec<JoinRegistration>,
    pub watermark: Arc<WatermarkTracker>,
    pub dispatcher: Arc<SinkDispatcher>,
    pub metrics: Arc<EngineMetrics>,
    pub late_policy: LateEventPolicy,
    pub check_interval: Duration,
    pub flush_on_close: bool,
}

/// Worker task for one partition
pub(crate) struct PartitionExecutor {
    partition: u32,
    state: Arc<Mutex<PartitionState>>,
    ctx: Arc<ExecutorContext>,
    input: mpsc::Receiver<Envelope>,
    stop: watch::Receiver<bool>,
}

impl PartitionExecutor {
    pub fn new(
        partition: u32,
        state: Arc<Mutex<PartitionState>>,
        ctx: Arc<ExecutorContext>,
        input: mpsc::Receiver<Envelope>,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            partition,
            state,
            ctx,
            input,
            stop,
        }
    }

    /// Drain the queue until it is closed or a stop is signalled
    pub async fn run(mut self) {
        info!(partition = self.partition, "Starting partition worker");

        let mut ticker = time::interval(self.ctx.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                changed = self.stop.changed() => {
                    if changed.is_err() || *self.stop.borrow() {
                        info!(partition = self.partition, "Partition worker stopped");
                        break;
                    }
                }
                received = self.input.recv() => match received {
                    Some(envelope) => self.handle_event(envelope).await,
                    None => {
                        debug!(partition = self.partition, "Input channel closed");
                        if self.ctx.flush_on_close {
                            self.flush_open_windows().await;
                        }
                        info!(partition = self.partition, "Partition worker drained");
                        break;
                    }
                },
                _ = ticker.tick() => self.fire_ready_windows().await,
            }
        }
    }

    async fn handle_event(&mut self, envelope: Envelope) {
        let offset = envelope.offset;
        let result = {
            let mut guard = self.state.lock();
            process_event(&self.ctx, &mut guard, envelope)
        };

        match result {
            Ok(outputs) => self.dispatch(outputs).await,
            Err(e) => {
                self.ctx.metrics.processing_errors.inc();
                self.state.lock().processing_errors += 1;
                warn!(
                    partition = self.partition,
                    offset,
                    error = %e,
                    "Event processing failed, offset not committed"
                );
            }
        }
    }

    async fn fire_ready_windows(&mut self) {
        let watermark = self.ctx.watermark.current();
        let outputs = {
            let mut guard = self.state.lock();
            fire_windows_on_watermark(&self.ctx, &mut guard, watermark, false)
        };
        self.dispatch(outputs).await;
    }

    async fn flush_open_windows(&mut self) {
        let outputs = {
            let mut guard = self.state.lock();
            fire_windows_on_watermark(&self.ctx, &mut guard, Watermark::max(), true)
        };
        if !outputs.is_empty() {
            debug!(partition = self.partition, outputs = outputs.len(), "Flushed open windows");
        }
        self.dispatch(outputs).await;
    }

    async fn dispatch(&self, outputs: Vec<StreamOutput>) {
        for output in &outputs {
            self.ctx.dispatcher.emit(output).await;
        }
    }
}

/// Window changes made while processing one event, undone on failure
#[derive(Default)]
struct WindowUndo {
    added: Vec<(String, WindowBounds)>,
    fired: Vec<(String, Vec<FiredWindow>)>,
}

impl WindowUndo {
    fn fired_count(&self) -> usize {
        self.fired.iter().map(|(_, windows)| windows.len()).sum()
    }

    fn rollback(self, windows: &mut HashMap<String, WindowBuffer>) {
        for (name, fired) in self.fired {
            if let Some(buffer) = windows.get_mut(&name) {
                buffer.restore_fired(fired);
            }
        }
        for (name, bounds) in self.added.into_iter().rev() {
            if let Some(buffer) = windows.get_mut(&name) {
                buffer.undo_add(bounds);
            }
        }
    }
}

/// Process one event as a single all-or-nothing unit
pub(crate) fn process_event(
    ctx: &ExecutorContext,
    state: &mut PartitionState,
    envelope: Envelope,
) -> Result<Vec<StreamOutput>, ProcessingError> {
    let Envelope { offset, event } = envelope;
    let partition = state.partition;

    if state.gate.is_duplicate(offset) {
        debug!(partition, offset, "Skipping already processed event");
        return Ok(Vec::new());
    }

    let timestamp = event.timestamp();
    let late = ctx.watermark.is_late(timestamp);
    let lateness = ctx.watermark.lateness(timestamp);
    let watermark = ctx.watermark.observe(timestamp);

    if late {
        ctx.metrics.late_events.inc();
        if !ctx.late_policy.admits(lateness) {
            debug!(partition, offset, lateness, "Dropping late event");
            ctx.metrics.events_dropped_late.inc();
            state.gate.mark_processed(offset);
            return Ok(Vec::new());
        }
        trace!(partition, offset, lateness, "Accepting late event");
    }

    let PartitionState {
        store,
        gate,
        windows,
        joins,
        ..
    } = &mut *state;

    let mut outputs = Vec::new();
    let mut undo = WindowUndo::default();
    let mut txn = StateTxn::new(store);

    let resolved = run_streams(
        ctx,
        partition,
        offset,
        &event,
        watermark,
        windows,
        &mut txn,
        &mut undo,
        &mut outputs,
    )
    .and_then(|()| resolve_joins(ctx, partition, offset, &event));
    let join_inputs = match resolved {
        Ok(join_inputs) => join_inputs,
        Err(e) => {
            undo.rollback(windows);
            return Err(e);
        }
    };

    let writes = txn.into_writes();
    store.apply(writes);
    run_joins(ctx, partition, &event, join_inputs, joins, &mut outputs);
    gate.mark_processed(offset);

    let fired = undo.fired_count() as u64;
    ctx.metrics.events_processed.inc();
    ctx.metrics.windows_emitted.inc_by(fired);
    state.events_processed += 1;
    state.windows_fired += fired;

    trace!(partition, offset, outputs = outputs.len(), "Event processed");
    Ok(outputs)
}

#[allow(clippy::too_many_arguments)]
fn run_streams(
    ctx: &ExecutorContext,
    partition: u32,
    offset: u64,
    event: &StreamEvent,
    watermark: Watermark,
    windows: &mut HashMap<String, WindowBuffer>,
    txn: &mut StateTxn<'_>,
    undo: &mut WindowUndo,
    outputs: &mut Vec<StreamOutput>,
) -> Result<(), ProcessingError> {
    for stream in &ctx.streams {
        let Some(assigner) = &stream.assigner else {
            let mut pctx = ProcessContext::new(&stream.name, partition, watermark, None, txn);
            let value = invoke(&stream.handler, &mut pctx, std::slice::from_ref(event)).map_err(
                |e| ProcessingError::HandlerFailed {
                    stream: stream.name.clone(),
                    partition,
                    offset,
                    reason: format!("{:#}", e),
                },
            )?;
            if let Some(value) = value {
                let origin = OutputOrigin::Event {
                    offset,
                    timestamp: event.timestamp(),
                };
                outputs.push(StreamOutput::new(&stream.name, partition, origin, value));
            }
            continue;
        };

        let buffer = windows
            .entry(stream.name.clone())
            .or_insert_with(|| WindowBuffer::new(assigner.spec().size_ms));
        for bounds in assigner.assign(event.timestamp()) {
            buffer.add(bounds, event.clone());
            undo.added.push((stream.name.clone(), bounds));
        }

        let fired = buffer.take_completed(watermark);
        if fired.is_empty() {
            continue;
        }
        let result = run_window_handler(stream, partition, watermark, &fired, txn, outputs);
        undo.fired.push((stream.name.clone(), fired));
        result?;
    }

    Ok(())
}

fn run_window_handler(
    stream: &StreamRegistration,
    partition: u32,
    watermark: Watermark,
    fired: &[FiredWindow],
    txn: &mut StateTxn<'_>,
    outputs: &mut Vec<StreamOutput>,
) -> Result<(), ProcessingError> {
    for (bounds, events) in fired {
        let mut pctx = ProcessContext::new(&stream.name, partition, watermark, Some(*bounds), txn);
        let value = invoke(&stream.handler, &mut pctx, events).map_err(|e| {
            ProcessingError::WindowFailed {
                stream: stream.name.clone(),
                partition,
                start: bounds.start,
                end: bounds.end,
                reason: format!("{:#}", e),
            }
        })?;

        if let Some(value) = value {
            let origin = OutputOrigin::Window {
                start: bounds.start,
                end: bounds.end,
                event_count: events.len(),
                last_offset: events.iter().filter_map(StreamEvent::offset).max(),
            };
            outputs.push(StreamOutput::new(&stream.name, partition, origin, value));
        }
    }
    Ok(())
}

/// Fire windows outside of event processing: on the periodic watermark check,
/// or for every open window when the input ends. Each window is its own unit;
/// a failing window is counted and dropped.
fn fire_windows_on_watermark(
    ctx: &ExecutorContext,
    state: &mut PartitionState,
    watermark: Watermark,
    drain: bool,
) -> Vec<StreamOutput> {
    let PartitionState {
        partition,
        store,
        windows,
        ..
    } = &mut *state;
    let partition = *partition;

    let mut outputs = Vec::new();
    let mut fired_total = 0u64;
    let mut failed_total = 0u64;

    for stream in ctx.streams.iter().filter(|s| s.assigner.is_some()) {
        let Some(buffer) = windows.get_mut(&stream.name) else {
            continue;
        };
        let fired = if drain {
            buffer.drain_all()
        } else {
            buffer.take_completed(watermark)
        };

        for window in fired {
            let mut txn = StateTxn::new(store);
            let result = run_window_handler(
                stream,
                partition,
                watermark,
                std::slice::from_ref(&window),
                &mut txn,
                &mut outputs,
            );
            match result {
                Ok(()) => {
                    let writes = txn.into_writes();
                    store.apply(writes);
                    fired_total += 1;
                }
                Err(e) => {
                    failed_total += 1;
                    warn!(partition, error = %e, "Window processing failed, window dropped");
                }
            }
        }
    }

    ctx.metrics.windows_emitted.inc_by(fired_total);
    ctx.metrics.processing_errors.inc_by(failed_total);
    state.windows_fired += fired_total;
    state.processing_errors += failed_total;
    outputs
}

/// Side and key of an event for one registered join
struct JoinInput {
    join: usize,
    side: JoinSide,
    key: String,
}

/// Evaluate every join's side and key functions for an event. Runs before
/// any state is applied, so a failing function fails the whole unit.
fn resolve_joins(
    ctx: &ExecutorContext,
    partition: u32,
    offset: u64,
    event: &StreamEvent,
) -> Result<Vec<JoinInput>, ProcessingError> {
    let mut inputs = Vec::new();

    for (join, registration) in ctx.joins.iter().enumerate() {
        let spec = &registration.spec;
        let resolved = catch_unwind(AssertUnwindSafe(|| {
            (spec.side_fn)(event).map(|side| (side, (spec.key_fn)(event)))
        }))
        .map_err(|_| ProcessingError::HandlerFailed {
            stream: registration.name.clone(),
            partition,
            offset,
            reason: "join side or key function panicked".to_string(),
        })?;

        if let Some((side, key)) = resolved {
            inputs.push(JoinInput { join, side, key });
        }
    }

    Ok(inputs)
}

fn run_joins(
    ctx: &ExecutorContext,
    partition: u32,
    event: &StreamEvent,
    inputs: Vec<JoinInput>,
    joins: &mut HashMap<String, JoinEngine>,
    outputs: &mut Vec<StreamOutput>,
) {
    for JoinInput { join, side, key } in inputs {
        let registration = &ctx.joins[join];
        let engine = joins
            .entry(registration.name.clone())
            .or_insert_with(|| JoinEngine::from_spec(&registration.spec));

        for record in engine.join_keyed(event.clone(), side, key) {
            let origin = OutputOrigin::Join {
                left_offset: record.left.offset(),
                right_offset: record.right.offset(),
            };
            match serde_json::to_value(&record) {
                Ok(value) => {
                    ctx.metrics.join_results.inc();
                    outputs.push(StreamOutput::new(&registration.name, partition, origin, value));
                }
                Err(e) => {
                    ctx.metrics.processing_errors.inc();
                    let error = ProcessingError::Encoding {
                        source_name: registration.name.clone(),
                        reason: e.to_string(),
                    };
                    warn!(partition, error = %error, "Dropping joined record");
                }
            }
        }
    }
}

/// Call a user function, turning a panic into an error
fn invoke(
    handler: &StreamHandler,
    pctx: &mut ProcessContext<'_, '_>,
    events: &[StreamEvent],
) -> anyhow::Result<Option<Value>> {
    match catch_unwind(AssertUnwindSafe(|| handler(pctx, events))) {
        Ok(result) => result,
        Err(_) => Err(anyhow::anyhow!("handler panicked")),
    }
}
