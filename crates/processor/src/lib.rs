//! Partitioned, windowed stream processing engine
//!
//! Events are routed to partitions, each drained in order by its own worker.
//! Workers track an engine-wide event-time watermark, buffer events into
//! tumbling or sliding windows, run user functions, joins and patterns, and
//! fan results out to output sinks. Per-partition state is checkpointed
//! periodically and can be restored.

pub mod aggregation;
pub mod cep;
pub mod config;
pub mod core;
pub mod error;
pub mod gate;
pub mod join;
pub mod logging;
pub mod metrics;
pub mod partition;
pub mod pipeline;
pub mod sink;
pub mod state;
pub mod watermark;
pub mod window;

// Re-export commonly used types
pub use stream_engine_types::StreamEvent;

pub use cep::{Pattern, PatternMatch};
pub use config::{
    CheckpointConfig, EngineConfig, LogFormat, LoggingConfig, WatermarkConfig, WindowConfig,
};
pub use core::{OutputOrigin, ProcessContext, StreamHandler, StreamOutput};
pub use error::{ProcessingError, ProcessorError, Result, SinkError, StateError, ValidationError};
pub use gate::ExactlyOnceGate;
pub use join::{JoinEngine, JoinSide, JoinSpec, JoinedRecord};
pub use logging::init_tracing;
pub use metrics::{EngineMetrics, MetricsRegistry, MetricsSnapshot};
pub use partition::{PartitionStrategy, PartitionStrategyKind, Partitioner};
pub use pipeline::{PartitionStats, StreamEngine};
pub use sink::{AsyncFnSink, CollectingSink, FnSink, OutputSink, SinkDispatcher};
pub use state::{Checkpoint, CheckpointSink, CheckpointStats, InMemoryCheckpointSink, StateStore};
pub use watermark::{LateEventPolicy, Watermark, WatermarkTracker};
pub use window::{SlidingMembership, WindowBounds, WindowSpec};
