//! Error types for the stream processor
//!
//! Setup problems surface as [`ValidationError`] at call time. Everything that
//! can go wrong while an event is in flight ([`ProcessingError`], [`SinkError`])
//! is isolated to that event, counted in the engine metrics and logged, never
//! propagated out of a partition worker.

use thiserror::Error;

/// Main processor error type
#[derive(Error, Debug)]
pub enum ProcessorError {
    /// Bad configuration or registration
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A user function failed for one event or window
    #[error("processing error: {0}")]
    Processing(#[from] ProcessingError),

    /// An output sink failed
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    /// State store and checkpoint errors
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// Configuration loading errors
    #[error("configuration error: {source}")]
    Configuration {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Serialization/deserialization errors
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The engine was not started, or has been shut down
    #[error("engine is not running")]
    NotRunning,

    /// Generic error for unexpected conditions
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

/// Setup and ingestion validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A configuration field has an unusable value
    #[error("invalid configuration for {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    /// Window size is invalid
    #[error("invalid window size: {size}ms, must be greater than 0")]
    InvalidWindowSize { size: u64 },

    /// Slide size is invalid for sliding windows
    #[error("invalid slide size: {slide}ms, must be greater than 0 and less than or equal to window size {window}ms")]
    InvalidSlideSize { slide: u64, window: u64 },

    /// A pre-set or custom-assigned partition is outside `[0, partitions)`
    #[error("partition {partition} out of range, engine has {partitions} partitions")]
    PartitionOutOfRange { partition: u32, partitions: u32 },

    /// A stream, join or pattern name is already registered
    #[error("duplicate registration: {name}")]
    DuplicateRegistration { name: String },

    /// Registration attempted after `start()`
    #[error("cannot {operation} after the engine has started")]
    AlreadyStarted { operation: String },
}

/// Failures of user processing functions
#[derive(Error, Debug, Clone)]
pub enum ProcessingError {
    /// A per-event handler returned an error
    #[error("stream '{stream}' failed on partition {partition} offset {offset}: {reason}")]
    HandlerFailed {
        stream: String,
        partition: u32,
        offset: u64,
        reason: String,
    },

    /// A window handler returned an error
    #[error("stream '{stream}' failed on partition {partition} window [{start}, {end}): {reason}")]
    WindowFailed {
        stream: String,
        partition: u32,
        start: i64,
        end: i64,
        reason: String,
    },

    /// A result could not be turned into an output record
    #[error("failed to encode output of '{source_name}': {reason}")]
    Encoding { source_name: String, reason: String },
}

/// Output sink failures
#[derive(Error, Debug, Clone)]
pub enum SinkError {
    /// The sink returned an error
    #[error("sink '{sink}' failed: {reason}")]
    Failed { sink: String, reason: String },

    /// The sink panicked while handling an output
    #[error("sink '{sink}' panicked")]
    Panicked { sink: String },
}

/// State store and checkpoint errors
#[derive(Error, Debug, Clone)]
pub enum StateError {
    /// Checkpoint contents do not match their checksum
    #[error("checkpoint {checkpoint_id} is corrupt: expected checksum {expected}, got {actual}")]
    ChecksumMismatch {
        checkpoint_id: String,
        expected: String,
        actual: String,
    },

    /// Checkpoint refers to a partition the engine does not have
    #[error("checkpoint partition {partition} out of range, engine has {partitions} partitions")]
    UnknownPartition { partition: u32, partitions: u32 },

    /// The checkpoint sink rejected a checkpoint
    #[error("failed to persist checkpoint {checkpoint_id}: {reason}")]
    PersistFailed {
        checkpoint_id: String,
        reason: String,
    },
}

/// Result type alias for processor operations
pub type Result<T> = std::result::Result<T, ProcessorError>;

/// Result type alias for validation
pub type ValidationResult<T> = std::result::Result<T, ValidationError>;

/// Result type alias for state operations
pub type StateResult<T> = std::result::Result<T, StateError>;

impl From<serde_json::Error> for ProcessorError {
    fn from(err: serde_json::Error) -> Self {
        ProcessorError::Serialization(err.to_string())
    }
}

impl From<figment::Error> for ProcessorError {
    fn from(err: figment::Error) -> Self {
        ProcessorError::Configuration {
            source: Box::new(err),
        }
    }
}
