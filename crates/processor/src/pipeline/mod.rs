//! Stream engine runtime
//!
//! [`StreamEngine`] owns the registrations and the partition queues.
//! [`start`](StreamEngine::start) spawns one worker per partition:
//!
//! ```text
//!   ingest ──► Partitioner ──► queue[0] ──► worker 0 ──┐
//!                         ├──► queue[1] ──► worker 1 ──┼──► SinkDispatcher ──► sinks
//!                         └──► queue[n] ──► worker n ──┘
//!                                              │
//!                              CheckpointCoordinator (periodic, per-partition lock)
//! ```
//!
//! Queues are bounded, so `ingest` suspends when a worker falls behind.

pub mod engine;
pub mod executor;

pub use engine::StreamEngine;
pub use executor::{PartitionSet, PartitionStats};
