//! Partition state and checkpointing
//!
//! Each partition owns a [`StateStore`]: a key/value map whose mutations are
//! recorded in a bounded changelog. User functions never write to the store
//! directly; they write through a [`StateTxn`] that is applied only once every
//! handler for the event succeeded.
//!
//! ```rust
//! use stream_processor::state::{StateStore, StateTxn};
//! use serde_json::json;
//!
//! let mut store = StateStore::new(0, 1_000);
//! store.put("visits", json!(1));
//!
//! let checkpoint = store.checkpoint(Some(10));
//! assert!(store.changelog().is_empty());
//!
//! store.put("visits", json!(99));
//! store.restore(&checkpoint.state_snapshot);
//! assert_eq!(store.get("visits"), Some(&json!(1)));
//!
//! let writes = {
//!     let mut txn = StateTxn::new(&store);
//!     txn.put("visits", json!(2));
//!     txn.into_writes()
//! };
//! store.apply(writes);
//! assert_eq!(store.get("visits"), Some(&json!(2)));
//! ```

pub mod checkpoint;
pub mod store;

pub use checkpoint::{
    Checkpoint, CheckpointCoordinator, CheckpointSink, CheckpointSource, CheckpointStats,
    InMemoryCheckpointSink,
};
pub use store::{ChangeOp, ChangeRecord, StateStore, StateTxn, StateWrite};
