//! Core processing types shared by the engine and user functions
//!
//! - [`StreamOutput`]: a result routed to the output sinks
//! - [`ProcessContext`]: what a user function sees while it runs
//! - [`StreamHandler`]: the user function signature

use crate::state::StateTxn;
use crate::watermark::Watermark;
use crate::window::WindowBounds;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use stream_engine_types::StreamEvent;

/// User processing function.
///
/// Called with a single event for per-event streams, or with the contents of
/// a completed window for windowed streams. `Ok(Some(value))` emits `value`
/// to the sinks, `Ok(None)` emits nothing, and `Err` marks the unit as failed:
/// its state writes are discarded and, for events, the offset is not marked.
pub type StreamHandler = Arc<
    dyn Fn(&mut ProcessContext<'_, '_>, &[StreamEvent]) -> anyhow::Result<Option<Value>>
        + Send
        + Sync,
>;

/// What produced an output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputOrigin {
    /// A per-event handler
    Event { offset: u64, timestamp: i64 },
    /// A completed window. A window refired by a late event is a separate
    /// output, told apart by the highest offset it contains.
    Window {
        start: i64,
        end: i64,
        event_count: usize,
        last_offset: Option<u64>,
    },
    /// A joined left/right pair
    Join {
        left_offset: Option<u64>,
        right_offset: Option<u64>,
    },
}

/// A result handed to the output sinks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamOutput {
    /// Name of the stream, aggregate, pattern or join that produced it
    pub source: String,
    pub partition: u32,
    pub origin: OutputOrigin,
    pub value: Value,
    pub emitted_at: DateTime<Utc>,
}

impl StreamOutput {
    pub fn new(
        source: impl Into<String>,
        partition: u32,
        origin: OutputOrigin,
        value: Value,
    ) -> Self {
        Self {
            source: source.into(),
            partition,
            origin,
            value,
            emitted_at: Utc::now(),
        }
    }

    /// Deterministic identity of this output.
    ///
    /// Re-emissions of the same unit of work (after a restore and replay, for
    /// instance) carry the same id, so an idempotent sink can drop them.
    pub fn output_id(&self) -> String {
        match &self.origin {
            OutputOrigin::Event { offset, .. } => {
                format!("{}/{}/event/{}", self.source, self.partition, offset)
            }
            OutputOrigin::Window {
                start,
                end,
                last_offset,
                ..
            } => format!(
                "{}/{}/window/{}-{}/{}",
                self.source,
                self.partition,
                start,
                end,
                fmt_offset(*last_offset)
            ),
            OutputOrigin::Join {
                left_offset,
                right_offset,
            } => format!(
                "{}/{}/join/{}-{}",
                self.source,
                self.partition,
                fmt_offset(*left_offset),
                fmt_offset(*right_offset)
            ),
        }
    }

    /// Window bounds, for window outputs
    pub fn window(&self) -> Option<WindowBounds> {
        match self.origin {
            OutputOrigin::Window { start, end, .. } => Some(WindowBounds::new(start, end)),
            _ => None,
        }
    }
}

fn fmt_offset(offset: Option<u64>) -> String {
    offset.map_or_else(|| "-".to_string(), |o| o.to_string())
}

/// Execution context handed to a [`StreamHandler`]
pub struct ProcessContext<'a, 's> {
    stream: &'a str,
    partition: u32,
    watermark: Watermark,
    window: Option<WindowBounds>,
    state: &'a mut StateTxn<'s>,
}

impl<'a, 's> ProcessContext<'a, 's> {
    pub(crate) fn new(
        stream: &'a str,
        partition: u32,
        watermark: Watermark,
        window: Option<WindowBounds>,
        state: &'a mut StateTxn<'s>,
    ) -> Self {
        Self {
            stream,
            partition,
            watermark,
            window,
            state,
        }
    }

    /// Name of the stream being processed
    pub fn stream(&self) -> &str {
        self.stream
    }

    pub fn partition(&self) -> u32 {
        self.partition
    }

    /// Engine watermark when this unit started
    pub fn watermark(&self) -> Watermark {
        self.watermark
    }

    /// Bounds of the window being processed, `None` for per-event streams
    pub fn window(&self) -> Option<WindowBounds> {
        self.window
    }

    /// Read partition state, including writes made earlier in this unit
    pub fn get_state(&self, key: &str) -> Option<&Value> {
        self.state.get(key)
    }

    /// Stage a state write, applied only if the unit succeeds
    pub fn put_state(&mut self, key: impl Into<String>, value: Value) {
        self.state.put(key, value);
    }

    /// Stage a state delete, applied only if the unit succeeds
    pub fn delete_state(&mut self, key: &str) {
        self.state.delete(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateStore;
    use serde_json::json;

    #[test]
    fn test_output_ids_are_deterministic() {
        let event = StreamOutput::new(
            "orders",
            2,
            OutputOrigin::Event {
                offset: 17,
                timestamp: 1_000,
            },
            json!(1),
        );
        assert_eq!(event.output_id(), "orders/2/event/17");
        assert_eq!(event.window(), None);

        let window = StreamOutput::new(
            "totals",
            0,
            OutputOrigin::Window {
                start: 0,
                end: 5_000,
                event_count: 3,
                last_offset: Some(8),
            },
            json!(6.0),
        );
        assert_eq!(window.output_id(), "totals/0/window/0-5000/8");
        assert_eq!(window.window(), Some(WindowBounds::new(0, 5_000)));

        let join = StreamOutput::new(
            "enrich",
            1,
            OutputOrigin::Join {
                left_offset: Some(3),
                right_offset: None,
            },
            json!(null),
        );
        assert_eq!(join.output_id(), "enrich/1/join/3--");
    }

    #[test]
    fn test_output_serialization() {
        let output = StreamOutput::new(
            "totals",
            0,
            OutputOrigin::Window {
                start: 0,
                end: 5_000,
                event_count: 3,
                last_offset: None,
            },
            json!({"sum": 6.0}),
        );
        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["origin"]["kind"], "window");

        let back: StreamOutput = serde_json::from_value(json).unwrap();
        assert_eq!(back, output);
    }

    #[test]
    fn test_context_state_access() {
        let mut store = StateStore::new(0, 10);
        store.put("seen", json!(1));

        let writes = {
            let mut txn = StateTxn::new(&store);
            let mut ctx = ProcessContext::new("clicks", 0, Watermark::new(10), None, &mut txn);

            assert_eq!(ctx.stream(), "clicks");
            assert_eq!(ctx.get_state("seen"), Some(&json!(1)));
            ctx.put_state("seen", json!(2));
            assert_eq!(ctx.get_state("seen"), Some(&json!(2)));
            ctx.delete_state("other");
            txn.into_writes()
        };

        store.apply(writes);
        assert_eq!(store.get("seen"), Some(&json!(2)));
    }
}
