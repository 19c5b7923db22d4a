//! Time-bounded two-way stream join
//!
//! Each side keeps its events in a buffer keyed by join key. On every arrival
//! both buffers are pruned of events older than `now - window_ms`, the event is
//! appended to its own side, and the other side is scanned for events with the
//! same key whose timestamps differ by at most `window_ms`. Every match yields
//! one [`JoinedRecord`]; several matches are not collapsed.
//!
//! `now` is event time: the largest timestamp the join has seen.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use stream_engine_types::StreamEvent;
use tracing::trace;

/// Extracts the join key of an event
pub type JoinKeyFn = Arc<dyn Fn(&StreamEvent) -> String + Send + Sync>;

/// Decides which side an event belongs to, or `None` to skip it
pub type JoinSideFn = Arc<dyn Fn(&StreamEvent) -> Option<JoinSide> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinSide {
    Left,
    Right,
}

impl JoinSide {
    pub fn opposite(self) -> Self {
        match self {
            JoinSide::Left => JoinSide::Right,
            JoinSide::Right => JoinSide::Left,
        }
    }
}

/// A matched left/right pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinedRecord {
    pub join_key: String,
    pub left: StreamEvent,
    pub right: StreamEvent,
}

/// Registration of a join with the engine
#[derive(Clone)]
pub struct JoinSpec {
    pub window_ms: u64,
    pub side_fn: JoinSideFn,
    pub key_fn: JoinKeyFn,
}

impl JoinSpec {
    pub fn new<S, K>(window_ms: u64, side_fn: S, key_fn: K) -> Self
    where
        S: Fn(&StreamEvent) -> Option<JoinSide> + Send + Sync + 'static,
        K: Fn(&StreamEvent) -> String + Send + Sync + 'static,
    {
        Self {
            window_ms,
            side_fn: Arc::new(side_fn),
            key_fn: Arc::new(key_fn),
        }
    }

    /// Join on the event key, taking the side from a header
    /// (`left_value` / `right_value`)
    pub fn by_header(window_ms: u64, header: &str, left_value: &str, right_value: &str) -> Self {
        let header = header.to_string();
        let left_value = left_value.to_string();
        let right_value = right_value.to_string();
        Self::new(
            window_ms,
            move |e: &StreamEvent| match e.header(&header) {
                Some(v) if v == left_value => Some(JoinSide::Left),
                Some(v) if v == right_value => Some(JoinSide::Right),
                _ => None,
            },
            |e: &StreamEvent| e.key().to_string(),
        )
    }
}

impl fmt::Debug for JoinSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinSpec")
            .field("window_ms", &self.window_ms)
            .finish_non_exhaustive()
    }
}

/// Join buffers for one join on one partition
pub struct JoinEngine {
    window_ms: i64,
    key_fn: JoinKeyFn,
    left: HashMap<String, Vec<StreamEvent>>,
    right: HashMap<String, Vec<StreamEvent>>,
    now: Option<i64>,
}

impl JoinEngine {
    pub fn new(window_ms: u64, key_fn: JoinKeyFn) -> Self {
        Self {
            window_ms: i64::try_from(window_ms).unwrap_or(i64::MAX),
            key_fn,
            left: HashMap::new(),
            right: HashMap::new(),
            now: None,
        }
    }

    pub fn from_spec(spec: &JoinSpec) -> Self {
        Self::new(spec.window_ms, spec.key_fn.clone())
    }

    /// Add an event to one side and return its matches on the other
    pub fn join(&mut self, event: StreamEvent, side: JoinSide) -> Vec<JoinedRecord> {
        let join_key = (self.key_fn)(&event);
        self.join_keyed(event, side, join_key)
    }

    /// Like [`join`](Self::join), with the join key already computed
    pub fn join_keyed(
        &mut self,
        event: StreamEvent,
        side: JoinSide,
        join_key: String,
    ) -> Vec<JoinedRecord> {
        let timestamp = event.timestamp();
        let now = self.now.map_or(timestamp, |n| n.max(timestamp));
        self.now = Some(now);
        self.prune(now.saturating_sub(self.window_ms));

        let window_ms = self.window_ms.unsigned_abs();

        let matches: Vec<JoinedRecord> = self
            .buffer(side.opposite())
            .get(&join_key)
            .map(|candidates| {
                candidates
                    .iter()
                    .filter(|other| other.timestamp().abs_diff(timestamp) <= window_ms)
                    .map(|other| {
                        let (left, right) = match side {
                            JoinSide::Left => (event.clone(), other.clone()),
                            JoinSide::Right => (other.clone(), event.clone()),
                        };
                        JoinedRecord {
                            join_key: join_key.clone(),
                            left,
                            right,
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        trace!(
            join_key = %join_key,
            side = ?side,
            matches = matches.len(),
            "join lookup"
        );

        self.buffer_mut(side).entry(join_key).or_default().push(event);
        matches
    }

    /// Events currently buffered on one side
    pub fn buffered(&self, side: JoinSide) -> usize {
        self.buffer(side).values().map(Vec::len).sum()
    }

    fn prune(&mut self, cutoff: i64) {
        for buffer in [&mut self.left, &mut self.right] {
            buffer.retain(|_, events| {
                events.retain(|e| e.timestamp() >= cutoff);
                !events.is_empty()
            });
        }
    }

    fn buffer(&self, side: JoinSide) -> &HashMap<String, Vec<StreamEvent>> {
        match side {
            JoinSide::Left => &self.left,
            JoinSide::Right => &self.right,
        }
    }

    fn buffer_mut(&mut self, side: JoinSide) -> &mut HashMap<String, Vec<StreamEvent>> {
        match side {
            JoinSide::Left => &mut self.left,
            JoinSide::Right => &mut self.right,
        }
    }
}

impl fmt::Debug for JoinEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinEngine")
            .field("window_ms", &self.window_ms)
            .field("left", &self.buffered(JoinSide::Left))
            .field("right", &self.buffered(JoinSide::Right))
            .field("now", &self.now)
            .finish()
    }
}
