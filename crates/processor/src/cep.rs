//! Complex event pattern matching
//!
//! Patterns are stateless evaluators over an ordered list of events. Deciding
//! which events form a candidate list is left to the caller; the engine feeds
//! patterns the contents of completed windows (see
//! [`StreamEngine::process_pattern`](crate::StreamEngine::process_pattern)).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use stream_engine_types::StreamEvent;

/// Predicate over a single event
pub type EventPredicate = Arc<dyn Fn(&StreamEvent) -> bool + Send + Sync>;

/// Predicate over a whole event list
pub type ListPredicate = Arc<dyn Fn(&[StreamEvent]) -> bool + Send + Sync>;

#[derive(Clone)]
pub enum Pattern {
    /// Predicate `i` must hold for event `i`; extra trailing events are ignored
    Sequence(Vec<EventPredicate>),
    /// Predicate over the list, with all events within `window_ms` of each other
    Temporal {
        predicate: ListPredicate,
        window_ms: u64,
    },
}

impl Pattern {
    /// Start an empty sequence pattern; extend it with [`then`](Self::then)
    pub fn sequence() -> Self {
        Pattern::Sequence(Vec::new())
    }

    /// Append a step to a sequence pattern. No-op on temporal patterns.
    pub fn then<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&StreamEvent) -> bool + Send + Sync + 'static,
    {
        if let Pattern::Sequence(steps) = &mut self {
            steps.push(Arc::new(predicate));
        }
        self
    }

    pub fn temporal<F>(window_ms: u64, predicate: F) -> Self
    where
        F: Fn(&[StreamEvent]) -> bool + Send + Sync + 'static,
    {
        Pattern::Temporal {
            predicate: Arc::new(predicate),
            window_ms,
        }
    }

    /// Evaluate the pattern against an ordered event list
    pub fn matches(&self, events: &[StreamEvent]) -> bool {
        match self {
            Pattern::Sequence(steps) => {
                events.len() >= steps.len()
                    && steps.iter().zip(events).all(|(step, event)| step(event))
            }
            Pattern::Temporal {
                predicate,
                window_ms,
            } => {
                let Some(span) = time_span(events) else {
                    return false;
                };
                span <= *window_ms && predicate(events)
            }
        }
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Sequence(steps) => write!(f, "Sequence({} steps)", steps.len()),
            Pattern::Temporal { window_ms, .. } => write!(f, "Temporal(window_ms={})", window_ms),
        }
    }
}

/// Summary of a pattern match, emitted as the output value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternMatch {
    pub pattern: String,
    pub first_timestamp: i64,
    pub last_timestamp: i64,
    pub keys: Vec<String>,
    pub offsets: Vec<Option<u64>>,
}

impl PatternMatch {
    pub fn from_events(pattern: &str, events: &[StreamEvent]) -> Self {
        let first_timestamp = events.iter().map(StreamEvent::timestamp).min().unwrap_or(0);
        let last_timestamp = events.iter().map(StreamEvent::timestamp).max().unwrap_or(0);
        Self {
            pattern: pattern.to_string(),
            first_timestamp,
            last_timestamp,
            keys: events.iter().map(|e| e.key().to_string()).collect(),
            offsets: events.iter().map(StreamEvent::offset).collect(),
        }
    }
}

fn time_span(events: &[StreamEvent]) -> Option<u64> {
    let min = events.iter().map(StreamEvent::timestamp).min()?;
    let max = events.iter().map(StreamEvent::timestamp).max()?;
    Some(max.abs_diff(min))
}
