//! Event types flowing through the engine

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

/// A single keyed, timestamped event.
///
/// Events are immutable once built. `partition` and `offset` are normally left
/// unset by producers and filled in by the engine at ingestion; a producer that
/// redelivers an event keeps the values it was originally assigned.
///
/// Identity is `(key, event_timestamp, partition, offset)`: two events with the
/// same identity compare equal even if payload or headers differ.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    key: String,
    value: serde_json::Value,
    event_timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    partition: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    offset: Option<u64>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    headers: HashMap<String, String>,
}

impl StreamEvent {
    /// Create a new event with an event-time timestamp in milliseconds
    pub fn new(key: impl Into<String>, value: serde_json::Value, event_timestamp: i64) -> Self {
        Self {
            key: key.into(),
            value,
            event_timestamp,
            partition: None,
            offset: None,
            headers: HashMap::new(),
        }
    }

    /// Add a header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Pin the event to a partition instead of letting the partitioner choose
    pub fn with_partition(mut self, partition: u32) -> Self {
        self.partition = Some(partition);
        self
    }

    /// Carry an offset that was assigned on a previous delivery
    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Returns a copy stamped with its final partition and offset.
    pub fn assigned(&self, partition: u32, offset: u64) -> Self {
        Self {
            partition: Some(partition),
            offset: Some(offset),
            ..self.clone()
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &serde_json::Value {
        &self.value
    }

    /// Event time in milliseconds
    pub fn timestamp(&self) -> i64 {
        self.event_timestamp
    }

    pub fn partition(&self) -> Option<u32> {
        self.partition
    }

    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Read a numeric field from an object payload.
    ///
    /// A bare numeric payload is returned for any field name, which keeps value
    /// functions short for streams of plain numbers.
    pub fn numeric_field(&self, field: &str) -> Option<f64> {
        match &self.value {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::Object(map) => map.get(field).and_then(|v| v.as_f64()),
            _ => None,
        }
    }
}

impl PartialEq for StreamEvent {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
            && self.event_timestamp == other.event_timestamp
            && self.partition == other.partition
            && self.offset == other.offset
    }
}

impl Eq for StreamEvent {}

impl Hash for StreamEvent {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
        self.event_timestamp.hash(state);
        self.partition.hash(state);
        self.offset.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_creation() {
        let event = StreamEvent::new("user_1", json!({"amount": 12.5}), 1_000)
            .with_header("source", "checkout");

        assert_eq!(event.key(), "user_1");
        assert_eq!(event.timestamp(), 1_000);
        assert_eq!(event.partition(), None);
        assert_eq!(event.offset(), None);
        assert_eq!(event.header("source"), Some("checkout"));
        assert_eq!(event.numeric_field("amount"), Some(12.5));
        assert_eq!(event.numeric_field("missing"), None);
    }

    #[test]
    fn test_identity_ignores_payload() {
        let a = StreamEvent::new("k", json!(1), 10).assigned(0, 5);
        let b = StreamEvent::new("k", json!(2), 10)
            .with_header("x", "y")
            .assigned(0, 5);
        let c = StreamEvent::new("k", json!(1), 10).assigned(0, 6);

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_assigned_keeps_original() {
        let original = StreamEvent::new("k", json!(1), 10);
        let stamped = original.assigned(3, 42);

        assert_eq!(original.partition(), None);
        assert_eq!(stamped.partition(), Some(3));
        assert_eq!(stamped.offset(), Some(42));
    }

    #[test]
    fn test_numeric_payload() {
        let event = StreamEvent::new("k", json!(7), 0);
        assert_eq!(event.numeric_field("anything"), Some(7.0));
    }

    #[test]
    fn test_serialization() {
        let event = StreamEvent::new("k", json!({"v": 1}), 10).with_offset(3);
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("partition"));

        let back: StreamEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.value(), &json!({"v": 1}));
    }
}
