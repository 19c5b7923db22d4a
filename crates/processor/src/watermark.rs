//! Event-time watermark tracking
//!
//! A watermark is a monotonic lower bound on event time: once the watermark
//! reaches `t`, no event with a timestamp below `t` is expected any more. The
//! engine keeps a single watermark per instance, shared by all partition
//! workers, computed as
//!
//! ```text
//! watermark = max(0, max_event_timestamp_seen - max_out_of_order_ms)
//! ```
//!
//! and never moved backwards, even when an older event shows up later.
//!
//! # Example
//!
//! ```rust
//! use stream_processor::watermark::WatermarkTracker;
//! use std::time::Duration;
//!
//! let tracker = WatermarkTracker::new(Duration::from_millis(1_000));
//! assert_eq!(tracker.observe(5_000).timestamp, 4_000);
//!
//! // Older event: watermark stays put, event is late.
//! assert_eq!(tracker.observe(2_000).timestamp, 4_000);
//! assert!(tracker.is_late(2_000));
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tracing::trace;

/// Represents a watermark timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Watermark {
    /// The watermark timestamp in milliseconds
    pub timestamp: i64,
}

impl Watermark {
    /// Creates a new watermark with the given timestamp
    pub fn new(timestamp: i64) -> Self {
        Self { timestamp }
    }

    /// Watermark used for end-of-input flushes: every window is complete
    pub fn max() -> Self {
        Self { timestamp: i64::MAX }
    }

    /// Converts the watermark to a DateTime
    pub fn to_datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.timestamp).unwrap_or_else(Utc::now)
    }

    /// Checks if this watermark is before the given timestamp
    pub fn is_before(&self, timestamp: i64) -> bool {
        self.timestamp < timestamp
    }

    /// Checks if this watermark is after the given timestamp
    pub fn is_after(&self, timestamp: i64) -> bool {
        self.timestamp > timestamp
    }

    pub fn is_max(&self) -> bool {
        self.timestamp == i64::MAX
    }
}

impl Default for Watermark {
    fn default() -> Self {
        Self { timestamp: 0 }
    }
}

impl std::fmt::Display for Watermark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_max() {
            write!(f, "Watermark(+inf)")
        } else {
            write!(f, "Watermark({})", self.timestamp)
        }
    }
}

/// Engine-wide bounded-out-of-orderness watermark.
///
/// All methods take `&self` and are safe to call from every partition worker
/// at once. Lateness is judged against the watermark at call time, so the
/// order of `is_late` and `observe` calls matters.
#[derive(Debug)]
pub struct WatermarkTracker {
    max_out_of_order_ms: i64,
    max_timestamp: AtomicI64,
    watermark: AtomicI64,
}

impl WatermarkTracker {
    /// Create a tracker tolerating `max_out_of_order` of disorder
    pub fn new(max_out_of_order: Duration) -> Self {
        let max_out_of_order_ms = i64::try_from(max_out_of_order.as_millis()).unwrap_or(i64::MAX);
        Self {
            max_out_of_order_ms,
            max_timestamp: AtomicI64::new(i64::MIN),
            watermark: AtomicI64::new(0),
        }
    }

    /// Record an event timestamp and return the resulting watermark
    pub fn observe(&self, timestamp: i64) -> Watermark {
        let previous_max = self.max_timestamp.fetch_max(timestamp, Ordering::AcqRel);
        let max_ts = previous_max.max(timestamp);
        let candidate = max_ts.saturating_sub(self.max_out_of_order_ms).max(0);
        let previous = self.watermark.fetch_max(candidate, Ordering::AcqRel);
        let current = previous.max(candidate);

        if current > previous {
            trace!(timestamp, watermark = current, "watermark advanced");
        }

        Watermark::new(current)
    }

    /// Current watermark
    pub fn current(&self) -> Watermark {
        Watermark::new(self.watermark.load(Ordering::Acquire))
    }

    /// Largest event timestamp observed so far
    pub fn max_timestamp(&self) -> Option<i64> {
        match self.max_timestamp.load(Ordering::Acquire) {
            i64::MIN => None,
            ts => Some(ts),
        }
    }

    /// Whether an event with this timestamp is behind the current watermark
    pub fn is_late(&self, timestamp: i64) -> bool {
        self.current().is_after(timestamp)
    }

    /// How far behind the current watermark a timestamp is, 0 when on time
    pub fn lateness(&self, timestamp: i64) -> i64 {
        self.current().timestamp.saturating_sub(timestamp).max(0)
    }

    pub fn max_out_of_order_ms(&self) -> i64 {
        self.max_out_of_order_ms
    }
}

/// What to do with an event that arrives behind the watermark
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum LateEventPolicy {
    /// Count it in `late_events` and process it normally
    #[default]
    AcceptAndFlag,
    /// Count it, and drop it when it is later than `allowed_lateness_ms`
    DropBeyond { allowed_lateness_ms: u64 },
}

impl LateEventPolicy {
    /// Returns true if an event this late should still be processed
    pub fn admits(&self, lateness_ms: i64) -> bool {
        match self {
            LateEventPolicy::AcceptAndFlag => true,
            LateEventPolicy::DropBeyond {
                allowed_lateness_ms,
            } => lateness_ms <= i64::try_from(*allowed_lateness_ms).unwrap_or(i64::MAX),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_watermark_ordering() {
        let w1 = Watermark::new(1000);
        let w2 = Watermark::new(2000);

        assert!(w1 < w2);
        assert!(w1.is_before(1500));
        assert!(w2.is_after(1500));
        assert_eq!(Watermark::default().timestamp, 0);
        assert_eq!(Watermark::max().to_string(), "Watermark(+inf)");
    }

    #[test]
    fn test_bounded_watermark_basic() {
        let tracker = WatermarkTracker::new(Duration::from_secs(5));

        assert_eq!(tracker.current().timestamp, 0);
        assert_eq!(tracker.max_timestamp(), None);

        let wm = tracker.observe(10_000);
        assert_eq!(wm.timestamp, 5_000);
        assert_eq!(tracker.max_timestamp(), Some(10_000));
    }

    #[test]
    fn test_watermark_clamped_at_zero() {
        let tracker = WatermarkTracker::new(Duration::from_secs(5));
        assert_eq!(tracker.observe(1_000).timestamp, 0);
        assert_eq!(tracker.observe(-50_000).timestamp, 0);
    }

    #[test]
    fn test_watermark_monotonicity() {
        let tracker = WatermarkTracker::new(Duration::from_millis(100));

        let timestamps = [1_000, 5_000, 3_000, 4_000, 6_000, 2_000];
        let mut last = 0;
        for ts in timestamps {
            let wm = tracker.observe(ts);
            assert!(wm.timestamp >= last);
            last = wm.timestamp;
        }
        assert_eq!(last, 5_900);
    }

    #[test]
    fn test_late_event_detection() {
        let tracker = WatermarkTracker::new(Duration::ZERO);
        tracker.observe(6_000);

        assert!(tracker.is_late(2_000));
        assert!(!tracker.is_late(6_000));
        assert!(!tracker.is_late(7_000));
        assert_eq!(tracker.lateness(2_000), 4_000);
        assert_eq!(tracker.lateness(7_000), 0);
    }

    #[test]
    fn test_lateness_depends_on_call_order() {
        let tracker = WatermarkTracker::new(Duration::ZERO);
        tracker.observe(1_000);

        // Classified before the watermark moves: on time.
        assert!(!tracker.is_late(1_500));
        tracker.observe(2_000);
        // Same timestamp classified afterwards: late.
        assert!(tracker.is_late(1_500));
    }

    #[test]
    fn test_concurrent_observers() {
        let tracker = Arc::new(WatermarkTracker::new(Duration::from_millis(10)));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let tracker = tracker.clone();
                std::thread::spawn(move || {
                    for i in 0..1_000 {
                        tracker.observe(i * 4 + t);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(tracker.max_timestamp(), Some(3_999));
        assert_eq!(tracker.current().timestamp, 3_989);
    }

    #[test]
    fn test_late_event_policy() {
        assert!(LateEventPolicy::AcceptAndFlag.admits(i64::MAX));

        let policy = LateEventPolicy::DropBeyond {
            allowed_lateness_ms: 500,
        };
        assert!(policy.admits(500));
        assert!(!policy.admits(501));
    }
}
