//! Aggregations over window contents
//!
//! Two layers are provided:
//!
//! - Pure functions ([`count`], [`sum`], [`avg`], [`min`], [`max`]) reducing a
//!   slice of events with a value function. These are what window handlers
//!   usually call.
//! - Incremental [`Aggregator`] implementations with mergeable accumulators,
//!   for callers that keep running totals in partition state.
//!
//! Empty input is not an error: `avg` is `0.0`, `min` is `+inf` and `max` is
//! `-inf`.
//!
//! # Examples
//!
//! ```rust
//! use stream_processor::aggregation::{self, AggregationKind};
//! use stream_engine_types::StreamEvent;
//! use serde_json::json;
//!
//! let events = vec![
//!     StreamEvent::new("a", json!({"ms": 120}), 0),
//!     StreamEvent::new("b", json!({"ms": 80}), 10),
//! ];
//! let latency = |e: &StreamEvent| e.numeric_field("ms").unwrap_or(0.0);
//!
//! assert_eq!(aggregation::avg(&events, latency), 100.0);
//! assert_eq!(AggregationKind::Max.apply(&events, &latency), 120.0);
//! assert_eq!(aggregation::max(&[], latency), f64::NEG_INFINITY);
//! ```

mod avg;
mod count;
mod minmax;
mod sum;
mod trait_;

pub use avg::{AverageAccumulator, AverageAggregator};
pub use count::{CountAccumulator, CountAggregator};
pub use minmax::{MaxAccumulator, MaxAggregator, MinAccumulator, MinAggregator};
pub use sum::{SumAccumulator, SumAggregator};
pub use trait_::{Aggregator, ToF64};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use stream_engine_types::StreamEvent;

/// Extracts the numeric value to aggregate from an event
pub type ValueFn = Arc<dyn Fn(&StreamEvent) -> f64 + Send + Sync>;

/// Number of events
pub fn count(events: &[StreamEvent]) -> u64 {
    events.len() as u64
}

/// Sum of `value_fn` over the events, 0.0 when empty
pub fn sum<F>(events: &[StreamEvent], value_fn: F) -> f64
where
    F: Fn(&StreamEvent) -> f64,
{
    reduce(SumAggregator::<f64>::new(), events, value_fn)
}

/// Mean of `value_fn` over the events, 0.0 when empty
pub fn avg<F>(events: &[StreamEvent], value_fn: F) -> f64
where
    F: Fn(&StreamEvent) -> f64,
{
    reduce(AverageAggregator::<f64>::new(), events, value_fn)
}

/// Minimum of `value_fn` over the events, `+inf` when empty
pub fn min<F>(events: &[StreamEvent], value_fn: F) -> f64
where
    F: Fn(&StreamEvent) -> f64,
{
    reduce(MinAggregator::<f64>::new(), events, value_fn)
}

/// Maximum of `value_fn` over the events, `-inf` when empty
pub fn max<F>(events: &[StreamEvent], value_fn: F) -> f64
where
    F: Fn(&StreamEvent) -> f64,
{
    reduce(MaxAggregator::<f64>::new(), events, value_fn)
}

fn reduce<A, F>(mut aggregator: A, events: &[StreamEvent], value_fn: F) -> f64
where
    A: Aggregator<Input = f64, Output = f64>,
    F: Fn(&StreamEvent) -> f64,
{
    for event in events {
        aggregator.update(value_fn(event));
    }
    aggregator.finalize()
}

/// Aggregation selectable at registration time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationKind {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregationKind {
    /// Apply the aggregation to a list of events
    pub fn apply(&self, events: &[StreamEvent], value_fn: &dyn Fn(&StreamEvent) -> f64) -> f64 {
        match self {
            AggregationKind::Count => count(events) as f64,
            AggregationKind::Sum => sum(events, value_fn),
            AggregationKind::Avg => avg(events, value_fn),
            AggregationKind::Min => min(events, value_fn),
            AggregationKind::Max => max(events, value_fn),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AggregationKind::Count => "count",
            AggregationKind::Sum => "sum",
            AggregationKind::Avg => "avg",
            AggregationKind::Min => "min",
            AggregationKind::Max => "max",
        }
    }
}

impl fmt::Display for AggregationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
