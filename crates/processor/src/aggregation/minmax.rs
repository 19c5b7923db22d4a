use super::trait_::{Aggregator, ToF64};
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;

/// Accumulator for min aggregation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MinAccumulator {
    min: Option<f64>,
    count: u64,
}

/// Accumulator for max aggregation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MaxAccumulator {
    max: Option<f64>,
    count: u64,
}

/// Min aggregator - tracks the minimum value seen
///
/// An empty aggregator reports `f64::INFINITY`, meaning "no data".
///
/// # Examples
///
/// ```
/// use stream_processor::aggregation::{Aggregator, MinAggregator};
///
/// let mut agg = MinAggregator::<f64>::new();
/// assert_eq!(agg.finalize(), f64::INFINITY);
///
/// agg.update(30.0);
/// agg.update(10.0);
/// agg.update(20.0);
/// assert_eq!(agg.finalize(), 10.0);
/// ```
#[derive(Debug, Clone)]
pub struct MinAggregator<T> {
    min: Option<f64>,
    count: u64,
    _phantom: PhantomData<fn(T)>,
}

impl<T> MinAggregator<T> {
    /// Create a new min aggregator
    pub fn new() -> Self {
        Self {
            min: None,
            count: 0,
            _phantom: PhantomData,
        }
    }

    /// Get the current minimum value
    pub fn min(&self) -> Option<f64> {
        self.min
    }
}

impl<T> Default for MinAggregator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ToF64 + Clone + std::fmt::Debug> Aggregator for MinAggregator<T> {
    type Input = T;
    type Output = f64;
    type Accumulator = MinAccumulator;

    fn update(&mut self, value: T) {
        let value = value.to_f64();
        self.min = Some(self.min.map_or(value, |current| current.min(value)));
        self.count += 1;
    }

    fn finalize(&self) -> f64 {
        self.min.unwrap_or(f64::INFINITY)
    }

    fn accumulator(&self) -> MinAccumulator {
        MinAccumulator {
            min: self.min,
            count: self.count,
        }
    }

    fn merge(&mut self, other: MinAccumulator) {
        if let Some(other_min) = other.min {
            self.min = Some(self.min.map_or(other_min, |current| current.min(other_min)));
        }
        self.count += other.count;
    }

    fn reset(&mut self) {
        self.min = None;
        self.count = 0;
    }

    fn count(&self) -> u64 {
        self.count
    }
}

/// Max aggregator - tracks the maximum value seen
///
/// An empty aggregator reports `f64::NEG_INFINITY`, meaning "no data".
#[derive(Debug, Clone)]
pub struct MaxAggregator<T> {
    max: Option<f64>,
    count: u64,
    _phantom: PhantomData<fn(T)>,
}

impl<T> MaxAggregator<T> {
    /// Create a new max aggregator
    pub fn new() -> Self {
        Self {
            max: None,
            count: 0,
            _phantom: PhantomData,
        }
    }

    /// Get the current maximum value
    pub fn max(&self) -> Option<f64> {
        self.max
    }
}

impl<T> Default for MaxAggregator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ToF64 + Clone + std::fmt::Debug> Aggregator for MaxAggregator<T> {
    type Input = T;
    type Output = f64;
    type Accumulator = MaxAccumulator;

    fn update(&mut self, value: T) {
        let value = value.to_f64();
        self.max = Some(self.max.map_or(value, |current| current.max(value)));
        self.count += 1;
    }

    fn finalize(&self) -> f64 {
        self.max.unwrap_or(f64::NEG_INFINITY)
    }

    fn accumulator(&self) -> MaxAccumulator {
        MaxAccumulator {
            max: self.max,
            count: self.count,
        }
    }

    fn merge(&mut self, other: MaxAccumulator) {
        if let Some(other_max) = other.max {
            self.max = Some(self.max.map_or(other_max, |current| current.max(other_max)));
        }
        self.count += other.count;
    }

    fn reset(&mut self) {
        self.max = None;
        self.count = 0;
    }

    fn count(&self) -> u64 {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_basic() {
        let mut agg = MinAggregator::<f64>::new();
        agg.update_batch(&[30.0, 10.0, 20.0]);

        assert_eq!(agg.finalize(), 10.0);
        assert_eq!(agg.min(), Some(10.0));
    }

    #[test]
    fn test_max_basic() {
        let mut agg = MaxAggregator::<i64>::new();
        agg.update_batch(&[-5, 12, 7]);

        assert_eq!(agg.finalize(), 12.0);
    }

    #[test]
    fn test_empty_signals_no_data() {
        assert_eq!(MinAggregator::<f64>::new().finalize(), f64::INFINITY);
        assert_eq!(MaxAggregator::<f64>::new().finalize(), f64::NEG_INFINITY);
    }

    #[test]
    fn test_merge_with_empty() {
        let mut agg = MaxAggregator::<f64>::new();
        agg.update(3.0);
        agg.merge(MaxAggregator::<f64>::new().accumulator());
        assert_eq!(agg.finalize(), 3.0);

        let mut empty = MinAggregator::<f64>::new();
        let mut other = MinAggregator::<f64>::new();
        other.update(-1.0);
        empty.merge(other.accumulator());
        assert_eq!(empty.finalize(), -1.0);
        assert_eq!(empty.count(), 1);
    }
}
