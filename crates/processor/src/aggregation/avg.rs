use super::trait_::{Aggregator, ToF64};
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;

/// Accumulator for average aggregation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AverageAccumulator {
    sum: f64,
    count: u64,
}

/// Average aggregator - computes the mean of all values
///
/// An empty aggregator reports `0.0`.
///
/// # Examples
///
/// ```
/// use stream_processor::aggregation::{Aggregator, AverageAggregator};
///
/// let mut agg = AverageAggregator::<f64>::new();
/// assert_eq!(agg.finalize(), 0.0);
///
/// agg.update(10.0);
/// agg.update(20.0);
/// agg.update(30.0);
/// assert_eq!(agg.finalize(), 20.0);
/// ```
#[derive(Debug, Clone)]
pub struct AverageAggregator<T> {
    sum: f64,
    count: u64,
    _phantom: PhantomData<fn(T)>,
}

impl<T> AverageAggregator<T> {
    /// Create a new average aggregator
    pub fn new() -> Self {
        Self {
            sum: 0.0,
            count: 0,
            _phantom: PhantomData,
        }
    }

    /// Get the current mean value, `None` when empty
    pub fn mean(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.sum / self.count as f64)
        }
    }
}

impl<T> Default for AverageAggregator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ToF64 + Clone + std::fmt::Debug> Aggregator for AverageAggregator<T> {
    type Input = T;
    type Output = f64;
    type Accumulator = AverageAccumulator;

    fn update(&mut self, value: T) {
        self.sum += value.to_f64();
        self.count += 1;
    }

    fn finalize(&self) -> f64 {
        self.mean().unwrap_or(0.0)
    }

    fn accumulator(&self) -> AverageAccumulator {
        AverageAccumulator {
            sum: self.sum,
            count: self.count,
        }
    }

    fn merge(&mut self, other: AverageAccumulator) {
        self.sum += other.sum;
        self.count += other.count;
    }

    fn reset(&mut self) {
        self.sum = 0.0;
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
    fn test_avg_basic() {
        let mut agg = AverageAggregator::<f64>::new();
        assert_eq!(agg.count(), 0);
        assert!(agg.is_empty());

        agg.update(10.0);
        agg.update(20.0);
        agg.update(30.0);

        assert_eq!(agg.count(), 3);
        assert_eq!(agg.finalize(), 20.0);
    }

    #[test]
    fn test_avg_empty_is_zero() {
        let agg = AverageAggregator::<f64>::new();
        assert_eq!(agg.finalize(), 0.0);
        assert_eq!(agg.mean(), None);
    }

    #[test]
    fn test_avg_merge() {
        let mut agg1 = AverageAggregator::<f64>::new();
        agg1.update_batch(&[10.0, 20.0]);

        let mut agg2 = AverageAggregator::<f64>::new();
        agg2.update_batch(&[30.0, 40.0]);

        agg1.merge(agg2.accumulator());
        assert_eq!(agg1.finalize(), 25.0);
    }

    #[test]
    fn test_avg_reset() {
        let mut agg = AverageAggregator::<i64>::new();
        agg.update(5);
        agg.reset();
        assert!(agg.is_empty());
        assert_eq!(agg.finalize(), 0.0);
    }
}
