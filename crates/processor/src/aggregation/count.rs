use super::trait_::Aggregator;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;

/// Accumulator for count aggregation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CountAccumulator {
    count: u64,
}

/// Counts values of any type
#[derive(Debug, Clone)]
pub struct CountAggregator<T> {
    count: u64,
    _phantom: PhantomData<fn(T)>,
}

impl<T> CountAggregator<T> {
    pub fn new() -> Self {
        Self {
            count: 0,
            _phantom: PhantomData,
        }
    }
}

impl<T> Default for CountAggregator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + std::fmt::Debug> Aggregator for CountAggregator<T> {
    type Input = T;
    type Output = u64;
    type Accumulator = CountAccumulator;

    fn update(&mut self, _value: T) {
        self.count += 1;
    }

    fn finalize(&self) -> u64 {
        self.count
    }

    fn accumulator(&self) -> CountAccumulator {
        CountAccumulator { count: self.count }
    }

    fn merge(&mut self, other: CountAccumulator) {
        self.count += other.count;
    }

    fn reset(&mut self) {
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
    fn test_count_basic() {
        let mut agg = CountAggregator::<&str>::new();
        assert_eq!(agg.finalize(), 0);

        agg.update_batch(&["a", "b", "c"]);
        assert_eq!(agg.finalize(), 3);

        agg.reset();
        assert!(agg.is_empty());
    }

    #[test]
    fn test_count_merge() {
        let mut a = CountAggregator::<u64>::new();
        let mut b = CountAggregator::<u64>::new();
        a.update(1);
        b.update_batch(&[2, 3]);

        a.merge(b.accumulator());
        assert_eq!(a.finalize(), 3);
    }
}
