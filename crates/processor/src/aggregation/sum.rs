use super::trait_::{Aggregator, ToF64};
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;

/// Accumulator for sum aggregation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SumAccumulator {
    sum: f64,
    count: u64,
}

/// Sums numeric values; 0.0 when empty
#[derive(Debug, Clone)]
pub struct SumAggregator<T> {
    sum: f64,
    count: u64,
    _phantom: PhantomData<fn(T)>,
}

impl<T> SumAggregator<T> {
    pub fn new() -> Self {
        Self {
            sum: 0.0,
            count: 0,
            _phantom: PhantomData,
        }
    }
}

impl<T> Default for SumAggregator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ToF64 + Clone + std::fmt::Debug> Aggregator for SumAggregator<T> {
    type Input = T;
    type Output = f64;
    type Accumulator = SumAccumulator;

    fn update(&mut self, value: T) {
        self.sum += value.to_f64();
        self.count += 1;
    }

    fn finalize(&self) -> f64 {
        self.sum
    }

    fn accumulator(&self) -> SumAccumulator {
        SumAccumulator {
            sum: self.sum,
            count: self.count,
        }
    }

    fn merge(&mut self, other: SumAccumulator) {
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
