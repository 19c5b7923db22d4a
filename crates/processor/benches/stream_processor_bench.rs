//! Benchmarks for the per-event hot paths: window assignment, aggregation
//! over window contents and join probing

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use std::sync::Arc;
use stream_processor::aggregation::{Aggregator, AggregationKind, AverageAggregator};
use stream_processor::join::{JoinEngine, JoinSide};
use stream_processor::window::{SlidingMembership, WindowAssigner, WindowSpec};
use stream_processor::StreamEvent;

fn events(count: usize) -> Vec<StreamEvent> {
    (0..count)
        .map(|i| {
            StreamEvent::new(
                format!("user_{}", i % 10),
                json!({"amount": i as f64}),
                i as i64 * 10,
            )
        })
        .collect()
}

fn bench_window_assign(c: &mut Criterion) {
    let mut group = c.benchmark_group("window_assign");
    group.throughput(Throughput::Elements(1));

    let tumbling =
        WindowAssigner::new(WindowSpec::tumbling(5_000), SlidingMembership::Overlapping).unwrap();
    let sliding =
        WindowAssigner::new(WindowSpec::sliding(60_000, 5_000), SlidingMembership::Overlapping)
            .unwrap();
    let aligned = WindowAssigner::new(
        WindowSpec::sliding(60_000, 5_000),
        SlidingMembership::Aligned,
    )
    .unwrap();

    group.bench_function("tumbling", |b| {
        b.iter(|| black_box(tumbling.assign(black_box(123_456))));
    });
    group.bench_function("sliding_overlapping", |b| {
        b.iter(|| black_box(sliding.assign(black_box(123_456))));
    });
    group.bench_function("sliding_aligned", |b| {
        b.iter(|| black_box(aligned.assign(black_box(123_456))));
    });

    group.finish();
}

fn bench_aggregation(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregation");

    for size in [100usize, 1_000, 10_000] {
        let window = events(size);
        group.throughput(Throughput::Elements(size as u64));

        for kind in [AggregationKind::Sum, AggregationKind::Avg, AggregationKind::Max] {
            group.bench_with_input(BenchmarkId::new(kind.name(), size), &window, |b, window| {
                b.iter(|| {
                    black_box(kind.apply(window, &|e: &StreamEvent| {
                        e.numeric_field("amount").unwrap_or(0.0)
                    }))
                });
            });
        }

        group.bench_with_input(BenchmarkId::new("incremental_avg", size), &window, |b, window| {
            b.iter(|| {
                let mut agg = AverageAggregator::<f64>::new();
                for event in window {
                    agg.update(event.numeric_field("amount").unwrap_or(0.0));
                }
                black_box(agg.finalize())
            });
        });
    }

    group.finish();
}

fn bench_join(c: &mut Criterion) {
    let mut group = c.benchmark_group("join");

    for size in [100usize, 1_000] {
        let input = events(size);
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::new("alternating_sides", size), &input, |b, input| {
            b.iter(|| {
                let mut engine =
                    JoinEngine::new(1_000, Arc::new(|e: &StreamEvent| e.key().to_string()));
                let mut joined = 0usize;
                for (i, event) in input.iter().enumerate() {
                    let side = if i % 2 == 0 { JoinSide::Left } else { JoinSide::Right };
                    joined += engine.join(event.clone(), side).len();
                }
                black_box(joined)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_window_assign, bench_aggregation, bench_join);
criterion_main!(benches);
