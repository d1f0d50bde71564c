//! Benchmarks for the store-wide pause incurred when slot capacity doubles.
//!
//! Run with: `cargo bench --bench grow_bench`

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;
use vecstore::unified::{StorePaths, UnifiedIndex};
use vecstore::{Confidence, Node, NodeId};

fn node(id: u128) -> Node {
    Node {
        id: NodeId::from_u128(id),
        type_tag: 0,
        created_at: 0,
        accessed_at: 0,
        decay_rate: 0.0,
        confidence: Confidence::default(),
        embedding: vec![0.1; vecstore::EMBEDDING_DIM],
        payload_bytes: vec![],
        edges: vec![],
        tags: vec![],
    }
}

/// Benchmark: wall-clock cost of a single `grow()` call (doubling capacity)
/// at increasing starting capacities, the pause every caller in flight
/// observes while the three mapped regions resize.
fn bench_grow_pause(c: &mut Criterion) {
    let capacities = [1_000u32, 10_000u32];

    let mut group = c.benchmark_group("grow_pause");
    group.sample_size(10);

    for capacity in capacities {
        group.bench_with_input(BenchmarkId::from_parameter(capacity), &capacity, |b, &capacity| {
            b.iter_batched(
                || {
                    let dir = tempfile::tempdir().unwrap();
                    let paths = StorePaths::under(dir.path());
                    let mut index = UnifiedIndex::create(&paths, capacity, 16, 200, 16, 1.5, 2.0).unwrap();
                    for i in 0..capacity as u128 {
                        index.insert(&node(i)).unwrap();
                    }
                    (dir, index)
                },
                |(dir, mut index)| {
                    black_box(index.grow().unwrap());
                    drop(dir);
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_grow_pause);
criterion_main!(benches);
