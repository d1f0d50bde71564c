//! Benchmarks for two-pass approximate search latency.
//!
//! Run with: `cargo bench --bench search_bench`
//!
//! # Reproducibility
//!
//! All benchmarks use:
//! - Seed: 42 for RNG
//! - Dimensions: 384
//! - Distribution: Uniform [-1, 1]

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::hint::black_box;
use vecstore::{Confidence, Node, NodeId, Store, StoreConfig};

fn generate_vectors(count: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..count)
        .map(|_| (0..vecstore::EMBEDDING_DIM).map(|_| rng.gen_range(-1.0..1.0)).collect())
        .collect()
}

fn bench_search_latency(c: &mut Criterion) {
    let seed = 42;
    let k = 10;
    let counts = [1_000, 10_000];

    let mut group = c.benchmark_group("search_latency");

    for count in counts {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StoreConfig::default();
        config.initial_capacity = count as u32;
        let store = Store::create(dir.path(), config).unwrap();

        let vectors = generate_vectors(count, seed);
        for (i, v) in vectors.iter().enumerate() {
            store
                .insert(Node {
                    id: NodeId::from_u128(i as u128),
                    type_tag: 0,
                    created_at: 0,
                    accessed_at: 0,
                    decay_rate: 0.0,
                    confidence: Confidence::default(),
                    embedding: v.clone(),
                    payload_bytes: vec![],
                    edges: vec![],
                    tags: vec![],
                })
                .unwrap();
        }

        let query = vectors[0].clone();
        group.throughput(Throughput::Elements(1));

        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| black_box(store.search(black_box(&query), k).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_search_latency);
criterion_main!(benches);
