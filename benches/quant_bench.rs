//! Benchmarks for scalar quantization and binary-code derivation.
//!
//! Run with: `cargo bench --bench quant_bench`

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::hint::black_box;
use vecstore::quantization::{quantize, BinaryQuantizer};
use vecstore::EMBEDDING_DIM;

/// Benchmark: quantization latency for a single 384-dimensional embedding.
///
/// Target: well under the per-vector budget of a 10k-item/s insert path.
fn bench_quantization_speed(c: &mut Criterion) {
    let seed = 42;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let vector: Vec<f32> = (0..EMBEDDING_DIM).map(|_| rng.gen_range(-10.0..10.0)).collect();

    let mut group = c.benchmark_group("quantization_latency");
    group.throughput(Throughput::Elements(1));
    group.bench_function("quantize_384d", |b| {
        b.iter(|| black_box(quantize(black_box(&vector))));
    });
    group.finish();
}

/// Benchmark: quantization throughput for bulk batches.
fn bench_quantization_throughput(c: &mut Criterion) {
    let seed = 42;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let batch_size = 1000;

    let vectors: Vec<Vec<f32>> = (0..batch_size)
        .map(|_| (0..EMBEDDING_DIM).map(|_| rng.gen_range(-10.0..10.0)).collect())
        .collect();

    let mut group = c.benchmark_group("quantization_throughput");
    group.throughput(Throughput::Elements(batch_size as u64));

    group.bench_function("quantize_1k_384d", |b| {
        b.iter(|| {
            for v in &vectors {
                black_box(quantize(black_box(v)));
            }
        });
    });
    group.finish();
}

/// Benchmark: deriving a 48-byte binary code from an already-quantized
/// vector, the hot path of the two-pass search's first stage.
fn bench_binary_derivation(c: &mut Criterion) {
    let seed = 42;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let vector: Vec<f32> = (0..EMBEDDING_DIM).map(|_| rng.gen_range(-10.0..10.0)).collect();
    let quantized = quantize(&vector);

    let mut group = c.benchmark_group("binary_derivation");
    group.throughput(Throughput::Elements(1));
    group.bench_function("from_quantized_384d", |b| {
        b.iter(|| black_box(BinaryQuantizer::from_quantized(black_box(&quantized))));
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_quantization_speed,
    bench_quantization_throughput,
    bench_binary_derivation
);
criterion_main!(benches);
