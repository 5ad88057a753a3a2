//! Comparator and history codec benchmarks
//!
//! Sizes cover a small crate (16 ids) up to a large monorepo suite (4096 ids).

use std::hint::black_box;

use bench_tracker::compare::compute_bench_comparison;
use bench_tracker::history::csv::{from_csv, to_csv};
use bench_tracker::schema::{Benchmark, BenchmarkResult};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

const SIZES: [usize; 4] = [16, 256, 1024, 4096];

/// Deterministic benchmark with `n` ids; `drift` scales every average.
fn make_bench(commit: &str, n: usize, seed: u64, drift: f64) -> Benchmark {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let results = (0..n)
        .map(|i| BenchmarkResult {
            id: format!("group {} / case {i}", i % 7),
            average_ns: (1_000 + rng.next_u64() % 1_000_000) as f64 * drift,
            runs_done: 1 + rng.next_u64() % 10_000,
            total_ms: 100 + rng.next_u64() % 900,
            threshold: (i % 10 == 0).then_some(3.0),
        })
        .collect();
    Benchmark::new(commit, results)
}

fn bench_comparison(c: &mut Criterion) {
    let mut group = c.benchmark_group("compute_bench_comparison");
    for n in SIZES {
        let prev = make_bench("prev", n, 7, 1.0);
        let curr = make_bench("curr", n, 7, 1.1);

        group.bench_with_input(BenchmarkId::new("with_baseline", n), &n, |b, _| {
            b.iter(|| compute_bench_comparison(black_box(&curr), Some(black_box(&prev)), 2.0))
        });
        group.bench_with_input(BenchmarkId::new("first_run", n), &n, |b, _| {
            b.iter(|| compute_bench_comparison(black_box(&curr), None, 2.0))
        });
    }
    group.finish();
}

fn bench_csv(c: &mut Criterion) {
    let mut group = c.benchmark_group("history_csv");
    for n in SIZES {
        let bench = make_bench("4b235978fa5227dae61a6bed6d73461eeb550dac", n, 11, 1.0);
        let encoded = to_csv(&bench);

        group.bench_with_input(BenchmarkId::new("to_csv", n), &bench, |b, bench| {
            b.iter(|| to_csv(black_box(bench)))
        });
        group.bench_with_input(BenchmarkId::new("from_csv", n), &encoded, |b, encoded| {
            b.iter(|| from_csv(black_box(encoded), None))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_comparison, bench_csv);
criterion_main!(benches);
