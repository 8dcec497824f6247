//! Benchmark for the compaction merge policy

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use opledger_core::chain::find_merge_candidate;

/// Run merge passes over a size list until the invariant holds
fn simulate(mut sizes: Vec<usize>, coefficient: f64) -> Vec<usize> {
    while let Some(candidate) = find_merge_candidate(&sizes, coefficient) {
        sizes[candidate - 1] += sizes[candidate];
        sizes.remove(candidate);
    }
    sizes
}

fn bench_compaction(c: &mut Criterion) {
    let mut group = c.benchmark_group("compaction");

    for segment_count in [64usize, 256, 1024] {
        group.bench_with_input(
            BenchmarkId::new("unit_segments", segment_count),
            &segment_count,
            |b, &count| {
                b.iter(|| simulate(black_box(vec![1usize; count]), black_box(1.0)));
            },
        );
    }

    group.bench_function("find_candidate_stable_chain", |b| {
        // Geometric sizes: the scan finds nothing to merge
        let sizes: Vec<usize> = (0..32).rev().map(|i| 1usize << i).collect();
        b.iter(|| find_merge_candidate(black_box(&sizes), black_box(1.0)));
    });

    group.finish();
}

criterion_group!(benches, bench_compaction);
criterion_main!(benches);
