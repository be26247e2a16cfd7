//! # Core Building Block Benchmark
//!
//! Measures the per-tick primitives:
//! - Radix sort of replication priorities
//! - Buffer pool alloc/free round trip
//!
//! Run with: `cargo bench --package tickwire_core`

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tickwire_core::{radix_sort_descending, BufferPool, CircularBuffer};

/// Deterministic pseudo-random priorities.
fn priorities(count: usize) -> Vec<u32> {
    let mut state = 0x9E37_79B9u32;
    (0..count)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state % 10_000
        })
        .collect()
}

/// Benchmark: sort delta lists of typical sizes.
fn bench_radix_sort(c: &mut Criterion) {
    let mut group = c.benchmark_group("radix_sort_descending");

    for count in [64, 255, 4096] {
        let input = priorities(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &input, |b, input| {
            b.iter(|| {
                let mut values = input.clone();
                radix_sort_descending(&mut values);
                black_box(values)
            });
        });
    }

    group.finish();
}

/// Benchmark: packet buffer borrow and return.
fn bench_buffer_pool(c: &mut Criterion) {
    let pool = BufferPool::new(12, 8);

    c.bench_function("buffer_pool_alloc_free_4096", |b| {
        b.iter(|| {
            let block = pool.alloc(black_box(4096)).unwrap();
            pool.free(block).unwrap();
        });
    });
}

/// Benchmark: steady-state ring pushes with eviction.
fn bench_circular_buffer(c: &mut Criterion) {
    c.bench_function("circular_buffer_push_evict", |b| {
        let mut ring = CircularBuffer::new(64);
        let mut next = 0u32;
        b.iter(|| {
            next = next.wrapping_add(1);
            black_box(ring.push_back(next))
        });
    });
}

criterion_group!(benches, bench_radix_sort, bench_buffer_pool, bench_circular_buffer);
criterion_main!(benches);
