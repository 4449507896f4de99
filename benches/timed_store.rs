//! Criterion benchmarks for TimedStore
//!
//! The agent touches its stores on every pairing call, so these measure the
//! operations those calls use, plus eviction at capacity.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::prelude::*;

use masc_pairing::store::{ManualClock, TimedStore};
use masc_pairing::PeerId;

const TTL: Duration = Duration::from_secs(60);

fn peer(i: usize) -> PeerId {
    PeerId::new(format!("10.0.{}.{}:40000", i / 256, i % 256))
}

fn filled(capacity: usize) -> TimedStore<PeerId, u64> {
    let store = TimedStore::new(TTL, capacity);
    for i in 0..capacity {
        store.set(peer(i), i as u64);
    }
    store
}

// =============================================================================
// Single-threaded
// =============================================================================

fn bench_set(c: &mut Criterion) {
    let mut group = c.benchmark_group("set");

    for capacity in [4, 16, 256] {
        group.throughput(Throughput::Elements(1));

        // Every insert past capacity evicts the oldest entry
        group.bench_with_input(
            BenchmarkId::new("evicting", capacity),
            &capacity,
            |b, &capacity| {
                let store = filled(capacity);
                let mut next = capacity;
                b.iter(|| {
                    store.set(peer(next), next as u64);
                    next += 1;
                });
            },
        );

        group.bench_with_input(
            BenchmarkId::new("overwrite", capacity),
            &capacity,
            |b, &capacity| {
                let store = filled(capacity);
                let mut rng = rand::thread_rng();
                b.iter(|| {
                    let i = rng.gen_range(0..capacity);
                    store.set(peer(i), i as u64);
                });
            },
        );
    }

    group.finish();
}

fn bench_take(c: &mut Criterion) {
    let mut group = c.benchmark_group("take");

    for capacity in [4, 16, 256] {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(
            BenchmarkId::new("set_then_take", capacity),
            &capacity,
            |b, &capacity| {
                let store = filled(capacity);
                let key = peer(capacity + 1);
                b.iter(|| {
                    store.set(key.clone(), 1);
                    black_box(store.take(&key));
                });
            },
        );

        group.bench_with_input(BenchmarkId::new("miss", capacity), &capacity, |b, &capacity| {
            let store = filled(capacity);
            let key = peer(capacity + 1);
            b.iter(|| black_box(store.take(&key)));
        });
    }

    group.finish();
}

fn bench_expiry(c: &mut Criterion) {
    let mut group = c.benchmark_group("expiry");

    for capacity in [16, 256] {
        group.bench_with_input(
            BenchmarkId::new("purge_all", capacity),
            &capacity,
            |b, &capacity| {
                b.iter_batched(
                    || {
                        let clock = Arc::new(ManualClock::new());
                        let store = TimedStore::with_clock(TTL, capacity, clock.clone());
                        for i in 0..capacity {
                            store.set(peer(i), i as u64);
                        }
                        clock.advance(TTL + Duration::from_secs(1));
                        store
                    },
                    |store| black_box(store.len()),
                    criterion::BatchSize::SmallInput,
                );
            },
        );
    }

    group.finish();
}

// =============================================================================
// Concurrent
// =============================================================================

fn bench_concurrent_pairing(c: &mut Criterion) {
    let mut group = c.benchmark_group("concurrent_pairing");

    for threads in [2, 8] {
        group.throughput(Throughput::Elements(threads as u64 * 100));
        group.bench_with_input(
            BenchmarkId::new("register_then_complete", threads),
            &threads,
            |b, &threads| {
                let store = Arc::new(TimedStore::<PeerId, u64>::new(TTL, 16));
                b.iter(|| {
                    let handles: Vec<_> = (0..threads)
                        .map(|t| {
                            let store = store.clone();
                            thread::spawn(move || {
                                for i in 0..100 {
                                    let key = peer(t * 100 + i);
                                    store.set(key.clone(), i as u64);
                                    black_box(store.lock().take(&key));
                                }
                            })
                        })
                        .collect();
                    for handle in handles {
                        let _ = handle.join();
                    }
                });
            },
        );
    }

    group.finish();
}

// =============================================================================
// Criterion Groups
// =============================================================================

criterion_group!(
    benches,
    bench_set,
    bench_take,
    bench_expiry,
    bench_concurrent_pairing,
);

criterion_main!(benches);
