use criterion::{criterion_group, criterion_main, Criterion};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::thread;

// Reference the main crate
extern crate memtab;

use memtab::infrastructure::counter::ShardedCounter;

// Test configuration
const MUTATOR_THREADS: usize = 8;
const UPDATES_PER_THREAD: usize = 20_000;

fn bench_update_scenario<T: Send + Sync + 'static>(
    b: &mut criterion::Bencher,
    create: fn() -> Arc<T>,
    update: fn(&T, i64),
) {
    b.iter(|| {
        let counter = create();

        let handles: Vec<_> = (0..MUTATOR_THREADS)
            .map(|_| {
                let counter = counter.clone();
                thread::spawn(move || {
                    for i in 0..UPDATES_PER_THREAD {
                        // Alternate alloc/free sized deltas
                        let delta = if i % 2 == 0 { 64 } else { -64 };
                        update(&counter, delta);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    });
}

// Benchmark many mutators updating one table's memory counter
pub fn bench_contended_updates(c: &mut Criterion) {
    let mut group = c.benchmark_group("ContendedCounterUpdates");

    group.bench_function("SingleAtomic", |b| {
        bench_update_scenario(
            b,
            || Arc::new(AtomicI64::new(0)),
            |counter: &AtomicI64, delta| {
                counter.fetch_add(delta, Ordering::Relaxed);
            },
        )
    });

    group.bench_function("Centralized", |b| {
        bench_update_scenario(
            b,
            || Arc::new(ShardedCounter::centralized()),
            |counter: &ShardedCounter, delta| counter.add(delta),
        )
    });

    group.bench_function("Decentralized64", |b| {
        bench_update_scenario(
            b,
            || Arc::new(ShardedCounter::decentralized(64)),
            |counter: &ShardedCounter, delta| counter.add(delta),
        )
    });

    group.finish();
}

// Benchmark summing shards on demand
pub fn bench_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("CounterRead");

    for shards in [1usize, 16, 64, 256] {
        let counter = ShardedCounter::decentralized(shards);
        counter.add(1);
        group.bench_function(format!("Shards{}", shards), |b| b.iter(|| counter.read()));
    }

    group.finish();
}

criterion_group!(benches, bench_contended_updates, bench_read);
criterion_main!(benches);
