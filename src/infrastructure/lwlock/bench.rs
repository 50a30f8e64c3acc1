use criterion::{criterion_group, criterion_main, Criterion};
use std::sync::Arc;
use std::thread;

// Reference the main crate
extern crate memtab;

use memtab::config::SpinCount;
use memtab::infrastructure::lwlock::TableLock;

// Test configuration
const READ_THREADS: usize = 8;
const WRITE_THREADS: usize = 1;
const OPERATIONS_PER_THREAD: usize = 10_000;

// Generic lock benchmark function
fn bench_lock_scenario(
    b: &mut criterion::Bencher,
    spin: SpinCount,
    read_op: fn(&TableLock<usize>) -> usize,
    write_op: fn(&TableLock<usize>, usize),
) {
    b.iter(|| {
        let lock = Arc::new(TableLock::with_spin(0usize, spin));

        // Spawn read threads
        let read_handles: Vec<_> = (0..READ_THREADS)
            .map(|_| {
                let lock = lock.clone();
                thread::spawn(move || {
                    for _ in 0..OPERATIONS_PER_THREAD {
                        read_op(&lock);
                    }
                })
            })
            .collect();

        // Spawn write threads
        let write_handles: Vec<_> = (0..WRITE_THREADS)
            .map(|_| {
                let lock = lock.clone();
                thread::spawn(move || {
                    for i in 0..OPERATIONS_PER_THREAD {
                        write_op(&lock, i);
                    }
                })
            })
            .collect();

        // Wait for all threads to complete
        for handle in read_handles {
            handle.join().unwrap();
        }
        for handle in write_handles {
            handle.join().unwrap();
        }
    });
}

const LEVELS: [(&str, SpinCount); 4] = [
    ("None", SpinCount::None),
    ("Low", SpinCount::Low),
    ("Normal", SpinCount::Normal),
    ("VeryHigh", SpinCount::VeryHigh),
];

// Benchmark read-write mix scenario per spin level
pub fn bench_rw_mix(c: &mut Criterion) {
    let mut group = c.benchmark_group("ReadWriteMix");

    for (name, spin) in LEVELS {
        group.bench_function(name, |b| {
            bench_lock_scenario(b, spin, |lock| *lock.read(), |lock, value| {
                *lock.write() = value
            })
        });
    }

    group.finish();
}

// Benchmark write-only scenario per spin level
pub fn bench_write_only(c: &mut Criterion) {
    let mut group = c.benchmark_group("WriteOnly");

    for (name, spin) in LEVELS {
        group.bench_function(name, |b| {
            bench_lock_scenario(b, spin, |_| 0, |lock, value| *lock.write() = value)
        });
    }

    group.finish();
}

// Export the benchmark group for criterion
criterion_group!(benches, bench_rw_mix, bench_write_only);

// Only run the benchmark group when this file is executed directly
criterion_main!(benches);
