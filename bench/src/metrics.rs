//! Run statistics for the load generator
//!
//! Mutator threads report one outcome per scenario iteration; scheduler
//! workers report what their aux passes achieved. Latencies land in
//! power-of-two buckets so percentiles can be read without storing samples.

use memtab::{DbError, EngineInfo};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const LATENCY_BUCKETS: usize = 64;

fn error_kind(err: &DbError) -> &'static str {
    match err {
        DbError::NoSuchTable(_) => "no_such_table",
        DbError::NameNotFound(_) => "name_not_found",
        DbError::TableAlreadyExists(_) => "table_already_exists",
        DbError::SystemLimit(_) => "system_limit",
        DbError::OutOfMemory { .. } => "out_of_memory",
        DbError::AccessDenied { .. } => "access_denied",
        DbError::NotFixed { .. } => "not_fixed",
    }
}

/// Counters shared by mutators and scheduler workers
pub struct RunStats {
    iterations: AtomicU64,
    latency: [AtomicU64; LATENCY_BUCKETS],
    failures: Mutex<BTreeMap<&'static str, u64>>,
    enumerations: AtomicU64,
    later_ops: AtomicU64,
    idle_passes: AtomicU64,
    peak_pending: AtomicU64,
}

impl RunStats {
    pub fn new() -> Self {
        Self {
            iterations: AtomicU64::new(0),
            latency: std::array::from_fn(|_| AtomicU64::new(0)),
            failures: Mutex::new(BTreeMap::new()),
            enumerations: AtomicU64::new(0),
            later_ops: AtomicU64::new(0),
            idle_passes: AtomicU64::new(0),
            peak_pending: AtomicU64::new(0),
        }
    }

    /// Records one scenario iteration
    pub fn record(&self, latency: Duration, outcome: Result<(), DbError>) {
        match outcome {
            Ok(()) => {
                self.iterations.fetch_add(1, Ordering::Relaxed);
                let nanos = latency.as_nanos().max(1) as u64;
                let bucket = (63 - nanos.leading_zeros()) as usize;
                self.latency[bucket].fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => *self.failures.lock().entry(error_kind(&err)).or_default() += 1,
        }
    }

    /// Records one aux pass of a scheduler worker
    pub fn record_aux_pass(&self, enumerations: usize, later_ops: usize, pending: usize) {
        if enumerations == 0 && later_ops == 0 {
            self.idle_passes.fetch_add(1, Ordering::Relaxed);
        }
        self.enumerations
            .fetch_add(enumerations as u64, Ordering::Relaxed);
        self.later_ops.fetch_add(later_ops as u64, Ordering::Relaxed);
        self.peak_pending.fetch_max(pending as u64, Ordering::Relaxed);
    }

    pub fn iterations(&self) -> u64 {
        self.iterations.load(Ordering::Relaxed)
    }

    /// Upper bound of the bucket holding the `q` quantile, in microseconds
    fn latency_quantile_us(&self, q: f64) -> f64 {
        let counts: Vec<u64> = self
            .latency
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect();
        let total: u64 = counts.iter().sum();
        if total == 0 {
            return 0.0;
        }
        let target = ((total as f64) * q).ceil() as u64;
        let mut seen = 0;
        for (bucket, count) in counts.iter().enumerate() {
            seen += count;
            if seen >= target {
                return (1u128 << (bucket + 1)) as f64 / 1000.0;
            }
        }
        0.0
    }

    pub fn print_report(&self, elapsed: Duration, info: &EngineInfo, drained_at_shutdown: usize) {
        let iterations = self.iterations();
        println!("Scenario iterations:");
        println!(
            "    completed:         {:>12} ({:.1}/s)",
            iterations,
            iterations as f64 / elapsed.as_secs_f64()
        );
        println!(
            "    latency:           p50 <= {:.2} us, p99 <= {:.2} us",
            self.latency_quantile_us(0.50),
            self.latency_quantile_us(0.99)
        );
        let failures = self.failures.lock();
        if failures.is_empty() {
            println!("    failures:          {:>12}", 0);
        }
        for (kind, count) in failures.iter() {
            println!("    failed ({}): {:>12}", kind, count);
        }

        println!();
        println!("Scheduler workers:");
        println!(
            "    enumerations:      {:>12}",
            self.enumerations.load(Ordering::Relaxed)
        );
        println!(
            "    later ops run:     {:>12} (+{} at shutdown)",
            self.later_ops.load(Ordering::Relaxed),
            drained_at_shutdown
        );
        println!(
            "    peak pending ops:  {:>12}",
            self.peak_pending.load(Ordering::Relaxed)
        );
        println!(
            "    idle passes:       {:>12}",
            self.idle_passes.load(Ordering::Relaxed)
        );

        println!();
        println!("Engine at stop:");
        println!("    live tables:       {:>12}", info.table_count);
        println!("    tombstoned tables: {:>12}", info.tombstoned_tables);
        println!("    fixing processes:  {:>12}", info.fixing_processes);
        println!("    misc memory:       {:>12} bytes", info.misc_memory);
    }
}

impl Default for RunStats {
    fn default() -> Self {
        Self::new()
    }
}
