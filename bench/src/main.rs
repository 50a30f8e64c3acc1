//! Memtab Benchmark Tool
//!
//! Multi-threaded load generator: mutator threads run a scenario against one
//! engine while scheduler workers resume yielded enumerations and flush
//! deferred reclamation.

use clap::Parser;
use memtab::config::EngineConfig;
use memtab::scheduler::Worker;
use memtab::types::ProcessId;
use memtab::Engine;
use rand::SeedableRng;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

mod metrics;
mod scenarios;

use metrics::RunStats;
use scenarios::Scenario;

#[derive(Parser, Debug, Clone)]
#[command(name = "memtab-bench")]
#[command(about = "Memtab table engine load generator")]
struct Args {
    #[arg(short = 't', long, default_value = "4")]
    threads: usize,

    /// Scheduler worker threads running aux work
    #[arg(long, default_value = "1")]
    workers: usize,

    #[arg(short = 'd', long, default_value = "10")]
    duration: u64,

    #[arg(short = 's', long, default_value = "churn")]
    scenario: String,

    #[arg(long, default_value = "4")]
    tables: usize,

    #[arg(long, default_value = "1000")]
    rows: usize,

    #[arg(short = 'w', long, default_value = "0")]
    warmup: u64,

    #[arg(long, default_value = "0")]
    seed: u64,
}

fn run_mutator(
    thread_id: usize,
    engine: &Engine,
    scenario: &dyn Scenario,
    stop_flag: &AtomicBool,
    stats: &RunStats,
    seed: u64,
) {
    let seed = seed.wrapping_add(thread_id as u64 * 0x9e3779b97f4a7c15);
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let process = ProcessId(1000 + thread_id as u64);

    while !stop_flag.load(Ordering::Relaxed) {
        let start = Instant::now();
        let res = scenario.execute(engine, process, &mut rng);
        stats.record(start.elapsed(), res);
    }
    engine.on_process_exit(process);
}

fn run_worker(worker_id: usize, engine: &Arc<Engine>, stop_flag: &AtomicBool, stats: &RunStats) {
    let worker = Worker::new(engine, worker_id);
    while !stop_flag.load(Ordering::Relaxed) {
        let report = worker.run_aux_work();
        stats.record_aux_pass(
            report.completed.len(),
            report.reclaimed,
            engine.progress().pending_count(),
        );
        if report.is_idle() {
            worker.idle();
            std::thread::sleep(Duration::from_micros(50));
        }
    }
}

fn main() {
    let args = Args::parse();

    println!("Memtab Benchmark Tool");
    println!("=====================");
    println!("Started: {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"));
    println!("Scenario: {}", args.scenario);
    println!("Threads: {} (+{} workers)", args.threads, args.workers);
    println!("Duration: {}s", args.duration);
    println!("Tables: {}", args.tables);
    println!("Rows: {}", args.rows);
    println!();

    let Some(scenario) = scenarios::by_name(&args.scenario, args.tables, args.rows) else {
        eprintln!("Unknown scenario: {}", args.scenario);
        std::process::exit(1);
    };

    let config = match EngineConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Invalid configuration: {}", err);
            std::process::exit(1);
        }
    };
    let engine = Engine::start(config).expect("Failed to start engine");

    println!("Initializing...");
    scenario.prepare(&engine).expect("Failed to prepare");
    println!("Initialization complete.");

    if args.warmup > 0 {
        println!("Warming up for {}s...", args.warmup);
        std::thread::sleep(Duration::from_secs(args.warmup));
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(args.threads + args.workers + 1)
        .build()
        .expect("Failed to build thread pool");

    let stop_flag = AtomicBool::new(false);
    let stats = RunStats::new();
    let duration = Duration::from_secs(args.duration);

    println!("Running benchmark...");
    let start_time = Instant::now();

    pool.scope(|s| {
        for i in 0..args.workers {
            let (engine, stop_flag, stats) = (&engine, &stop_flag, &stats);
            s.spawn(move |_| run_worker(i, engine, stop_flag, stats));
        }
        for i in 0..args.threads {
            let (engine, scenario, stop_flag, stats) =
                (&engine, scenario.as_ref(), &stop_flag, &stats);
            let seed = args.seed;
            s.spawn(move |_| run_mutator(i, engine, scenario, stop_flag, stats, seed));
        }
        std::thread::sleep(duration);
        stop_flag.store(true, Ordering::Relaxed);
    });

    let elapsed = start_time.elapsed();
    let info = engine.info();
    let drained = engine.shutdown();

    println!();
    stats.print_report(elapsed, &info, drained);
}
