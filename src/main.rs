//! Memtab demo entry
//!
//! Starts an engine from the environment (or from a JSON config file given
//! as the first argument), runs a short table lifecycle with one scheduler
//! worker and prints the final engine snapshot as JSON.

// Use jemalloc as global allocator
#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

use memtab::config::EngineConfig;
use memtab::scheduler::Worker;
use memtab::types::{ProcessId, TableAccess, TableKind};
use memtab::{AllTablesReply, Engine, TableOptions};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::from_env()?,
    };
    let engine = Engine::start(config)?;
    let worker = Worker::new(&engine, 0);

    let owner = ProcessId(1);
    let reader = ProcessId(2);
    let fixer = ProcessId(3);

    let mut ids = Vec::new();
    for (name, kind) in [("A", TableKind::Hash), ("B", TableKind::Tree), ("C", TableKind::CaTree)] {
        let id = engine.create_table(
            owner,
            name,
            TableOptions::new(kind).named().access(TableAccess::Public),
        )?;
        for i in 0..16u32 {
            engine.insert(owner, id, &i.to_be_bytes(), name.as_bytes())?;
        }
        ids.push(id);
    }

    engine.fix(fixer, ids[0])?;
    engine.delete_table(owner, ids[0])?;
    info!(tables = engine.table_count(), "deleted a fixed table");

    let completion = match engine.all_tables(reader, Some(1)) {
        AllTablesReply::Done(done) => Some(done),
        AllTablesReply::Pending(request) => {
            info!(request = request.0, "enumeration yielded");
            worker.run_until_idle(64).into_iter().next()
        }
    };
    if let Some(done) = completion {
        info!(tables = ?done.tables, steps = done.steps, "enumeration completed");
    }

    let summary = engine.on_process_exit(fixer);
    info!(?summary, "fixing process exited");
    worker.run_until_idle(64);
    worker.idle();

    println!("{}", serde_json::to_string_pretty(&engine.info())?);
    engine.shutdown();
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "memtab demo failed");
            ExitCode::FAILURE
        }
    }
}
