//! Scheduler workers
//!
//! A worker is a thread that registers with the thread progress service and
//! runs engine auxiliary work between its own jobs: resuming a yielded
//! enumeration and flushing later operations. The worker announces a
//! checkpoint at the start of every aux pass, when it holds no references
//! into table structures.

use crate::enumerator::AllTablesCompletion;
use crate::engine::Engine;
use crate::reclaim::WorkerProgress;
use std::ops::BitOr;
use std::sync::Arc;
use tracing::trace;

/// Set of pending auxiliary work kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AuxWork(u32);

impl AuxWork {
    pub const NONE: AuxWork = AuxWork(0);
    /// An enumeration is parked or queued
    pub const ALL_TABLES_YIELD: AuxWork = AuxWork(1 << 0);
    /// Later operations are waiting for checkpoints
    pub const LATER_OP: AuxWork = AuxWork(1 << 1);

    pub fn contains(self, other: AuxWork) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for AuxWork {
    type Output = AuxWork;

    fn bitor(self, rhs: AuxWork) -> AuxWork {
        AuxWork(self.0 | rhs.0)
    }
}

/// Outcome of one aux work pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AuxWorkReport {
    /// Enumerations completed during the pass
    pub completed: Vec<AllTablesCompletion>,
    /// Later operations executed
    pub reclaimed: usize,
}

impl AuxWorkReport {
    pub fn is_idle(&self) -> bool {
        self.completed.is_empty() && self.reclaimed == 0
    }
}

pub struct Worker {
    id: usize,
    engine: Arc<Engine>,
    progress: WorkerProgress,
}

impl Worker {
    pub fn new(engine: &Arc<Engine>, id: usize) -> Self {
        Self {
            id,
            engine: Arc::clone(engine),
            progress: engine.progress().register_worker(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// True if the engine has aux work a worker could pick up
    pub fn has_aux_work(&self) -> bool {
        !self.engine.aux_work().is_empty()
    }

    /// Runs one aux work pass with the engine's configured scan budget
    pub fn run_aux_work(&self) -> AuxWorkReport {
        self.run_aux_work_with_budget(self.engine.config().scan_budget)
    }

    pub fn run_aux_work_with_budget(&self, budget: usize) -> AuxWorkReport {
        if self.progress.is_sleeping() {
            self.progress.wakeup();
        } else {
            self.progress.progress();
        }

        let work = self.engine.aux_work();
        let mut report = AuxWorkReport::default();
        if work.contains(AuxWork::ALL_TABLES_YIELD) {
            if let Some(done) = self.engine.handle_yielded_all_request(budget) {
                report.completed.push(done);
            }
        }
        if work.contains(AuxWork::LATER_OP) {
            report.reclaimed = self.engine.progress().try_flush();
        }
        if !report.is_idle() {
            trace!(
                worker = self.id,
                completed = report.completed.len(),
                reclaimed = report.reclaimed,
                "aux work pass"
            );
        }
        report
    }

    /// Runs passes until no aux work remains or `max_passes` is reached
    pub fn run_until_idle(&self, max_passes: usize) -> Vec<AllTablesCompletion> {
        let mut completed = Vec::new();
        for _ in 0..max_passes {
            let report = self.run_aux_work();
            completed.extend(report.completed);
            if !self.has_aux_work() {
                break;
            }
        }
        completed
    }

    /// Stops holding back reclamation until the next pass
    pub fn idle(&self) {
        self.progress.sleep();
    }

    pub fn is_idle(&self) -> bool {
        self.progress.is_sleeping()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::TableOptions;
    use crate::types::ProcessId;

    #[test]
    fn test_aux_work_flags() {
        let both = AuxWork::ALL_TABLES_YIELD | AuxWork::LATER_OP;
        assert!(both.contains(AuxWork::LATER_OP));
        assert!(!AuxWork::LATER_OP.contains(AuxWork::ALL_TABLES_YIELD));
        assert!(AuxWork::NONE.is_empty());
        assert_eq!(AuxWork::default(), AuxWork::NONE);
    }

    #[test]
    fn test_worker_resumes_yielded_enumeration() {
        let engine = Engine::start(EngineConfig::default()).unwrap();
        for i in 0..5 {
            engine
                .create_table(ProcessId(1), &format!("t{}", i), TableOptions::default())
                .unwrap();
        }
        assert!(engine.all_tables(ProcessId(2), Some(2)).is_pending());

        let worker = Worker::new(&engine, 0);
        let mut completed = Vec::new();
        while completed.is_empty() {
            completed.extend(worker.run_aux_work_with_budget(2).completed);
        }
        assert_eq!(completed[0].tables.len(), 5);
        assert!(!worker.has_aux_work());
    }

    #[test]
    fn test_idle_worker_does_not_block_reclamation() {
        let engine = Engine::start(EngineConfig::default()).unwrap();
        let busy = Worker::new(&engine, 0);
        let idle = Worker::new(&engine, 1);
        idle.idle();
        assert!(idle.is_idle());

        let id = engine
            .create_table(ProcessId(1), "t", TableOptions::default())
            .unwrap();
        engine.delete_table(ProcessId(1), id).unwrap();

        let completed = busy.run_until_idle(10);
        assert!(completed.is_empty());
        assert!(!busy.has_aux_work());
        assert_eq!(engine.info().linked_tables, 0);
    }

    #[test]
    fn test_active_workers_must_all_pass_checkpoint() {
        let engine = Engine::start(EngineConfig::default()).unwrap();
        let first = Worker::new(&engine, 0);
        let second = Worker::new(&engine, 1);

        let id = engine
            .create_table(ProcessId(1), "t", TableOptions::default())
            .unwrap();
        engine.delete_table(ProcessId(1), id).unwrap();

        // The second worker has not announced a checkpoint yet
        assert_eq!(first.run_aux_work().reclaimed, 0);
        assert!(first.has_aux_work());
        // Payload op, then the node op queued by it on the next pass
        assert_eq!(second.run_aux_work().reclaimed, 1);
        first.run_aux_work();
        second.run_aux_work();
        assert!(!first.has_aux_work());
    }
}
