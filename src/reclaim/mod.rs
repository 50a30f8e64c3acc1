//! Deferred reclamation through thread progress checkpoints
//!
//! Memory that concurrent readers may still reach is not freed directly.
//! Instead a *later operation* is queued together with the global epoch at
//! the time of scheduling. Every participant (a worker thread, or a pin held
//! by a suspended traversal) publishes the epoch it last observed. An
//! operation scheduled at epoch `E` runs once every active participant has
//! observed an epoch greater than `E`, meaning each of them passed a
//! checkpoint after the memory became unreachable.
//!
//! Sleeping workers publish [`INACTIVE`] and never hold back reclamation.
//!
//! Once the service is closed at shutdown, workers stop counting but pins do
//! not: operations a live pin may still reach stay queued, and the last pin
//! to leave runs them.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, trace};

/// Observed epoch of a participant that holds no references
pub const INACTIVE: u64 = u64::MAX;

type LaterOpFn = Box<dyn FnOnce() + Send + 'static>;

struct LaterOp {
    epoch: u64,
    op: LaterOpFn,
}

#[derive(Debug)]
struct ProgressSlot {
    observed: AtomicU64,
    pinned: bool,
}

/// Epoch clock, participant registry and later-operation queue
pub struct ThreadProgress {
    epoch: AtomicU64,
    slots: Mutex<Vec<Arc<ProgressSlot>>>,
    pending: Mutex<VecDeque<LaterOp>>,
    executed: AtomicU64,
    closed: AtomicBool,
}

impl ThreadProgress {
    pub fn new() -> Self {
        Self {
            epoch: AtomicU64::new(0),
            slots: Mutex::new(Vec::new()),
            pending: Mutex::new(VecDeque::new()),
            executed: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Current global epoch
    pub fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Registers a long-lived participant (a scheduler worker)
    pub fn register_worker(self: &Arc<Self>) -> WorkerProgress {
        WorkerProgress {
            progress: Arc::clone(self),
            slot: self.attach(false),
        }
    }

    /// Pins the current epoch until the returned guard is dropped
    ///
    /// Anything reachable through pointers loaded after pinning stays
    /// allocated while the pin lives.
    pub fn pin(self: &Arc<Self>) -> ProgressPin {
        ProgressPin {
            progress: Arc::clone(self),
            slot: self.attach(true),
        }
    }

    fn attach(&self, pinned: bool) -> Arc<ProgressSlot> {
        let mut slots = self.slots.lock();
        // Published under the slots lock so a concurrent flush either sees
        // this slot or computed its bound before the epoch we observe.
        let slot = Arc::new(ProgressSlot {
            observed: AtomicU64::new(self.epoch.load(Ordering::SeqCst)),
            pinned,
        });
        slots.push(Arc::clone(&slot));
        slot
    }

    fn detach(&self, slot: &Arc<ProgressSlot>) {
        self.slots.lock().retain(|s| !Arc::ptr_eq(s, slot));
    }

    /// Queues `op` to run after every active participant passes a checkpoint
    ///
    /// Returns the epoch the operation was scheduled at.
    pub fn schedule_later_op<F>(&self, op: F) -> u64
    where
        F: FnOnce() + Send + 'static,
    {
        let mut pending = self.pending.lock();
        // Taken under the queue lock so the queue stays ordered by epoch
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst);
        pending.push_back(LaterOp {
            epoch,
            op: Box::new(op),
        });
        epoch
    }

    /// Operations scheduled before this epoch may run
    ///
    /// The smallest epoch observed by an active participant, capped by the
    /// current epoch so that operations queued after the bound was taken
    /// are never covered by it.
    pub fn safe_epoch(&self) -> u64 {
        self.bound(false)
    }

    /// Reclamation bound over pins only, or over every participant
    fn bound(&self, pins_only: bool) -> u64 {
        let slots = self.slots.lock();
        let current = self.epoch.load(Ordering::SeqCst);
        slots
            .iter()
            .filter(|slot| slot.pinned || !pins_only)
            .map(|slot| slot.observed.load(Ordering::SeqCst))
            .fold(current, u64::min)
    }

    /// Runs every later operation whose epoch all participants have passed
    ///
    /// Operations run outside the queue lock and may schedule further
    /// operations; those are picked up in the same call when already safe.
    /// Returns the number of operations executed.
    pub fn try_flush(&self) -> usize {
        self.flush(false)
    }

    fn flush(&self, pins_only: bool) -> usize {
        let mut total = 0;
        loop {
            let safe = self.bound(pins_only);
            let ready: Vec<LaterOp> = {
                let mut pending = self.pending.lock();
                let mut ready = Vec::new();
                while pending.front().is_some_and(|op| op.epoch < safe) {
                    if let Some(op) = pending.pop_front() {
                        ready.push(op);
                    }
                }
                ready
            };
            if ready.is_empty() {
                break;
            }
            total += ready.len();
            for later in ready {
                trace!(epoch = later.epoch, "running later op");
                (later.op)();
            }
        }
        if total > 0 {
            self.executed.fetch_add(total as u64, Ordering::Relaxed);
            debug!(executed = total, "flushed later ops");
        }
        total
    }

    /// Closes the service and runs every queued operation no pin can reach
    ///
    /// Workers are ignored from here on since they no longer touch table
    /// structures. Operations held back by a live pin stay queued until the
    /// last such pin is dropped. Returns the number of operations run.
    pub(crate) fn drain_all(&self) -> usize {
        self.closed.store(true, Ordering::SeqCst);
        self.flush(true)
    }

    /// True once the service has been closed for shutdown
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of live pins
    pub fn pin_count(&self) -> usize {
        self.slots.lock().iter().filter(|slot| slot.pinned).count()
    }

    /// Number of queued later operations
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Number of later operations run so far
    pub fn executed_count(&self) -> u64 {
        self.executed.load(Ordering::Relaxed)
    }

    /// Number of registered workers and live pins
    pub fn participant_count(&self) -> usize {
        self.slots.lock().len()
    }
}

impl Default for ThreadProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ThreadProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadProgress")
            .field("epoch", &self.current_epoch())
            .field("participants", &self.participant_count())
            .field("pending", &self.pending_count())
            .finish()
    }
}

/// Progress handle of a scheduler worker
///
/// The worker announces checkpoints with [`WorkerProgress::progress`] at
/// points where it holds no references into shared table structures.
#[derive(Debug)]
pub struct WorkerProgress {
    progress: Arc<ThreadProgress>,
    slot: Arc<ProgressSlot>,
}

impl WorkerProgress {
    /// Announces a checkpoint
    pub fn progress(&self) {
        let epoch = self.progress.epoch.load(Ordering::SeqCst);
        self.slot.observed.store(epoch, Ordering::SeqCst);
    }

    /// Marks the worker idle; it stops holding back reclamation
    pub fn sleep(&self) {
        self.slot.observed.store(INACTIVE, Ordering::SeqCst);
    }

    /// Marks the worker active again at the current epoch
    pub fn wakeup(&self) {
        self.progress();
    }

    pub fn is_sleeping(&self) -> bool {
        self.slot.observed.load(Ordering::SeqCst) == INACTIVE
    }

    pub fn observed_epoch(&self) -> u64 {
        self.slot.observed.load(Ordering::SeqCst)
    }

    /// The shared progress service
    pub fn service(&self) -> &Arc<ThreadProgress> {
        &self.progress
    }
}

impl Drop for WorkerProgress {
    fn drop(&mut self) {
        self.progress.detach(&self.slot);
    }
}

/// Epoch pin held by a traversal; reclamation of anything it may reach
/// waits until the pin is dropped
pub struct ProgressPin {
    progress: Arc<ThreadProgress>,
    slot: Arc<ProgressSlot>,
}

impl ProgressPin {
    /// Epoch observed when the pin was taken
    pub fn epoch(&self) -> u64 {
        self.slot.observed.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for ProgressPin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressPin")
            .field("epoch", &self.epoch())
            .finish()
    }
}

impl Drop for ProgressPin {
    fn drop(&mut self) {
        self.progress.detach(&self.slot);
        if self.progress.is_closed() {
            self.progress.flush(true);
        }
    }
}

#[cfg(test)]
mod tests {
    include!("tests.rs");
}
