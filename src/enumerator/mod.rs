//! Cooperative "all tables" enumeration
//!
//! Listing every table may be far too long for one scheduling slice, so a
//! request is served in steps. Each step walks the registry with a
//! [`TableCursor`] for at most `budget` nodes and then suspends, keeping the
//! cursor (and its reclamation pin) in the request. Workers resume the
//! ongoing request through [`AllTablesService::step`].
//!
//! Only one request is walked at a time; others queue in arrival order and
//! are promoted when the ongoing one completes. Tables tombstoned during a
//! walk are skipped, tables created during a walk are not reported.

use crate::memory::DbMemory;
use crate::registry::{Registry, TableCursor};
use crate::table::Table;
use crate::types::{ProcessId, RequestId, TableAccess, TableId};
use linked_hash_map::LinkedHashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, trace, warn};

/// Bytes charged to the miscellaneous counter per outstanding request
pub const REQUEST_RECORD_SIZE: usize = std::mem::size_of::<AllTablesRequest>();

/// Decides which tables a requester may see
///
/// Called once per visited table while the enumerator's request state is
/// locked. Implementations may inspect the table (including its fixation
/// state) but must not call back into enumeration (`all_tables`,
/// `handle_yielded_all_request`, `cancel_all_tables`, process exit), which
/// would deadlock.
pub trait Visibility: Send + Sync {
    fn is_visible(&self, table: &Table, requester: ProcessId) -> bool;
}

impl<F> Visibility for F
where
    F: Fn(&Table, ProcessId) -> bool + Send + Sync,
{
    fn is_visible(&self, table: &Table, requester: ProcessId) -> bool {
        self(table, requester)
    }
}

/// Private tables are listed only for their owner
#[derive(Debug, Default, Clone, Copy)]
pub struct AccessVisibility;

impl Visibility for AccessVisibility {
    fn is_visible(&self, table: &Table, requester: ProcessId) -> bool {
        table.access() != TableAccess::Private || table.owner() == requester
    }
}

/// State of a walk between steps
pub enum ScanProgress {
    Suspended,
    Finished,
}

/// Resumable walk over the registry
pub struct AllTablesScan {
    cursor: TableCursor,
    tables: Vec<TableId>,
    visited: usize,
}

impl AllTablesScan {
    pub fn new(cursor: TableCursor) -> Self {
        Self {
            cursor,
            tables: Vec::new(),
            visited: 0,
        }
    }

    /// Visits at most `budget` nodes (at least one); every node costs one
    /// unit whether or not it is reported
    pub fn advance(
        &mut self,
        budget: usize,
        requester: ProcessId,
        visibility: &dyn Visibility,
    ) -> ScanProgress {
        let mut remaining = budget.max(1);
        while remaining > 0 {
            let Some(table) = self.cursor.next_table() else {
                return ScanProgress::Finished;
            };
            remaining -= 1;
            self.visited += 1;
            if table.is_alive() && visibility.is_visible(&table, requester) {
                self.tables.push(table.table_id());
            }
        }
        if self.cursor.is_exhausted() {
            ScanProgress::Finished
        } else {
            ScanProgress::Suspended
        }
    }

    /// Nodes visited so far
    pub fn visited(&self) -> usize {
        self.visited
    }

    pub fn into_tables(self) -> Vec<TableId> {
        self.tables
    }
}

struct AllTablesRequest {
    id: RequestId,
    requester: ProcessId,
    scan: Option<AllTablesScan>,
    steps: usize,
}

impl AllTablesRequest {
    fn new(id: RequestId, requester: ProcessId) -> Self {
        Self {
            id,
            requester,
            scan: None,
            steps: 0,
        }
    }
}

/// Completed request, delivered to its requester
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllTablesCompletion {
    pub request: RequestId,
    pub requester: ProcessId,
    pub tables: Vec<TableId>,
    /// Scheduling steps the walk took
    pub steps: usize,
}

/// Immediate answer to an enumeration request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllTablesReply {
    /// Finished within the first step
    Done(AllTablesCompletion),
    /// Suspended or queued; completion arrives through a later step
    Pending(RequestId),
}

impl AllTablesReply {
    pub fn is_pending(&self) -> bool {
        matches!(self, AllTablesReply::Pending(_))
    }
}

#[derive(Default)]
struct EnumeratorState {
    ongoing: Option<AllTablesRequest>,
    queue: LinkedHashMap<RequestId, AllTablesRequest>,
    next_request: u64,
}

pub struct AllTablesService {
    state: Mutex<EnumeratorState>,
    has_work: AtomicBool,
    registry: Arc<Registry>,
    visibility: Arc<dyn Visibility>,
    memory: Arc<DbMemory>,
}

impl AllTablesService {
    pub fn new(
        registry: Arc<Registry>,
        visibility: Arc<dyn Visibility>,
        memory: Arc<DbMemory>,
    ) -> Self {
        Self {
            state: Mutex::new(EnumeratorState::default()),
            has_work: AtomicBool::new(false),
            registry,
            visibility,
            memory,
        }
    }

    /// Starts or queues an enumeration for `requester`
    ///
    /// When no other request is ongoing the first step runs immediately.
    pub fn request(&self, requester: ProcessId, budget: usize) -> AllTablesReply {
        let mut state = self.state.lock();
        state.next_request += 1;
        let id = RequestId(state.next_request);
        let request = AllTablesRequest::new(id, requester);
        self.memory.add_misc(REQUEST_RECORD_SIZE as i64);

        if state.ongoing.is_some() {
            state.queue.insert(id, request);
            debug!(request = id.0, requester = %requester, "all-tables request queued");
            return AllTablesReply::Pending(id);
        }
        state.ongoing = Some(request);
        match self.step_locked(&mut state, budget) {
            Some(completion) => AllTablesReply::Done(completion),
            None => AllTablesReply::Pending(id),
        }
    }

    /// Resumes the ongoing request for one step
    ///
    /// Returns the completion when the walk finished during this step.
    pub fn step(&self, budget: usize) -> Option<AllTablesCompletion> {
        let mut state = self.state.lock();
        self.step_locked(&mut state, budget)
    }

    fn step_locked(
        &self,
        state: &mut EnumeratorState,
        budget: usize,
    ) -> Option<AllTablesCompletion> {
        let request = state.ongoing.as_mut()?;
        let registry = &self.registry;
        let scan = request
            .scan
            .get_or_insert_with(|| AllTablesScan::new(registry.cursor()));
        request.steps += 1;

        match scan.advance(budget, request.requester, self.visibility.as_ref()) {
            ScanProgress::Suspended => {
                trace!(
                    request = request.id.0,
                    visited = scan.visited(),
                    "all-tables request yielded"
                );
                self.has_work.store(true, Ordering::Release);
                None
            }
            ScanProgress::Finished => {
                let finished = self.finish_ongoing(state)?;
                Some(self.complete(finished))
            }
        }
    }

    /// Removes the ongoing request and promotes the oldest queued one
    fn finish_ongoing(&self, state: &mut EnumeratorState) -> Option<AllTablesRequest> {
        let finished = state.ongoing.take()?;
        state.ongoing = state.queue.pop_front().map(|(_, next)| next);
        self.has_work
            .store(state.ongoing.is_some(), Ordering::Release);
        self.memory.add_misc(-(REQUEST_RECORD_SIZE as i64));
        Some(finished)
    }

    fn complete(&self, request: AllTablesRequest) -> AllTablesCompletion {
        let tables = request.scan.map(AllTablesScan::into_tables).unwrap_or_default();
        debug!(
            request = request.id.0,
            requester = %request.requester,
            tables = tables.len(),
            steps = request.steps,
            "all-tables request completed"
        );
        AllTablesCompletion {
            request: request.id,
            requester: request.requester,
            tables,
            steps: request.steps,
        }
    }

    /// Withdraws every request of `requester`
    ///
    /// Queued requests are dropped. An ongoing one is dropped too, releasing
    /// its reclamation pin, and the oldest queued request takes its place.
    /// Returns the number withdrawn.
    pub fn cancel(&self, requester: ProcessId) -> usize {
        let mut state = self.state.lock();
        let queued: Vec<RequestId> = state
            .queue
            .iter()
            .filter(|(_, r)| r.requester == requester)
            .map(|(id, _)| *id)
            .collect();
        for id in &queued {
            state.queue.remove(id);
        }
        self.memory
            .add_misc(-((queued.len() * REQUEST_RECORD_SIZE) as i64));

        let mut cancelled = queued.len();
        if state
            .ongoing
            .as_ref()
            .is_some_and(|ongoing| ongoing.requester == requester)
        {
            if let Some(torn_down) = self.finish_ongoing(&mut state) {
                warn!(
                    request = torn_down.id.0,
                    requester = %requester,
                    steps = torn_down.steps,
                    "in-flight all-tables scan abandoned"
                );
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            debug!(requester = %requester, cancelled, "all-tables requests cancelled");
        }
        cancelled
    }

    /// True while a request waits for another step
    pub fn has_pending_work(&self) -> bool {
        self.has_work.load(Ordering::Acquire)
    }

    pub fn ongoing_request(&self) -> Option<RequestId> {
        self.state.lock().ongoing.as_ref().map(|r| r.id)
    }

    pub fn queued_count(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Drops every outstanding request and releases their pins
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        let dropped = state.queue.len() + usize::from(state.ongoing.is_some());
        state.queue.clear();
        state.ongoing = None;
        self.has_work.store(false, Ordering::Release);
        self.memory
            .add_misc(-((dropped * REQUEST_RECORD_SIZE) as i64));
    }
}

#[cfg(test)]
mod tests {
    include!("tests.rs");
}
