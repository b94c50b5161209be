use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use common::InputSplit;

/// Per-job scheduler bookkeeping local to this node. Never replicated.
///
/// Tracks which of the locally assigned mappers and reducers have already
/// been handed to the task executor, so re-delivered record snapshots never
/// dispatch the same work twice. The scheduled sets are only touched from
/// the tracker's event loop; the completed-mapper counter is atomic because
/// task-completion callbacks arrive on executor threads.
#[derive(Debug, Default)]
pub(crate) struct JobLocalState {
    mappers: Mutex<HashSet<InputSplit>>,
    reducers: Mutex<HashSet<usize>>,
    completed_mappers: AtomicUsize,
    latches: Mutex<Latches>,
}

#[derive(Debug, Default)]
struct Latches {
    cancelled: bool,
    aborted: bool,
}

impl JobLocalState {
    pub fn new() -> Self {
        JobLocalState::default()
    }

    /// Returns true if the split was not scheduled before.
    pub fn add_mapper(&self, split: InputSplit) -> bool {
        self.mappers.lock().unwrap().insert(split)
    }

    /// Returns true if the reducer was not scheduled before.
    pub fn add_reducer(&self, rdc: usize) -> bool {
        self.reducers.lock().unwrap().insert(rdc)
    }

    pub fn mapper_scheduled(&self, split: &InputSplit) -> bool {
        self.mappers.lock().unwrap().contains(split)
    }

    pub fn reducer_scheduled(&self, rdc: usize) -> bool {
        self.reducers.lock().unwrap().contains(&rdc)
    }

    /// Every split scheduled on this node so far.
    pub fn scheduled_mappers(&self) -> Vec<InputSplit> {
        self.mappers.lock().unwrap().iter().cloned().collect()
    }

    /// Record one more finished local mapper; true when it was the last one
    /// scheduled here.
    pub fn on_mapper_completed(&self) -> bool {
        let done = self.completed_mappers.fetch_add(1, Ordering::SeqCst) + 1;
        done == self.mappers.lock().unwrap().len()
    }

    /// One-shot cancellation latch; true exactly once, and never after the
    /// abort latch fired.
    pub fn on_cancel(&self) -> bool {
        let mut latches = self.latches.lock().unwrap();
        if !latches.cancelled && !latches.aborted {
            latches.cancelled = true;
            return true;
        }
        false
    }

    /// One-shot abort latch; true exactly once.
    pub fn on_aborted(&self) -> bool {
        let mut latches = self.latches.lock().unwrap();
        if !latches.aborted {
            latches.aborted = true;
            return true;
        }
        false
    }
}
