use serde::{Deserialize, Serialize};

use crate::{Counters, InputSplit, JobId, NodeId, TrackerError};

/// Kind of a task dispatched to the task executor.
///
/// `Setup`, `Commit` and `Abort` are singleton tasks: they run exactly once
/// per job, on the update leader. `Map`, `Reduce` and `Combine` fan out per
/// split or reducer index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskType {
    Setup,
    Map,
    Reduce,
    Combine,
    Commit,
    Abort,
}

/// Description of a single task instance handed to the task executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub node: NodeId,
    pub task_type: TaskType,
    pub job_id: JobId,
    pub task_number: usize,
    pub attempt: u32,
    pub split: Option<InputSplit>,
}

impl TaskInfo {
    pub fn new(
        node: NodeId,
        task_type: TaskType,
        job_id: JobId,
        task_number: usize,
        split: Option<InputSplit>,
    ) -> Self {
        TaskInfo {
            node,
            task_type,
            job_id,
            task_number,
            attempt: 0,
            split,
        }
    }
}

/// Execution state of a task as reported by the task executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Running,
    Completed,
    Failed,
    Crashed,
    Cancelled,
}

/// Terminal status reported back through the task-finished callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub state: TaskState,
    pub fail_cause: Option<TrackerError>,
    pub counters: Counters,
}

impl TaskStatus {
    pub fn completed() -> Self {
        TaskStatus {
            state: TaskState::Completed,
            fail_cause: None,
            counters: Counters::new(),
        }
    }

    pub fn failed(cause: TrackerError) -> Self {
        TaskStatus {
            state: TaskState::Failed,
            fail_cause: Some(cause),
            counters: Counters::new(),
        }
    }

    pub fn crashed(cause: TrackerError) -> Self {
        TaskStatus {
            state: TaskState::Crashed,
            fail_cause: Some(cause),
            counters: Counters::new(),
        }
    }

    pub fn cancelled() -> Self {
        TaskStatus {
            state: TaskState::Cancelled,
            fail_cause: None,
            counters: Counters::new(),
        }
    }

    pub fn with_counters(mut self, counters: Counters) -> Self {
        self.counters = counters;
        self
    }

    /// Whether this status fails the whole job.
    pub fn is_failure(&self) -> bool {
        matches!(self.state, TaskState::Failed | TaskState::Crashed)
    }
}
