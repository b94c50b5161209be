use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::JobId;

/// Errors surfaced by the job tracker.
///
/// The taxonomy doubles as the fail cause stored in the replicated job
/// record, so every variant is cloneable, comparable and serializable.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum TrackerError {
    /// The tracker is shutting down; no new work is accepted.
    #[error("Failed to execute map-reduce job (tracker is stopping)")]
    Stopping,

    /// A job with the same ID already exists locally or in the metadata store.
    #[error("Job with the same ID already exists: {0}")]
    DuplicateJob(JobId),

    /// No metadata record exists for the job.
    #[error("No metadata found for job: {0}")]
    UnknownJob(JobId),

    /// A task reported failure; the message carries the task's own cause.
    #[error("Task failed: {message}")]
    TaskFailed { message: String },

    /// The planner could not produce an assignment at submit time.
    #[error("Failed to plan map-reduce job: {message}")]
    Planning { message: String },

    /// A node hosting part of the job left the cluster mid-flight.
    #[error("One or more nodes participating in map-reduce job execution failed")]
    ParticipantLost,

    /// The job was cancelled on request.
    #[error("Job cancelled")]
    Cancelled,
}

impl TrackerError {
    /// Wrap an arbitrary task error, keeping its full context chain.
    pub fn task_failed(err: &anyhow::Error) -> Self {
        TrackerError::TaskFailed {
            message: format!("{err:#}"),
        }
    }
}
