//! Shared data model for the map-reduce-grid cluster.
//!
//! Jobs are described by a [`JobInfo`], partitioned into [`InputSplit`]s by a
//! planner, and tracked through their lifecycle via a single replicated
//! [`JobMetadata`] record per job. Every node observes the same record and
//! derives its local work from it, so all types here are value types:
//! cloneable, comparable and serializable.

mod counters;
mod error;
mod job;
mod meta;
mod plan;
mod split;
mod task;

pub use counters::Counters;
pub use error::TrackerError;
pub use job::{JobId, JobInfo, NodeDescriptor, NodeId, ProcessDescriptor};
pub use meta::{JobMetadata, JobPhase, JobStatus};
pub use plan::Plan;
pub use split::InputSplit;
pub use task::{TaskInfo, TaskState, TaskStatus, TaskType};
