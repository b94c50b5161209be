//! Contracts between the tracker and its collaborators.
//!
//! The tracker is deliberately ignorant of how any of these are implemented:
//! it plans through a [`Planner`], hands tasks to a [`TaskExecutor`], asks
//! the [`Shuffle`] subsystem to flush intermediate output, and learns about
//! cluster topology from [`Discovery`]. The surrounding runtime provides the
//! node identity and the per-job leader predicate through [`RuntimeContext`].

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::BoxFuture;

use common::{JobId, JobMetadata, NodeDescriptor, NodeId, Plan, TaskInfo};

use crate::config::TrackerConfig;
use crate::job::Job;

/// Callback invoked with the descriptor of every node that leaves or fails.
pub type TopologySubscriber = Box<dyn Fn(NodeDescriptor) + Send + Sync>;

/// Cluster membership, provided by the surrounding runtime.
pub trait Discovery: Send + Sync {
    /// Nodes currently alive in the cluster.
    fn live_nodes(&self) -> HashSet<NodeId>;

    /// Register for node-left and node-failed events.
    ///
    /// Callbacks must not block: the tracker only enqueues the event onto
    /// its own processing loop.
    fn subscribe(&self, subscriber: TopologySubscriber);
}

/// Produces the split/reducer assignment for a job against the live topology.
pub trait Planner: Send + Sync {
    fn plan(&self, job: &Job, live_nodes: &HashSet<NodeId>) -> anyhow::Result<Plan>;
}

/// Runs tasks on behalf of the tracker.
///
/// Completion is reported back through `JobTracker::on_task_finished`, on
/// whatever thread the executor runs its tasks.
pub trait TaskExecutor: Send + Sync {
    /// Dispatch a batch of tasks for execution.
    fn run(&self, job: Arc<Job>, tasks: Vec<TaskInfo>);

    /// Cancel every running task of the given job on this node.
    fn cancel_tasks(&self, job_id: JobId);

    /// Observe a new snapshot of the replicated job record.
    ///
    /// Called for every record update the node sees, including re-deliveries
    /// of an unchanged snapshot, so implementations must be idempotent.
    /// Returning an error cancels the job.
    fn on_job_state_changed(&self, meta: &JobMetadata) -> anyhow::Result<()>;
}

/// Shuffle subsystem: moves intermediate map output to reducers.
pub trait Shuffle: Send + Sync {
    /// Flush buffered intermediate output for the job. The returned future
    /// resolves once all of it has been handed off.
    fn flush(&self, job_id: JobId) -> BoxFuture<'static, anyhow::Result<()>>;

    /// The job reached its terminal phase; release any per-job resources.
    fn job_finished(&self, job_id: JobId);
}

/// Node-local runtime facts the tracker needs.
pub trait RuntimeContext: Send + Sync {
    /// Identity of this node.
    fn local_node(&self) -> NodeId;

    /// Cluster join order of this node.
    fn local_node_order(&self) -> u64;

    /// Whether this node is authorized to emit singleton tasks (SETUP,
    /// COMMIT, ABORT) and drive node-left recovery. Exactly one node per
    /// job answers true; typically the oldest participating node.
    fn is_update_leader(&self) -> bool;

    /// Whether this node takes part in the given job. The update leader
    /// always does: it runs the singleton tasks and drives recovery even
    /// when the plan assigns it no splits.
    fn is_participating(&self, meta: &JobMetadata) -> bool {
        self.is_update_leader()
            || meta.submitter() == self.local_node()
            || meta.plan().has_node(self.local_node())
    }

    fn config(&self) -> &TrackerConfig;
}
