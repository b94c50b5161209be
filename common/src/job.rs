use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of a cluster node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(Uuid);

impl NodeId {
    /// Generate a fresh node identity.
    pub fn random() -> Self {
        NodeId(Uuid::new_v4())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Topology entry for a node: its identity plus the cluster join order.
///
/// The join order is what makes "oldest node" a well-defined notion; the
/// update leader for a job is the oldest participating node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub id: NodeId,
    pub order: u64,
}

/// Globally unique identifier of a submitted map-reduce job.
///
/// Composed of the identity of the node the job was submitted through and a
/// counter local to that node, so IDs never collide across the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId {
    origin: NodeId,
    local: u32,
}

impl JobId {
    pub fn new(origin: NodeId, local: u32) -> Self {
        JobId { origin, local }
    }

    pub fn origin(&self) -> NodeId {
        self.origin
    }

    pub fn local(&self) -> u32 {
        self.local
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.origin, self.local)
    }
}

/// Client-supplied description of a job.
///
/// Carries everything needed to reconstruct the runtime job on any node:
/// where the input lives, where output goes, which workload to run and an
/// opaque auxiliary payload forwarded to the map and reduce functions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInfo {
    /// Human-readable job name, used in logs only.
    pub name: String,

    /// The input files path, e.g. `foo/bar/input/*`.
    pub input_path: String,

    /// The output directory, e.g. `foo/bar/out`.
    pub output_path: String,

    /// The intended workload to be run for the job.
    pub workload: String,

    /// Auxiliary payload passed through to the map-reduce application.
    pub aux: Bytes,
}

impl JobInfo {
    pub fn new(
        name: impl Into<String>,
        input_path: impl Into<String>,
        output_path: impl Into<String>,
        workload: impl Into<String>,
    ) -> Self {
        JobInfo {
            name: name.into(),
            input_path: input_path.into(),
            output_path: output_path.into(),
            workload: workload.into(),
            aux: Bytes::new(),
        }
    }

    pub fn with_aux(mut self, aux: Bytes) -> Self {
        self.aux = aux;
        self
    }
}

/// Where an external mapper or reducer process can be reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessDescriptor {
    pub node: NodeId,
    pub host: String,
    pub port: u16,
}

impl ProcessDescriptor {
    pub fn new(node: NodeId, host: impl Into<String>, port: u16) -> Self {
        ProcessDescriptor {
            node,
            host: host.into(),
            port,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_ids_from_different_origins_never_collide() {
        let a = NodeId::random();
        let b = NodeId::random();

        assert_ne!(JobId::new(a, 0), JobId::new(b, 0));
        assert_ne!(JobId::new(a, 0), JobId::new(a, 1));
        assert_eq!(JobId::new(a, 7), JobId::new(a, 7));
    }
}
