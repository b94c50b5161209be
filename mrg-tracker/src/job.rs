use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use tracing::debug;

use common::{JobId, JobInfo, NodeId};

/// Node-local runtime handle for a job.
///
/// Created at most once per job per node by the registry, on first need.
/// Owns the node's staging directory for the job; destroyed when the job
/// reaches its terminal phase or the tracker stops.
#[derive(Debug)]
pub struct Job {
    id: JobId,
    info: JobInfo,
    staging_dir: PathBuf,
    disposed: AtomicBool,
}

impl Job {
    pub(crate) fn new(id: JobId, info: JobInfo, staging_root: &Path) -> Self {
        Job {
            id,
            info,
            staging_dir: staging_root.join(format!("job-{id}")),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn info(&self) -> &JobInfo {
        &self.info
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    pub(crate) fn initialize(&self, local_node: NodeId) -> anyhow::Result<()> {
        fs::create_dir_all(&self.staging_dir)
            .with_context(|| format!("Failed to create staging directory for job {}", self.id))?;

        debug!("Initialized job {} on node {}", self.id, local_node);
        Ok(())
    }

    pub(crate) fn cleanup_staging_directory(&self) -> anyhow::Result<()> {
        if self.staging_dir.exists() {
            fs::remove_dir_all(&self.staging_dir).with_context(|| {
                format!("Failed to remove staging directory for job {}", self.id)
            })?;
        }
        Ok(())
    }

    pub(crate) fn dispose(&self, interrupt: bool) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            debug!("Disposed job {} (interrupt={})", self.id, interrupt);
        }
    }
}
