use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;

use common::JobId;

use crate::job::Job;

/// Node-local map of lazily materialized [`Job`] handles.
///
/// Guarantees at-most-one construction per job: the first caller runs the
/// initializer, concurrent callers await the same cell. A failed
/// construction leaves no entry behind, so a retry starts fresh.
#[derive(Default)]
pub(crate) struct JobRegistry {
    jobs: Mutex<HashMap<JobId, Arc<OnceCell<Arc<Job>>>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        JobRegistry::default()
    }

    /// The cell for a job, inserted if absent.
    pub fn entry(&self, job_id: JobId) -> Arc<OnceCell<Arc<Job>>> {
        self.jobs
            .lock()
            .unwrap()
            .entry(job_id)
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    pub fn contains(&self, job_id: JobId) -> bool {
        self.jobs.lock().unwrap().contains_key(&job_id)
    }

    /// Drop the entry, returning the job if it was ever constructed.
    pub fn remove(&self, job_id: JobId) -> Option<Arc<Job>> {
        self.jobs
            .lock()
            .unwrap()
            .remove(&job_id)
            .and_then(|cell| cell.get().cloned())
    }

    /// Every constructed job, draining the registry. Used at shutdown.
    pub fn drain(&self) -> Vec<Arc<Job>> {
        self.jobs
            .lock()
            .unwrap()
            .drain()
            .filter_map(|(_, cell)| cell.get().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use common::{JobInfo, NodeId};

    use super::*;

    #[tokio::test]
    async fn concurrent_callers_get_the_same_job() {
        let registry = Arc::new(JobRegistry::new());
        let node = NodeId::random();
        let job_id = JobId::new(node, 1);
        let root = std::env::temp_dir().join(format!("mrg-registry-test-{node}"));

        let make = |registry: Arc<JobRegistry>, root: std::path::PathBuf| async move {
            registry
                .entry(job_id)
                .get_or_try_init(|| async {
                    let job = Job::new(job_id, JobInfo::new("t", "in/*", "out", "wc"), &root);
                    job.initialize(node)?;
                    Ok::<_, anyhow::Error>(Arc::new(job))
                })
                .await
                .cloned()
        };

        let (a, b) = tokio::join!(
            make(Arc::clone(&registry), root.clone()),
            make(Arc::clone(&registry), root.clone())
        );

        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(Arc::ptr_eq(&a, &b));

        assert!(registry.remove(job_id).is_some());
        assert!(!registry.contains(job_id));
        let _ = std::fs::remove_dir_all(&root);
    }
}
