use std::path::PathBuf;
use std::time::Duration;

/// Tunables consumed by the tracker.
///
/// Loading these from the environment or a file is the embedder's concern;
/// the tracker only reads the typed values.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// How long a finished job's metadata record stays in the store before
    /// it self-evicts.
    pub finished_job_info_ttl: Duration,

    /// Root directory for per-job staging directories on this node.
    pub staging_root: PathBuf,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            finished_job_info_ttl: Duration::from_secs(30),
            staging_root: std::env::temp_dir().join("mrg-staging"),
        }
    }
}
