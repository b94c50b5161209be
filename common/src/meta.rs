use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::{Counters, InputSplit, JobId, JobInfo, NodeId, Plan, ProcessDescriptor, TrackerError};

/// A point in the job lifecycle.
///
/// Allowed transitions:
///
/// ```text
/// Setup -> Map -> Reduce -> Complete
///   |       |       |
///   +-------+-------+--> Cancelling -> Complete
/// ```
///
/// `Complete` is terminal; once reached the record is immutable until its
/// TTL evicts it from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobPhase {
    Setup,
    Map,
    Reduce,
    Cancelling,
    Complete,
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobPhase::Setup => "SETUP",
            JobPhase::Map => "MAP",
            JobPhase::Reduce => "REDUCE",
            JobPhase::Cancelling => "CANCELLING",
            JobPhase::Complete => "COMPLETE",
        };
        write!(f, "{name}")
    }
}

/// The replicated per-job record: the only state shared between nodes.
///
/// Mutated exclusively through the store's transform operation; the setters
/// below are meant for transform closures operating on a private copy, never
/// for in-place mutation of a shared record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMetadata {
    job_id: JobId,
    submitter: NodeId,
    job_info: JobInfo,
    plan: Plan,
    phase: JobPhase,
    pending_splits: HashSet<InputSplit>,
    pending_reducers: HashSet<usize>,
    reducer_addresses: HashMap<usize, ProcessDescriptor>,
    counters: Counters,
    fail_cause: Option<TrackerError>,
    submit_ts: SystemTime,
    setup_complete_ts: Option<SystemTime>,
    map_complete_ts: Option<SystemTime>,
    complete_ts: Option<SystemTime>,
    ttl: Option<Duration>,
}

impl JobMetadata {
    /// Fresh record for a newly submitted job: phase `Setup`, all splits and
    /// all reducer indices pending.
    pub fn new(job_id: JobId, submitter: NodeId, job_info: JobInfo, plan: Plan) -> Self {
        let pending_splits = plan.all_splits();
        let pending_reducers = (0..plan.reducer_count()).collect();

        JobMetadata {
            job_id,
            submitter,
            job_info,
            plan,
            phase: JobPhase::Setup,
            pending_splits,
            pending_reducers,
            reducer_addresses: HashMap::new(),
            counters: Counters::new(),
            fail_cause: None,
            submit_ts: SystemTime::now(),
            setup_complete_ts: None,
            map_complete_ts: None,
            complete_ts: None,
            ttl: None,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn submitter(&self) -> NodeId {
        self.submitter
    }

    pub fn job_info(&self) -> &JobInfo {
        &self.job_info
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn phase(&self) -> JobPhase {
        self.phase
    }

    pub fn set_phase(&mut self, phase: JobPhase) {
        self.phase = phase;
    }

    pub fn pending_splits(&self) -> &HashSet<InputSplit> {
        &self.pending_splits
    }

    pub fn remove_pending_splits<'a>(&mut self, splits: impl IntoIterator<Item = &'a InputSplit>) {
        for split in splits {
            self.pending_splits.remove(split);
        }
    }

    pub fn pending_reducers(&self) -> &HashSet<usize> {
        &self.pending_reducers
    }

    pub fn remove_pending_reducers(&mut self, reducers: impl IntoIterator<Item = usize>) {
        for rdc in reducers {
            self.pending_reducers.remove(&rdc);
        }
    }

    pub fn reducer_addresses(&self) -> &HashMap<usize, ProcessDescriptor> {
        &self.reducer_addresses
    }

    pub fn set_reducer_address(&mut self, rdc: usize, desc: ProcessDescriptor) {
        self.reducer_addresses.insert(rdc, desc);
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn merge_counters(&mut self, counters: &Counters) {
        self.counters.merge(counters);
    }

    pub fn fail_cause(&self) -> Option<&TrackerError> {
        self.fail_cause.as_ref()
    }

    pub fn set_fail_cause(&mut self, cause: TrackerError) {
        self.fail_cause = Some(cause);
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    pub fn set_ttl(&mut self, ttl: Duration) {
        self.ttl = Some(ttl);
    }

    pub fn submit_ts(&self) -> SystemTime {
        self.submit_ts
    }

    pub fn mark_setup_complete(&mut self, now: SystemTime) {
        self.setup_complete_ts = Some(now);
    }

    pub fn mark_map_complete(&mut self, now: SystemTime) {
        self.map_complete_ts = Some(now);
    }

    pub fn mark_complete(&mut self, now: SystemTime) {
        self.complete_ts = Some(now);
    }

    /// Time spent in the setup phase.
    pub fn setup_time(&self) -> Option<Duration> {
        diff(self.submit_ts, self.setup_complete_ts?)
    }

    /// Time spent in the map phase.
    pub fn map_time(&self) -> Option<Duration> {
        diff(self.setup_complete_ts?, self.map_complete_ts?)
    }

    /// Time spent in the reduce phase.
    pub fn reduce_time(&self) -> Option<Duration> {
        diff(self.map_complete_ts?, self.complete_ts?)
    }

    /// Wall-clock time from submit to completion.
    pub fn total_time(&self) -> Option<Duration> {
        diff(self.submit_ts, self.complete_ts?)
    }

    /// Client-facing snapshot of this record.
    pub fn status(&self) -> JobStatus {
        JobStatus {
            job_id: self.job_id,
            name: self.job_info.name.clone(),
            phase: self.phase,
            pending_splits: self.pending_splits.len(),
            pending_reducers: self.pending_reducers.len(),
            reducer_count: self.plan.reducer_count(),
            fail_cause: self.fail_cause.clone(),
        }
    }
}

fn diff(from: SystemTime, to: SystemTime) -> Option<Duration> {
    to.duration_since(from).ok()
}

/// Read-only job status view returned by the tracker's status query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: JobId,
    pub name: String,
    pub phase: JobPhase,
    pub pending_splits: usize,
    pub pending_reducers: usize,
    pub reducer_count: usize,
    pub fail_cause: Option<TrackerError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_meta() -> JobMetadata {
        let node = NodeId::random();
        let mut mappers = HashMap::new();
        mappers.insert(
            node,
            HashSet::from([InputSplit::whole("a", 10), InputSplit::whole("b", 10)]),
        );
        let mut reducers = HashMap::new();
        reducers.insert(node, vec![0, 1]);

        JobMetadata::new(
            JobId::new(node, 1),
            node,
            JobInfo::new("sample", "in/*", "out", "wc"),
            Plan::new(mappers, reducers),
        )
    }

    #[test]
    fn new_record_starts_in_setup_with_everything_pending() {
        let meta = sample_meta();

        assert_eq!(meta.phase(), JobPhase::Setup);
        assert_eq!(meta.pending_splits().len(), 2);
        assert_eq!(meta.pending_reducers(), &HashSet::from([0, 1]));
        assert!(meta.fail_cause().is_none());
        assert!(meta.ttl().is_none());
    }

    #[test]
    fn phase_times_derive_from_timestamps() {
        let mut meta = sample_meta();
        let t0 = meta.submit_ts();

        meta.mark_setup_complete(t0 + Duration::from_secs(1));
        meta.mark_map_complete(t0 + Duration::from_secs(4));
        meta.mark_complete(t0 + Duration::from_secs(9));

        assert_eq!(meta.setup_time(), Some(Duration::from_secs(1)));
        assert_eq!(meta.map_time(), Some(Duration::from_secs(3)));
        assert_eq!(meta.reduce_time(), Some(Duration::from_secs(5)));
        assert_eq!(meta.total_time(), Some(Duration::from_secs(9)));
    }

    #[test]
    fn status_snapshots_the_record() {
        let mut meta = sample_meta();
        meta.set_phase(JobPhase::Cancelling);
        meta.set_fail_cause(TrackerError::Cancelled);

        let status = meta.status();

        assert_eq!(status.phase, JobPhase::Cancelling);
        assert_eq!(status.pending_splits, 2);
        assert_eq!(status.fail_cause, Some(TrackerError::Cancelled));
    }
}
