//! Composable mutations of the replicated job record.
//!
//! Every change to a [`JobMetadata`] record is expressed as a pure
//! `old -> new` function handed to the store's transform operation. A
//! [`TransformStack`] layers several such intents: the predecessor applies
//! first to a private copy, the own update applies on top, and the store
//! writes the final copy atomically. This is what lets a counter merge ride
//! along with a phase change without the two racing each other on the same
//! key.

use std::time::{Duration, SystemTime};

use common::{
    Counters, InputSplit, JobMetadata, JobPhase, ProcessDescriptor, TrackerError,
};

/// One mutation kind, applied to a copy of the record.
#[derive(Debug, Clone)]
pub enum MetaUpdate {
    /// Move the job to a new phase, stamping the phase-transition timestamp.
    /// The terminal transition also arms the record's self-eviction TTL.
    UpdatePhase {
        phase: JobPhase,
        ttl: Option<Duration>,
    },

    /// Drop completed (or orphaned) splits from the pending set. An error
    /// fails the job; an empty pending set advances it to the reduce phase.
    RemoveMappers {
        splits: Vec<InputSplit>,
        err: Option<TrackerError>,
    },

    /// Drop a completed reducer from the pending set.
    RemoveReducer {
        rdc: usize,
        err: Option<TrackerError>,
    },

    /// Record where a batch of external reducers can be reached.
    InitializeReducers {
        reducers: Vec<usize>,
        desc: ProcessDescriptor,
    },

    /// Force the job onto the cancellation path, pruning any splits and
    /// reducers that will never report completion.
    CancelJob {
        err: Option<TrackerError>,
        splits: Vec<InputSplit>,
        reducers: Vec<usize>,
    },

    /// Fold task counters into the job counters.
    IncrementCounters { counters: Counters },
}

impl MetaUpdate {
    fn update(&self, cp: &mut JobMetadata) {
        match self {
            MetaUpdate::UpdatePhase { phase, ttl } => {
                cp.set_phase(*phase);

                match phase {
                    JobPhase::Map => cp.mark_setup_complete(SystemTime::now()),
                    JobPhase::Complete => cp.mark_complete(SystemTime::now()),
                    _ => {}
                }

                if let Some(ttl) = ttl {
                    cp.set_ttl(*ttl);
                }
            }

            MetaUpdate::RemoveMappers { splits, err } => {
                cp.remove_pending_splits(splits.iter());

                if let Some(err) = err {
                    if cp.phase() != JobPhase::Cancelling {
                        cp.set_fail_cause(err.clone());
                    }

                    cp.set_phase(JobPhase::Cancelling);
                }

                if cp.pending_splits().is_empty() && cp.phase() != JobPhase::Cancelling {
                    cp.set_phase(JobPhase::Reduce);
                    cp.mark_map_complete(SystemTime::now());
                }
            }

            MetaUpdate::RemoveReducer { rdc, err } => {
                cp.remove_pending_reducers([*rdc]);

                if let Some(err) = err {
                    cp.set_phase(JobPhase::Cancelling);
                    cp.set_fail_cause(err.clone());
                }
            }

            MetaUpdate::InitializeReducers { reducers, desc } => {
                for rdc in reducers {
                    cp.set_reducer_address(*rdc, desc.clone());
                }
            }

            MetaUpdate::CancelJob {
                err,
                splits,
                reducers,
            } => {
                debug_assert!(
                    cp.phase() == JobPhase::Cancelling || err.is_some(),
                    "Cancel without cause outside the cancelling phase: {:?}",
                    cp.job_id()
                );

                cp.remove_pending_splits(splits.iter());
                cp.remove_pending_reducers(reducers.iter().copied());
                cp.set_phase(JobPhase::Cancelling);

                if let Some(err) = err {
                    cp.set_fail_cause(err.clone());
                }
            }

            MetaUpdate::IncrementCounters { counters } => {
                cp.merge_counters(counters);
            }
        }
    }
}

/// A chain of [`MetaUpdate`]s applied bottom-up to a copy of the record.
#[derive(Debug, Clone)]
pub struct TransformStack {
    update: MetaUpdate,
    prev: Option<Box<TransformStack>>,
}

impl TransformStack {
    /// Layer `update` on top of an optional predecessor.
    pub fn stacked(prev: Option<TransformStack>, update: MetaUpdate) -> Self {
        TransformStack {
            update,
            prev: prev.map(Box::new),
        }
    }

    pub fn update_phase(prev: Option<TransformStack>, phase: JobPhase) -> Self {
        TransformStack::stacked(prev, MetaUpdate::UpdatePhase { phase, ttl: None })
    }

    /// Terminal transition: phase `Complete` plus the self-eviction TTL.
    pub fn complete_job(prev: Option<TransformStack>, ttl: Duration) -> Self {
        TransformStack::stacked(
            prev,
            MetaUpdate::UpdatePhase {
                phase: JobPhase::Complete,
                ttl: Some(ttl),
            },
        )
    }

    pub fn remove_mappers(
        prev: Option<TransformStack>,
        splits: Vec<InputSplit>,
        err: Option<TrackerError>,
    ) -> Self {
        TransformStack::stacked(prev, MetaUpdate::RemoveMappers { splits, err })
    }

    pub fn remove_reducer(
        prev: Option<TransformStack>,
        rdc: usize,
        err: Option<TrackerError>,
    ) -> Self {
        TransformStack::stacked(prev, MetaUpdate::RemoveReducer { rdc, err })
    }

    pub fn initialize_reducers(
        prev: Option<TransformStack>,
        reducers: Vec<usize>,
        desc: ProcessDescriptor,
    ) -> Self {
        TransformStack::stacked(prev, MetaUpdate::InitializeReducers { reducers, desc })
    }

    pub fn cancel_job(
        prev: Option<TransformStack>,
        err: Option<TrackerError>,
        splits: Vec<InputSplit>,
        reducers: Vec<usize>,
    ) -> Self {
        TransformStack::stacked(
            prev,
            MetaUpdate::CancelJob {
                err,
                splits,
                reducers,
            },
        )
    }

    pub fn increment_counters(prev: Option<TransformStack>, counters: Counters) -> Self {
        TransformStack::stacked(prev, MetaUpdate::IncrementCounters { counters })
    }

    /// Apply the whole stack to a record, bottom-up, on a private copy.
    ///
    /// A `None` input means the record was already evicted; the mutation is
    /// then a no-op. The input is never mutated, so the store may retry the
    /// application on a fresh copy at will.
    pub fn apply(&self, meta: Option<&JobMetadata>) -> Option<JobMetadata> {
        let meta = meta?;

        let mut cp = match &self.prev {
            Some(prev) => prev.apply(Some(meta))?,
            None => meta.clone(),
        };

        self.update.update(&mut cp);

        Some(cp)
    }
}
