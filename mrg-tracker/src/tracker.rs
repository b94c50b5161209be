use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{watch, RwLock, RwLockReadGuard};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use common::{
    Counters, InputSplit, JobId, JobInfo, JobMetadata, JobPhase, JobStatus, NodeDescriptor, Plan,
    ProcessDescriptor, TaskInfo, TaskState, TaskStatus, TaskType, TrackerError,
};

use crate::event::{self, TrackerEvent};
use crate::future::{FinishFuture, FinishSender, JobOutcome};
use crate::job::Job;
use crate::local::JobLocalState;
use crate::registry::JobRegistry;
use crate::runtime::{Discovery, Planner, RuntimeContext, Shuffle, TaskExecutor};
use crate::store::MetadataStore;
use crate::transform::TransformStack;

/// The per-node job tracker: the public facade of the cluster's map-reduce
/// coordination.
///
/// One tracker runs per node. Jobs are submitted through any node; from
/// there every node drives its own slice of the job off the replicated
/// metadata record. See the crate docs for the overall model.
#[derive(Clone)]
pub struct JobTracker {
    core: Arc<TrackerCore>,
}

impl JobTracker {
    pub fn new(
        ctx: Arc<dyn RuntimeContext>,
        store: Arc<dyn MetadataStore>,
        planner: Arc<dyn Planner>,
        executor: Arc<dyn TaskExecutor>,
        shuffle: Arc<dyn Shuffle>,
        discovery: Arc<dyn Discovery>,
    ) -> Self {
        let (events, event_rx) = mpsc::unbounded_channel();

        JobTracker {
            core: Arc::new(TrackerCore {
                ctx,
                store,
                planner,
                executor,
                shuffle,
                discovery,
                registry: JobRegistry::new(),
                active_jobs: Mutex::new(HashMap::new()),
                finish_futs: Mutex::new(HashMap::new()),
                gate: RwLock::new(()),
                stopped: AtomicBool::new(false),
                events,
                event_rx: Mutex::new(Some(event_rx)),
                loop_handle: Mutex::new(None),
            }),
        }
    }

    /// Spawn the event loop and subscribe to record updates and topology
    /// changes. Must be called once before any job is submitted.
    pub fn start(&self) {
        let core = &self.core;

        let rx = core
            .event_rx
            .lock()
            .unwrap()
            .take()
            .expect("Tracker already started");
        let handle = tokio::spawn(event::run(Arc::clone(core), rx));
        *core.loop_handle.lock().unwrap() = Some(handle);

        // Subscription callbacks run on the collaborators' threads and must
        // not block them; they only enqueue onto the event loop.
        let weak = Arc::downgrade(core);
        core.store.subscribe(Box::new(move |updates| {
            if let Some(core) = weak.upgrade() {
                if !core.stopped.load(Ordering::SeqCst) {
                    let _ = core.events.send(TrackerEvent::MetadataUpdated(updates));
                }
            }
        }));

        let weak = Arc::downgrade(core);
        core.discovery.subscribe(Box::new(move |departed| {
            if let Some(core) = weak.upgrade() {
                if !core.stopped.load(Ordering::SeqCst) {
                    let _ = core.events.send(TrackerEvent::NodeLeft(departed));
                }
            }
        }));

        info!("Job tracker started on node {}", core.ctx.local_node());
    }

    /// Submit a job for execution across the cluster.
    ///
    /// Plans the job against the live topology, persists the initial
    /// metadata record (phase SETUP, everything pending) and returns the
    /// finish future for it. The record insert is what actually starts the
    /// job: every participating node, this one included, reacts to the
    /// update notification.
    pub async fn submit(&self, job_id: JobId, info: JobInfo) -> Result<FinishFuture, TrackerError> {
        let core = &self.core;
        let _gate = core.enter()?;

        if core.registry.contains(job_id) || core.store.get(job_id).is_some() {
            return Err(TrackerError::DuplicateJob(job_id));
        }

        let job = match core.job(job_id, Some(info.clone())).await {
            Ok(job) => job,
            Err(e) => {
                error!("Failed to materialize job {}: {:#}", job_id, e);
                return Err(TrackerError::Planning {
                    message: format!("{e:#}"),
                });
            }
        };

        let plan = match core.planner.plan(&job, &core.discovery.live_nodes()) {
            Ok(plan) => plan,
            Err(e) => {
                error!("Failed to plan job {}: {:#}", job_id, e);
                if core.registry.remove(job_id).is_some() {
                    job.dispose(false);
                }
                return Err(TrackerError::Planning {
                    message: format!("{e:#}"),
                });
            }
        };

        let meta = JobMetadata::new(job_id, core.ctx.local_node(), info, plan);

        let fut = {
            let mut futs = core.finish_futs.lock().unwrap();
            let (tx, _) = watch::channel(None);
            let fut = FinishFuture::subscribe(&tx);
            let old = futs.insert(job_id, tx);
            debug_assert!(old.is_none(), "Duplicate finish future for job {job_id}");
            fut
        };

        debug!("Submitting job metadata for job {}", job_id);

        if core.store.put_if_absent(meta).is_some() {
            core.finish_futs.lock().unwrap().remove(&job_id);
            if core.registry.remove(job_id).is_some() {
                job.dispose(false);
            }
            return Err(TrackerError::DuplicateJob(job_id));
        }

        Ok(fut)
    }

    /// Current status of a job, or `None` if unknown (or stopping).
    pub fn status(&self, job_id: JobId) -> Option<JobStatus> {
        let _gate = self.core.enter().ok()?;
        self.core.store.get(job_id).map(|meta| meta.status())
    }

    /// The plan of a job, or `None` if unknown (or stopping).
    pub fn plan(&self, job_id: JobId) -> Option<Plan> {
        let _gate = self.core.enter().ok()?;
        self.core.store.get(job_id).map(|meta| meta.plan().clone())
    }

    /// Accumulated counters of a job, or `None` if unknown (or stopping).
    pub fn counters(&self, job_id: JobId) -> Option<Counters> {
        let _gate = self.core.enter().ok()?;
        self.core
            .store
            .get(job_id)
            .map(|meta| meta.counters().clone())
    }

    /// A future resolving when the job reaches its terminal phase, or
    /// `None` if the job is unknown (or the tracker is stopping).
    ///
    /// Idempotent: a completed job yields a pre-resolved future, and the
    /// window between the metadata read and the future installation is
    /// closed by re-reading the record.
    pub fn finish_future(&self, job_id: JobId) -> Option<FinishFuture> {
        let core = &self.core;
        let _gate = core.enter().ok()?;

        let meta = core.store.get(job_id)?;

        if meta.phase() == JobPhase::Complete {
            debug!("Job {} already complete, returning finished future", job_id);
            return Some(FinishFuture::ready(Ok(JobOutcome {
                job_id,
                fail_cause: meta.fail_cause().cloned(),
            })));
        }

        let fut = {
            let mut futs = core.finish_futs.lock().unwrap();
            let tx = futs
                .entry(job_id)
                .or_insert_with(|| watch::channel(None).0);
            FinishFuture::subscribe(tx)
        };

        // Read once more: a COMPLETE snapshot (or eviction) may have slipped
        // past between the first read and the future installation.
        match core.store.get(job_id) {
            None => core.resolve_finish(job_id, None),
            Some(meta) if meta.phase() == JobPhase::Complete => {
                core.resolve_finish(job_id, meta.fail_cause().cloned());
            }
            _ => {}
        }

        Some(fut)
    }

    /// Cancel a job and wait for it to drain.
    ///
    /// Returns true iff the job ended with a cancellation cause; false when
    /// it was unknown, already finished otherwise, or the tracker stopped.
    pub async fn kill(&self, job_id: JobId) -> bool {
        {
            let Ok(_gate) = self.core.enter() else {
                return false;
            };

            if let Some(meta) = self.core.store.get(job_id) {
                if meta.phase() != JobPhase::Complete && meta.phase() != JobPhase::Cancelling {
                    self.core.transform(
                        job_id,
                        TransformStack::cancel_job(
                            None,
                            Some(TrackerError::Cancelled),
                            Vec::new(),
                            Vec::new(),
                        ),
                    );
                }
            }
        }

        if let Some(fut) = self.finish_future(job_id) {
            return matches!(
                fut.wait().await,
                Ok(JobOutcome {
                    fail_cause: Some(TrackerError::Cancelled),
                    ..
                })
            );
        }

        false
    }

    /// Callback from the task executor when a task reaches a terminal state.
    /// May be invoked from any thread.
    pub fn on_task_finished(&self, info: TaskInfo, status: TaskStatus) {
        let core = &self.core;
        let Ok(_gate) = core.enter() else {
            return;
        };

        debug_assert!(status.state != TaskState::Running);
        debug_assert!(
            status.state != TaskState::Failed || status.fail_cause.is_some(),
            "Failed task without a cause: {info:?}"
        );

        debug!(
            "Received task finished callback: job {} {:?} -> {:?}",
            info.job_id, info.task_type, status.state
        );

        let incr_cntrs = (status.state == TaskState::Completed)
            .then(|| TransformStack::increment_counters(None, status.counters.clone()));

        match info.task_type {
            TaskType::Commit | TaskType::Abort => {
                let ttl = core.ctx.config().finished_job_info_ttl;
                core.transform(info.job_id, TransformStack::complete_job(incr_cntrs, ttl));
            }
            _ => {
                let Some(state) = core.local_state(info.job_id) else {
                    warn!("Missing local state for finished task: {:?}", info);
                    return;
                };

                match info.task_type {
                    TaskType::Setup => core.on_setup_finished(&info, &status, incr_cntrs),
                    TaskType::Map => {
                        Arc::clone(core).on_map_finished(&state, &info, &status, incr_cntrs)
                    }
                    TaskType::Reduce => core.on_reduce_finished(&info, &status, incr_cntrs),
                    TaskType::Combine => {
                        Arc::clone(core).on_combine_finished(&state, &info, &status, incr_cntrs)
                    }
                    TaskType::Commit | TaskType::Abort => unreachable!(),
                }
            }
        }
    }

    /// Callback from the task executor once an external process is ready to
    /// receive shuffle messages for the given reducers.
    pub fn on_external_mappers_initialized(
        &self,
        job_id: JobId,
        reducers: Vec<usize>,
        desc: ProcessDescriptor,
    ) {
        let Ok(_gate) = self.core.enter() else {
            return;
        };

        self.core.transform(
            job_id,
            TransformStack::initialize_reducers(None, reducers, desc),
        );
    }

    /// Shut the tracker down: refuse new work, drain in-flight calls, stop
    /// the event loop and fail every active finish future.
    pub async fn stop(&self) {
        let core = &self.core;

        if core.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        // Waits out every in-flight public call and event body.
        drop(core.gate.write().await);

        let _ = core.events.send(TrackerEvent::Shutdown);
        let handle = core.loop_handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        let senders: Vec<FinishSender> = core
            .finish_futs
            .lock()
            .unwrap()
            .drain()
            .map(|(_, tx)| tx)
            .collect();
        for tx in senders {
            tx.send_replace(Some(Err(TrackerError::Stopping)));
        }

        for job in core.registry.drain() {
            job.dispose(true);
        }

        info!("Job tracker stopped on node {}", core.ctx.local_node());
    }
}

/// Shared tracker internals; everything the event loop and the spawned
/// continuation tasks need.
pub(crate) struct TrackerCore {
    ctx: Arc<dyn RuntimeContext>,
    store: Arc<dyn MetadataStore>,
    planner: Arc<dyn Planner>,
    executor: Arc<dyn TaskExecutor>,
    shuffle: Arc<dyn Shuffle>,
    discovery: Arc<dyn Discovery>,
    registry: JobRegistry,
    active_jobs: Mutex<HashMap<JobId, Arc<JobLocalState>>>,
    finish_futs: Mutex<HashMap<JobId, FinishSender>>,
    pub(crate) gate: RwLock<()>,
    pub(crate) stopped: AtomicBool,
    events: UnboundedSender<TrackerEvent>,
    event_rx: Mutex<Option<UnboundedReceiver<TrackerEvent>>>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl TrackerCore {
    /// Acquire the lifecycle gate for a public entry point.
    fn enter(&self) -> Result<RwLockReadGuard<'_, ()>, TrackerError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(TrackerError::Stopping);
        }
        self.gate.try_read().map_err(|_| TrackerError::Stopping)
    }

    /// Issue a metadata transform; failures are logged by a detached
    /// observer, never awaited inline. The replicated record is the source
    /// of truth: a lost transform shows up as a job that stops progressing
    /// and is corrected by later transforms or node-left recovery.
    fn transform(&self, job_id: JobId, stack: TransformStack) {
        let fut = self.store.transform(job_id, stack);
        tokio::spawn(async move {
            if let Err(e) = fut.await {
                error!("Failed to transform job metadata for {}: {:#}", job_id, e);
            }
        });
    }

    fn local_state(&self, job_id: JobId) -> Option<Arc<JobLocalState>> {
        self.active_jobs.lock().unwrap().get(&job_id).cloned()
    }

    fn init_state(&self, job_id: JobId) -> Arc<JobLocalState> {
        Arc::clone(self.active_jobs.lock().unwrap().entry(job_id).or_default())
    }

    fn resolve_finish(&self, job_id: JobId, fail_cause: Option<TrackerError>) {
        if let Some(tx) = self.finish_futs.lock().unwrap().remove(&job_id) {
            tx.send_replace(Some(Ok(JobOutcome { job_id, fail_cause })));
        }
    }

    /// Get or create the runtime job handle, constructing it at most once.
    /// With no `job_info` at hand the record in the store supplies it.
    async fn job(&self, job_id: JobId, job_info: Option<JobInfo>) -> anyhow::Result<Arc<Job>> {
        let cell = self.registry.entry(job_id);

        let result = cell
            .get_or_try_init(|| async {
                let info = match job_info {
                    Some(info) => info,
                    None => self
                        .store
                        .get(job_id)
                        .map(|meta| meta.job_info().clone())
                        .ok_or(TrackerError::UnknownJob(job_id))?,
                };

                let job = Job::new(job_id, info, &self.ctx.config().staging_root);
                job.initialize(self.ctx.local_node())?;
                Ok::<_, anyhow::Error>(Arc::new(job))
            })
            .await;

        match result {
            Ok(job) => Ok(Arc::clone(job)),
            Err(e) => {
                // A failed construction must not poison the slot; a retry
                // starts from a fresh entry.
                self.registry.remove(job_id);
                Err(e)
            }
        }
    }

    /// Apply a batch of record updates to this node.
    pub(crate) async fn process_job_metadata(&self, updates: Vec<(JobId, Option<JobMetadata>)>) {
        for (job_id, meta) in updates {
            // Evicted records carry no work.
            let Some(meta) = meta else { continue };

            if !self.ctx.is_participating(&meta) {
                continue;
            }

            debug!(
                "Processing job metadata update for {}: phase {}",
                job_id,
                meta.phase()
            );

            if let Err(e) = self.process_entry(job_id, meta).await {
                error!("Failed to process job metadata update for {}: {:#}", job_id, e);
            }
        }
    }

    async fn process_entry(&self, job_id: JobId, meta: JobMetadata) -> anyhow::Result<()> {
        let loc = self.ctx.local_node();

        if let Err(e) = self.executor.on_job_state_changed(&meta) {
            error!(
                "Failed to process job state change callback (will fail the job) for {}: {:#}",
                job_id, e
            );
            self.transform(
                job_id,
                TransformStack::cancel_job(
                    None,
                    Some(TrackerError::task_failed(&e)),
                    Vec::new(),
                    Vec::new(),
                ),
            );
            return Ok(());
        }

        let job = self.job(job_id, Some(meta.job_info().clone())).await?;

        match meta.phase() {
            JobPhase::Setup => {
                if self.ctx.is_update_leader() {
                    if let Some(tasks) = self.setup_task(job_id) {
                        self.executor.run(job, tasks);
                    }
                }
            }

            JobPhase::Map => {
                if let Some(tasks) = self.mapper_tasks(meta.plan().mappers(loc), &meta) {
                    self.executor.run(job, tasks);
                }
            }

            JobPhase::Reduce => {
                if meta.pending_reducers().is_empty() && self.ctx.is_update_leader() {
                    debug!("Submitting COMMIT task for execution for job {}", job_id);
                    let info = TaskInfo::new(loc, TaskType::Commit, job_id, 0, None);
                    self.executor.run(job, vec![info]);
                    return Ok(());
                }

                if let Some(tasks) = self.reducer_tasks(meta.plan().reducers(loc), job_id) {
                    self.executor.run(job, tasks);
                }
            }

            JobPhase::Cancelling => self.process_cancelling(&meta, job),

            JobPhase::Complete => self.process_complete(&meta, job),
        }

        Ok(())
    }

    fn process_cancelling(&self, meta: &JobMetadata, job: Arc<Job>) {
        let job_id = meta.job_id();
        let loc = self.ctx.local_node();
        let state = self.local_state(job_id);

        if let Some(state) = &state {
            if state.on_cancel() {
                debug!("Cancelling local task execution for job {}", job_id);
                self.executor.cancel_tasks(job_id);
            }
        }

        if meta.pending_splits().is_empty() && meta.pending_reducers().is_empty() {
            if self.ctx.is_update_leader() {
                let state = state.unwrap_or_else(|| self.init_state(job_id));

                if state.on_aborted() {
                    debug!("Submitting ABORT task for execution for job {}", job_id);
                    let info = TaskInfo::new(loc, TaskType::Abort, job_id, 0, None);
                    self.executor.run(job, vec![info]);
                }
            }
            return;
        }

        // Locally assigned work that was never handed to the executor will
        // never report completion; prune it so the pending sets converge.
        let mut cancel_splits = Vec::new();
        if let Some(mappers) = meta.plan().mappers(loc) {
            for split in mappers {
                let scheduled = state.as_ref().is_some_and(|s| s.mapper_scheduled(split));
                if !scheduled {
                    cancel_splits.push(split.clone());
                }
            }
        }

        let mut cancel_reducers = Vec::new();
        if let Some(rdcs) = meta.plan().reducers(loc) {
            for &rdc in rdcs {
                let scheduled = state.as_ref().is_some_and(|s| s.reducer_scheduled(rdc));
                if !scheduled {
                    cancel_reducers.push(rdc);
                }
            }
        }

        if !cancel_splits.is_empty() || !cancel_reducers.is_empty() {
            self.transform(
                job_id,
                TransformStack::cancel_job(None, None, cancel_splits, cancel_reducers),
            );
        }
    }

    fn process_complete(&self, meta: &JobMetadata, job: Arc<Job>) {
        let job_id = meta.job_id();

        debug!(
            "Job {} complete: setup {:?}, map {:?}, reduce {:?}, total {:?}",
            job_id,
            meta.setup_time(),
            meta.map_time(),
            meta.reduce_time(),
            meta.total_time()
        );

        if self.active_jobs.lock().unwrap().remove(&job_id).is_some() {
            self.shuffle.job_finished(job_id);
        }

        self.resolve_finish(job_id, meta.fail_cause().cloned());

        if self.ctx.is_update_leader() {
            if let Err(e) = job.cleanup_staging_directory() {
                warn!(
                    "Failed to clean up staging directory for job {}: {:#}",
                    job_id, e
                );
            }
        }

        if self.registry.remove(job_id).is_some() {
            job.dispose(false);
        }
    }

    /// React to a node leaving the cluster. Only the update leader acts.
    pub(crate) async fn process_node_left(&self, departed: NodeDescriptor) {
        debug!("Processing topology change: node {} left", departed.id);

        if !self.ctx.is_update_leader() {
            return;
        }

        // SETUP runs on the oldest participating node, so only the loss of
        // an older node can have orphaned it.
        let check_setup = departed.order < self.ctx.local_node_order();
        let live = self.discovery.live_nodes();

        for meta in self.store.snapshot() {
            let job_id = meta.job_id();

            match meta.phase() {
                JobPhase::Setup if check_setup && self.local_state(job_id).is_none() => {
                    match self.job(job_id, Some(meta.job_info().clone())).await {
                        Ok(job) => {
                            if let Some(tasks) = self.setup_task(job_id) {
                                self.executor.run(job, tasks);
                            }
                        }
                        Err(e) => {
                            error!("Failed to fail over setup task for job {}: {:#}", job_id, e)
                        }
                    }
                }

                JobPhase::Map | JobPhase::Reduce => {
                    // Several nodes may be gone at once; sweep the whole
                    // plan, not just the departed node.
                    let mut cancel_splits = Vec::new();
                    for node in meta.plan().mapper_node_ids() {
                        if !live.contains(&node) {
                            if let Some(splits) = meta.plan().mappers(node) {
                                cancel_splits.extend(splits.iter().cloned());
                            }
                        }
                    }

                    let mut cancel_reducers = Vec::new();
                    for node in meta.plan().reducer_node_ids() {
                        if !live.contains(&node) {
                            if let Some(rdcs) = meta.plan().reducers(node) {
                                cancel_reducers.extend_from_slice(rdcs);
                            }
                        }
                    }

                    if !cancel_splits.is_empty() || !cancel_reducers.is_empty() {
                        warn!(
                            "Pruning work hosted on departed nodes for job {}: {} splits, {} reducers",
                            job_id,
                            cancel_splits.len(),
                            cancel_reducers.len()
                        );
                        self.transform(
                            job_id,
                            TransformStack::cancel_job(
                                None,
                                Some(TrackerError::ParticipantLost),
                                cancel_splits,
                                cancel_reducers,
                            ),
                        );
                    }
                }

                _ => {}
            }
        }
    }

    /// The singleton SETUP task, unless local state says it already ran.
    fn setup_task(&self, job_id: JobId) -> Option<Vec<TaskInfo>> {
        if self.active_jobs.lock().unwrap().contains_key(&job_id) {
            return None;
        }

        self.init_state(job_id);

        Some(vec![TaskInfo::new(
            self.ctx.local_node(),
            TaskType::Setup,
            job_id,
            0,
            None,
        )])
    }

    /// MAP tasks for every locally assigned split not yet dispatched.
    fn mapper_tasks(
        &self,
        mappers: Option<&HashSet<InputSplit>>,
        meta: &JobMetadata,
    ) -> Option<Vec<TaskInfo>> {
        let mappers = mappers?;
        let loc = self.ctx.local_node();
        let job_id = meta.job_id();
        let state = self.init_state(job_id);

        let mut tasks = Vec::new();

        for split in mappers {
            if state.add_mapper(split.clone()) {
                debug!(
                    "Submitting MAP task for execution: job {}, split {:?}",
                    job_id, split
                );

                let task_number = meta
                    .plan()
                    .task_number(split)
                    .expect("Planned split must have a task number");

                tasks.push(TaskInfo::new(
                    loc,
                    TaskType::Map,
                    job_id,
                    task_number,
                    Some(split.clone()),
                ));
            }
        }

        (!tasks.is_empty()).then_some(tasks)
    }

    /// REDUCE tasks for every locally assigned reducer not yet dispatched.
    fn reducer_tasks(&self, reducers: Option<&[usize]>, job_id: JobId) -> Option<Vec<TaskInfo>> {
        let reducers = reducers?;
        let loc = self.ctx.local_node();
        let state = self.init_state(job_id);

        let mut tasks = Vec::new();

        for &rdc in reducers {
            if state.add_reducer(rdc) {
                debug!(
                    "Submitting REDUCE task for execution: job {}, reducer {}",
                    job_id, rdc
                );
                tasks.push(TaskInfo::new(loc, TaskType::Reduce, job_id, rdc, None));
            }
        }

        (!tasks.is_empty()).then_some(tasks)
    }

    fn on_setup_finished(
        &self,
        info: &TaskInfo,
        status: &TaskStatus,
        prev: Option<TransformStack>,
    ) {
        let job_id = info.job_id;

        if status.is_failure() {
            self.transform(
                job_id,
                TransformStack::cancel_job(prev, Some(fail_cause_of(status)), Vec::new(), Vec::new()),
            );
        } else {
            self.transform(job_id, TransformStack::update_phase(prev, JobPhase::Map));
        }
    }

    fn on_map_finished(
        self: Arc<Self>,
        state: &JobLocalState,
        info: &TaskInfo,
        status: &TaskStatus,
        prev: Option<TransformStack>,
    ) {
        let job_id = info.job_id;
        let Some(split) = info.split.clone() else {
            warn!("MAP task finished without a split: {:?}", info);
            return;
        };

        let last_mapper_finished = state.on_mapper_completed();

        if status.is_failure() {
            self.transform(
                job_id,
                TransformStack::remove_mappers(prev, vec![split], Some(fail_cause_of(status))),
            );
            return;
        }

        if last_mapper_finished {
            // All local mappers are done: flush intermediate output before
            // updating the pending set, so reducers never start against a
            // partial shuffle.
            let flush = self.shuffle.flush(job_id);
            tokio::spawn(async move {
                let err = flush.await.err().map(|e| TrackerError::task_failed(&e));
                self.transform(
                    job_id,
                    TransformStack::remove_mappers(prev, vec![split], err),
                );
            });
        } else {
            self.transform(
                job_id,
                TransformStack::remove_mappers(prev, vec![split], None),
            );
        }
    }

    fn on_reduce_finished(
        &self,
        info: &TaskInfo,
        status: &TaskStatus,
        prev: Option<TransformStack>,
    ) {
        let err = status.is_failure().then(|| fail_cause_of(status));
        self.transform(
            info.job_id,
            TransformStack::remove_reducer(prev, info.task_number, err),
        );
    }

    fn on_combine_finished(
        self: Arc<Self>,
        state: &JobLocalState,
        info: &TaskInfo,
        status: &TaskStatus,
        prev: Option<TransformStack>,
    ) {
        let job_id = info.job_id;
        let scheduled = state.scheduled_mappers();

        if status.is_failure() {
            self.transform(
                job_id,
                TransformStack::remove_mappers(prev, scheduled, Some(fail_cause_of(status))),
            );
        } else {
            let flush = self.shuffle.flush(job_id);
            tokio::spawn(async move {
                let err = flush.await.err().map(|e| TrackerError::task_failed(&e));
                self.transform(
                    job_id,
                    TransformStack::remove_mappers(prev, scheduled, err),
                );
            });
        }
    }
}

fn fail_cause_of(status: &TaskStatus) -> TrackerError {
    status.fail_cause.clone().unwrap_or(TrackerError::TaskFailed {
        message: "Task failed without reporting a cause".into(),
    })
}
