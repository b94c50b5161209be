//! In-process cluster harness: several trackers sharing one metadata store
//! and one discovery view, with recording stand-ins for the executor and
//! shuffle collaborators. Tests drive task completions by hand, playing the
//! role of the task executor.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{self, BoxFuture, FutureExt};
use tokio::sync::mpsc;
use tokio::time::timeout;

use common::{
    JobId, JobMetadata, JobPhase, NodeDescriptor, NodeId, Plan, TaskInfo, TaskType,
};
use mrg_tracker::{
    Discovery, Job, JobTracker, MemoryMetadataStore, MetadataStore, Planner, RuntimeContext,
    Shuffle, TaskExecutor, TopologySubscriber, TrackerConfig,
};

const WAIT: Duration = Duration::from_secs(5);

pub struct TestContext {
    local: NodeId,
    order: u64,
    leader: Arc<AtomicBool>,
    config: TrackerConfig,
}

impl RuntimeContext for TestContext {
    fn local_node(&self) -> NodeId {
        self.local
    }

    fn local_node_order(&self) -> u64 {
        self.order
    }

    fn is_update_leader(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }

    fn config(&self) -> &TrackerConfig {
        &self.config
    }
}

#[derive(Default)]
pub struct StaticDiscovery {
    nodes: Mutex<HashMap<NodeId, u64>>,
    subscribers: Mutex<Vec<TopologySubscriber>>,
}

impl StaticDiscovery {
    pub fn new() -> Self {
        StaticDiscovery::default()
    }

    pub fn add_node(&self, id: NodeId, order: u64) {
        self.nodes.lock().unwrap().insert(id, order);
    }

    /// Drop a node from the topology and notify every subscriber.
    pub fn remove_node(&self, id: NodeId) {
        let order = self.nodes.lock().unwrap().remove(&id);
        if let Some(order) = order {
            let subscribers = self.subscribers.lock().unwrap();
            for subscriber in subscribers.iter() {
                subscriber(NodeDescriptor { id, order });
            }
        }
    }
}

impl Discovery for StaticDiscovery {
    fn live_nodes(&self) -> HashSet<NodeId> {
        self.nodes.lock().unwrap().keys().copied().collect()
    }

    fn subscribe(&self, subscriber: TopologySubscriber) {
        self.subscribers.lock().unwrap().push(subscriber);
    }
}

/// Planner returning a pre-built plan; tests construct the assignment they
/// want to exercise.
pub struct FixedPlanner {
    plan: Plan,
}

impl FixedPlanner {
    pub fn new(plan: Plan) -> Self {
        FixedPlanner { plan }
    }
}

impl Planner for FixedPlanner {
    fn plan(&self, _job: &Job, _live_nodes: &HashSet<NodeId>) -> anyhow::Result<Plan> {
        Ok(self.plan.clone())
    }
}

/// Task executor stand-in: records every dispatch and forwards tasks to the
/// test over a channel instead of running them.
pub struct RecordingExecutor {
    tasks: mpsc::UnboundedSender<TaskInfo>,
    pub dispatched: Mutex<Vec<TaskInfo>>,
    pub cancelled: Mutex<Vec<JobId>>,
}

impl RecordingExecutor {
    fn new(tasks: mpsc::UnboundedSender<TaskInfo>) -> Self {
        RecordingExecutor {
            tasks,
            dispatched: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
        }
    }
}

impl TaskExecutor for RecordingExecutor {
    fn run(&self, _job: Arc<Job>, tasks: Vec<TaskInfo>) {
        for task in tasks {
            self.dispatched.lock().unwrap().push(task.clone());
            let _ = self.tasks.send(task);
        }
    }

    fn cancel_tasks(&self, job_id: JobId) {
        self.cancelled.lock().unwrap().push(job_id);
    }

    fn on_job_state_changed(&self, _meta: &JobMetadata) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct TestShuffle {
    pub flushed: Mutex<Vec<JobId>>,
    pub finished: Mutex<Vec<JobId>>,
}

impl Shuffle for TestShuffle {
    fn flush(&self, job_id: JobId) -> BoxFuture<'static, anyhow::Result<()>> {
        self.flushed.lock().unwrap().push(job_id);
        future::ready(Ok(())).boxed()
    }

    fn job_finished(&self, job_id: JobId) {
        self.finished.lock().unwrap().push(job_id);
    }
}

pub struct TestNode {
    pub id: NodeId,
    pub tracker: JobTracker,
    pub executor: Arc<RecordingExecutor>,
    pub shuffle: Arc<TestShuffle>,
    pub leader: Arc<AtomicBool>,
    tasks: tokio::sync::Mutex<mpsc::UnboundedReceiver<TaskInfo>>,
}

impl TestNode {
    /// Next task dispatched to this node's executor.
    pub async fn next_task(&self) -> TaskInfo {
        let mut tasks = self.tasks.lock().await;
        timeout(WAIT, tasks.recv())
            .await
            .expect("timed out waiting for a task")
            .expect("task channel closed")
    }

    /// Next task, asserting its type.
    pub async fn expect_task(&self, task_type: TaskType) -> TaskInfo {
        let task = self.next_task().await;
        assert_eq!(task.task_type, task_type, "unexpected task: {task:?}");
        task
    }

    /// The next `n` tasks, in dispatch order.
    pub async fn expect_tasks(&self, n: usize) -> Vec<TaskInfo> {
        let mut tasks = Vec::with_capacity(n);
        for _ in 0..n {
            tasks.push(self.next_task().await);
        }
        tasks
    }
}

pub struct TestCluster {
    pub store: Arc<MemoryMetadataStore>,
    pub discovery: Arc<StaticDiscovery>,
    pub nodes: Vec<TestNode>,
}

impl TestCluster {
    /// Spin up `n` trackers against one shared store and topology. Node 0
    /// is the oldest node and the update leader.
    pub fn start(n: usize, make_plan: impl FnOnce(&[NodeId]) -> Plan) -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let mut ids: Vec<NodeId> = (0..n).map(|_| NodeId::random()).collect();
        ids.sort();

        let store = Arc::new(MemoryMetadataStore::new());
        let discovery = Arc::new(StaticDiscovery::new());
        for (order, id) in ids.iter().enumerate() {
            discovery.add_node(*id, order as u64);
        }

        let plan = make_plan(&ids);
        let planner = Arc::new(FixedPlanner::new(plan));

        let nodes = ids
            .iter()
            .enumerate()
            .map(|(order, &id)| {
                let (tasks_tx, tasks_rx) = mpsc::unbounded_channel();
                let executor = Arc::new(RecordingExecutor::new(tasks_tx));
                let shuffle = Arc::new(TestShuffle::default());
                let leader = Arc::new(AtomicBool::new(order == 0));

                let ctx = Arc::new(TestContext {
                    local: id,
                    order: order as u64,
                    leader: Arc::clone(&leader),
                    config: TrackerConfig {
                        finished_job_info_ttl: Duration::from_secs(60),
                        staging_root: std::env::temp_dir().join(format!("mrg-test-{id}")),
                    },
                });

                let tracker = JobTracker::new(
                    ctx,
                    Arc::clone(&store) as Arc<dyn MetadataStore>,
                    Arc::clone(&planner) as Arc<dyn Planner>,
                    Arc::clone(&executor) as Arc<dyn TaskExecutor>,
                    Arc::clone(&shuffle) as Arc<dyn Shuffle>,
                    Arc::clone(&discovery) as Arc<dyn Discovery>,
                );
                tracker.start();

                TestNode {
                    id,
                    tracker,
                    executor,
                    shuffle,
                    leader,
                    tasks: tokio::sync::Mutex::new(tasks_rx),
                }
            })
            .collect();

        TestCluster {
            store,
            discovery,
            nodes,
        }
    }

    /// Every task dispatched anywhere in the cluster so far.
    pub fn all_dispatched(&self) -> Vec<TaskInfo> {
        self.nodes
            .iter()
            .flat_map(|node| node.executor.dispatched.lock().unwrap().clone())
            .collect()
    }

    /// Assert that no (job, task) was ever dispatched twice cluster-wide.
    pub fn assert_tasks_unique(&self) {
        let dispatched = self.all_dispatched();
        for (i, a) in dispatched.iter().enumerate() {
            for b in &dispatched[i + 1..] {
                assert!(
                    !(a.job_id == b.job_id
                        && a.task_type == b.task_type
                        && a.task_number == b.task_number
                        && a.split == b.split),
                    "task dispatched twice: {a:?}"
                );
            }
        }
    }
}

/// Poll until a condition holds, failing the test after the shared timeout.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    timeout(WAIT, async {
        loop {
            if cond() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("timed out waiting for condition");
}

/// Record the phase sequence (consecutive duplicates collapsed) and the
/// pending-set sizes of every record update, for lifecycle assertions.
pub fn record_history(
    store: &MemoryMetadataStore,
) -> Arc<Mutex<HashMap<JobId, Vec<(JobPhase, usize, usize)>>>> {
    let history: Arc<Mutex<HashMap<JobId, Vec<(JobPhase, usize, usize)>>>> =
        Arc::new(Mutex::new(HashMap::new()));

    let sink = Arc::clone(&history);
    store.subscribe(Box::new(move |updates| {
        let mut history = sink.lock().unwrap();
        for (job_id, meta) in updates {
            if let Some(meta) = meta {
                let entry = history.entry(job_id).or_default();
                let point = (
                    meta.phase(),
                    meta.pending_splits().len(),
                    meta.pending_reducers().len(),
                );
                if entry.last() != Some(&point) {
                    entry.push(point);
                }
            }
        }
    }));

    history
}

/// Collapse a history into its phase sequence.
pub fn phases(history: &[(JobPhase, usize, usize)]) -> Vec<JobPhase> {
    let mut out: Vec<JobPhase> = Vec::new();
    for (phase, _, _) in history {
        if out.last() != Some(phase) {
            out.push(*phase);
        }
    }
    out
}
