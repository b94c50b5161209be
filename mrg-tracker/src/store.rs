//! Replicated job-metadata store contract and an in-process implementation.
//!
//! The real cluster backs this with a strongly-consistent replicated cache;
//! the tracker only relies on the operations below. [`MemoryMetadataStore`]
//! implements the same contract over a mutexed map: sharing one instance
//! between several trackers gives every one of them the same totally-ordered
//! view of record updates, which is exactly what the replicated cache
//! guarantees per key.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::future::{self, BoxFuture, FutureExt};
use tracing::debug;

use common::{JobId, JobMetadata, JobPhase};

use crate::transform::TransformStack;

/// Callback invoked with every batch of record updates. An entry of
/// `(job_id, None)` signals that the record was evicted.
pub type MetadataSubscriber = Box<dyn Fn(Vec<(JobId, Option<JobMetadata>)>) + Send + Sync>;

/// The replicated metadata cache, keyed by [`JobId`].
pub trait MetadataStore: Send + Sync {
    /// Current record for the job, if any.
    fn get(&self, job_id: JobId) -> Option<JobMetadata>;

    /// Insert the record unless one exists; returns the existing record on
    /// conflict.
    fn put_if_absent(&self, meta: JobMetadata) -> Option<JobMetadata>;

    /// Atomically replace the record with `stack.apply(current)`. Applied
    /// with replicated visibility: every subscriber on every node observes
    /// the resulting record.
    fn transform(&self, job_id: JobId, stack: TransformStack)
        -> BoxFuture<'static, anyhow::Result<()>>;

    /// Register for record updates. Callbacks must not block the store's
    /// internal threads; subscribers are expected to enqueue and return.
    fn subscribe(&self, subscriber: MetadataSubscriber);

    /// Snapshot of every record currently in the store.
    fn snapshot(&self) -> Vec<JobMetadata>;
}

struct StoreInner {
    entries: Mutex<HashMap<JobId, JobMetadata>>,
    subscribers: Mutex<Vec<MetadataSubscriber>>,
}

impl StoreInner {
    fn notify(&self, updates: Vec<(JobId, Option<JobMetadata>)>) {
        let subscribers = self.subscribers.lock().unwrap();
        for subscriber in subscribers.iter() {
            subscriber(updates.clone());
        }
    }

    fn evict(self: &Arc<Self>, job_id: JobId) {
        let removed = self.entries.lock().unwrap().remove(&job_id);
        if removed.is_some() {
            debug!("Evicted finished job metadata: {}", job_id);
            self.notify(vec![(job_id, None)]);
        }
    }
}

/// In-process [`MetadataStore`] used by tests and single-process embedders.
#[derive(Clone)]
pub struct MemoryMetadataStore {
    inner: Arc<StoreInner>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        MemoryMetadataStore {
            inner: Arc::new(StoreInner {
                entries: Mutex::new(HashMap::new()),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }
}

impl Default for MemoryMetadataStore {
    fn default() -> Self {
        MemoryMetadataStore::new()
    }
}

impl MetadataStore for MemoryMetadataStore {
    fn get(&self, job_id: JobId) -> Option<JobMetadata> {
        self.inner.entries.lock().unwrap().get(&job_id).cloned()
    }

    fn put_if_absent(&self, meta: JobMetadata) -> Option<JobMetadata> {
        let job_id = meta.job_id();

        {
            let mut entries = self.inner.entries.lock().unwrap();
            if let Some(existing) = entries.get(&job_id) {
                return Some(existing.clone());
            }
            entries.insert(job_id, meta.clone());
        }

        self.inner.notify(vec![(job_id, Some(meta))]);
        None
    }

    fn transform(
        &self,
        job_id: JobId,
        stack: TransformStack,
    ) -> BoxFuture<'static, anyhow::Result<()>> {
        let updated = {
            let mut entries = self.inner.entries.lock().unwrap();
            let current = entries.get(&job_id);

            match stack.apply(current) {
                Some(next) => {
                    let arm_eviction = next.ttl().is_some()
                        && entries.get(&job_id).and_then(|m| m.ttl()).is_none();

                    entries.insert(job_id, next.clone());
                    Some((next, arm_eviction))
                }
                // Record already evicted; nothing to write.
                None => None,
            }
        };

        if let Some((next, arm_eviction)) = updated {
            if arm_eviction {
                debug_assert_eq!(next.phase(), JobPhase::Complete);

                let ttl = next.ttl().unwrap();
                let inner = Arc::clone(&self.inner);
                tokio::spawn(async move {
                    tokio::time::sleep(ttl).await;
                    inner.evict(job_id);
                });
            }

            self.inner.notify(vec![(job_id, Some(next))]);
        }

        future::ready(Ok(())).boxed()
    }

    fn subscribe(&self, subscriber: MetadataSubscriber) {
        self.inner.subscribers.lock().unwrap().push(subscriber);
    }

    fn snapshot(&self) -> Vec<JobMetadata> {
        self.inner.entries.lock().unwrap().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::time::Duration;

    use common::{InputSplit, JobInfo, NodeId, Plan};

    use super::*;

    fn sample_meta(node: NodeId, local: u32) -> JobMetadata {
        let mut mappers = HashMap::new();
        mappers.insert(node, HashSet::from([InputSplit::whole("a", 10)]));
        let mut reducers = HashMap::new();
        reducers.insert(node, vec![0]);

        JobMetadata::new(
            JobId::new(node, local),
            node,
            JobInfo::new("t", "in/*", "out", "wc"),
            Plan::new(mappers, reducers),
        )
    }

    #[tokio::test]
    async fn put_if_absent_rejects_duplicates() {
        let store = MemoryMetadataStore::new();
        let node = NodeId::random();
        let meta = sample_meta(node, 1);

        assert!(store.put_if_absent(meta.clone()).is_none());
        assert!(store.put_if_absent(meta.clone()).is_some());
        assert_eq!(store.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn transform_notifies_every_subscriber() {
        let store = MemoryMetadataStore::new();
        let node = NodeId::random();
        let meta = sample_meta(node, 1);
        let job_id = meta.job_id();

        let seen: Arc<Mutex<Vec<JobPhase>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = Arc::clone(&seen);
        store.subscribe(Box::new(move |updates| {
            for (_, meta) in updates {
                if let Some(meta) = meta {
                    seen_cb.lock().unwrap().push(meta.phase());
                }
            }
        }));

        store.put_if_absent(meta);
        store
            .transform(job_id, TransformStack::update_phase(None, JobPhase::Map))
            .await
            .unwrap();

        assert_eq!(&*seen.lock().unwrap(), &[JobPhase::Setup, JobPhase::Map]);
    }

    #[tokio::test]
    async fn transform_on_missing_record_is_noop() {
        let store = MemoryMetadataStore::new();
        let node = NodeId::random();
        let job_id = JobId::new(node, 9);

        store
            .transform(job_id, TransformStack::update_phase(None, JobPhase::Map))
            .await
            .unwrap();

        assert!(store.get(job_id).is_none());
        assert!(store.snapshot().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_evicts_the_record_and_notifies() {
        let store = MemoryMetadataStore::new();
        let node = NodeId::random();
        let meta = sample_meta(node, 1);
        let job_id = meta.job_id();

        let evictions: Arc<Mutex<Vec<JobId>>> = Arc::new(Mutex::new(Vec::new()));
        let evictions_cb = Arc::clone(&evictions);
        store.subscribe(Box::new(move |updates| {
            for (id, meta) in updates {
                if meta.is_none() {
                    evictions_cb.lock().unwrap().push(id);
                }
            }
        }));

        store.put_if_absent(meta);
        store
            .transform(
                job_id,
                TransformStack::complete_job(None, Duration::from_secs(1)),
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(store.get(job_id).is_none());
        assert_eq!(&*evictions.lock().unwrap(), &[job_id]);
    }
}
