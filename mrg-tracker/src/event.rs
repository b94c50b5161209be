use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;
use tracing::debug;

use common::{JobId, JobMetadata, NodeDescriptor};

use crate::tracker::TrackerCore;

/// Work items serialized through the tracker's single event loop.
///
/// Metadata-update notifications and topology changes both funnel through
/// here, so a node applies them in one serial order: there is no race
/// between "mapper N completed" and "the node hosting mapper N left".
#[derive(Debug)]
pub(crate) enum TrackerEvent {
    /// A batch of record updates from the metadata store. `None` marks an
    /// evicted record.
    MetadataUpdated(Vec<(JobId, Option<JobMetadata>)>),

    /// A node left the cluster or failed.
    NodeLeft(NodeDescriptor),

    /// Terminate the loop.
    Shutdown,
}

/// Single-threaded event worker. Subscription callbacks only enqueue onto
/// the channel; all processing happens here, under the readers gate.
pub(crate) async fn run(core: Arc<TrackerCore>, mut rx: UnboundedReceiver<TrackerEvent>) {
    while let Some(event) = rx.recv().await {
        if matches!(event, TrackerEvent::Shutdown) {
            break;
        }

        let Ok(_gate) = core.gate.try_read() else {
            continue;
        };
        if core.stopped.load(Ordering::SeqCst) {
            continue;
        }

        match event {
            TrackerEvent::MetadataUpdated(updates) => core.process_job_metadata(updates).await,
            TrackerEvent::NodeLeft(departed) => core.process_node_left(departed).await,
            TrackerEvent::Shutdown => unreachable!(),
        }
    }

    debug!("Tracker event loop drained");
}
