use tokio::sync::watch;

use common::{JobId, TrackerError};

/// Terminal outcome of a job: its ID plus the recorded fail cause, if any.
/// A `None` fail cause means the job committed successfully.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub job_id: JobId,
    pub fail_cause: Option<TrackerError>,
}

pub(crate) type FinishResult = Result<JobOutcome, TrackerError>;
pub(crate) type FinishSender = watch::Sender<Option<FinishResult>>;

/// Client-visible handle resolved when a job reaches its terminal phase.
///
/// Resolves to the job outcome, or to [`TrackerError::Stopping`] when the
/// tracker shuts down first. Any number of handles may exist for the same
/// job; all of them resolve with the same result.
#[derive(Debug)]
pub struct FinishFuture {
    rx: watch::Receiver<Option<FinishResult>>,
    // Keeps a pre-resolved channel alive until the caller has awaited it.
    _tx: Option<FinishSender>,
}

impl FinishFuture {
    pub(crate) fn subscribe(tx: &FinishSender) -> Self {
        FinishFuture {
            rx: tx.subscribe(),
            _tx: None,
        }
    }

    /// A handle that is already resolved.
    pub(crate) fn ready(result: FinishResult) -> Self {
        let (tx, rx) = watch::channel(Some(result));
        FinishFuture { rx, _tx: Some(tx) }
    }

    /// Wait for the job to finish.
    pub async fn wait(mut self) -> Result<JobOutcome, TrackerError> {
        match self.rx.wait_for(|slot| slot.is_some()).await {
            Ok(slot) => slot.clone().expect("resolved finish future"),
            // Sender dropped without a result: the tracker went away.
            Err(_) => Err(TrackerError::Stopping),
        }
    }
}
