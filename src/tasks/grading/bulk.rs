use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{watch, Mutex};

use super::policy::RetryPolicy;
use super::worker::{until_cancelled, wait_or_cancel};
use crate::services::platform::{AuthContext, PlatformBinding, PlatformError, RemoteStatus};

/// Result of one bulk status call, shared by every job that was polling.
#[derive(Debug)]
pub(super) struct BulkSnapshot {
    requested: HashSet<String>,
    statuses: Result<HashMap<String, RemoteStatus>, PlatformError>,
}

impl BulkSnapshot {
    /// `None` when the id was not part of this call.
    fn status_for(&self, submission_id: &str) -> Option<Result<RemoteStatus, PlatformError>> {
        if !self.requested.contains(submission_id) {
            return None;
        }
        Some(match &self.statuses {
            Ok(statuses) => Ok(statuses
                .get(submission_id)
                .cloned()
                .unwrap_or_else(|| RemoteStatus::Unknown { raw: "missing".to_string() })),
            Err(err) => Err(err.clone()),
        })
    }
}

/// A job's view of the batch-wide bulk poller. Jobs register while they
/// are polling; each published snapshot counts as one poll attempt for
/// every id it covered.
#[derive(Debug, Clone)]
pub(super) struct StatusFeed {
    watched: Arc<Mutex<HashSet<String>>>,
    snapshots: watch::Receiver<Option<Arc<BulkSnapshot>>>,
}

pub(super) struct FeedPublisher {
    watched: Arc<Mutex<HashSet<String>>>,
    snapshots: watch::Sender<Option<Arc<BulkSnapshot>>>,
}

pub(super) fn channel() -> (FeedPublisher, StatusFeed) {
    let watched = Arc::new(Mutex::new(HashSet::new()));
    let (tx, rx) = watch::channel(None);
    (FeedPublisher { watched: watched.clone(), snapshots: tx }, StatusFeed { watched, snapshots: rx })
}

impl StatusFeed {
    /// Waits for the next snapshot that includes `submission_id`. Returns
    /// `None` on cancellation.
    pub(super) async fn next_status(
        &mut self,
        submission_id: &str,
        cancel: &mut watch::Receiver<bool>,
    ) -> Option<Result<RemoteStatus, PlatformError>> {
        self.watched.lock().await.insert(submission_id.to_string());

        loop {
            match until_cancelled(cancel, self.snapshots.changed()).await? {
                Ok(()) => {}
                Err(_) => {
                    return Some(Err(PlatformError::Transient {
                        endpoint: "bulk_status".to_string(),
                        message: "status feed stopped".to_string(),
                    }))
                }
            }

            let snapshot = self.snapshots.borrow_and_update().clone();
            if let Some(status) = snapshot.and_then(|snapshot| snapshot.status_for(submission_id)) {
                return Some(status);
            }
        }
    }

    pub(super) async fn unwatch(&self, submission_id: &str) {
        self.watched.lock().await.remove(submission_id);
    }
}

impl FeedPublisher {
    /// Polls the bulk endpoint for whichever ids are registered until `stop`
    /// fires. The interval backs off per tick like a single job's polls.
    pub(super) async fn run(
        self,
        binding: Arc<dyn PlatformBinding>,
        auth: AuthContext,
        policy: RetryPolicy,
        mut stop: watch::Receiver<bool>,
    ) {
        let mut tick: u32 = 0;
        loop {
            if !wait_or_cancel(&mut stop, policy.delay_for(tick)).await {
                break;
            }

            let mut ids: Vec<String> = self.watched.lock().await.iter().cloned().collect();
            if ids.is_empty() {
                continue;
            }
            ids.sort();

            let Some(outcome) = until_cancelled(&mut stop, binding.bulk_status(&ids, &auth)).await
            else {
                break;
            };
            metrics::counter!("grading_poll_attempts_total").increment(ids.len() as u64);

            let statuses = match outcome {
                Ok(rows) => Ok(rows.into_iter().collect::<HashMap<_, _>>()),
                Err(err) => {
                    tracing::warn!(tick, error = %err, "Bulk status poll failed");
                    Err(err)
                }
            };
            tracing::debug!(tick, watched = ids.len(), "Published bulk status snapshot");

            let snapshot = BulkSnapshot { requested: ids.into_iter().collect(), statuses };
            self.snapshots.send_replace(Some(Arc::new(snapshot)));
            tick = tick.saturating_add(1);
        }
    }
}
