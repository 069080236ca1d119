//! Batch progress tracking with durable snapshots.
//!
//! Progress is mutated only through the tracker and persisted to the host
//! store on every change, so a restarted process can report accurate batch
//! status. External pollers only ever see cloned snapshots.

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::host::KvStore;

pub(crate) const PROGRESS_KEY: &str = "transfer/progress";

/// Snapshot of one batch's progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchProgress {
    /// Total jobs in the batch (content jobs plus the manifest job).
    pub total: usize,
    /// Jobs finished successfully.
    pub completed: usize,
    /// Jobs that failed after all permitted attempts.
    pub failed: usize,
    /// Display name of the most recently started job.
    pub current_file: Option<String>,
    /// Whether the batch is still running.
    pub active: bool,
}

/// Owns the mutable progress record for the running batch.
pub(crate) struct ProgressTracker {
    store: Arc<dyn KvStore>,
    state: Mutex<BatchProgress>,
}

impl ProgressTracker {
    pub(crate) fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            state: Mutex::new(BatchProgress::default()),
        }
    }

    /// Loads the persisted snapshot, e.g. after a process restart.
    pub(crate) async fn load(store: &dyn KvStore) -> Option<BatchProgress> {
        let raw = store.get(PROGRESS_KEY).await.ok()??;
        serde_json::from_value(raw).ok()
    }

    /// Resets the tracker for a new batch and persists the initial record.
    pub(crate) async fn reset(&self, total: usize) {
        self.update(|progress| {
            *progress = BatchProgress {
                total,
                completed: 0,
                failed: 0,
                current_file: None,
                active: true,
            };
        })
        .await;
    }

    /// Returns an immutable snapshot; safe to call from pollers.
    pub(crate) fn snapshot(&self) -> BatchProgress {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) async fn record_started(&self, display_name: &str) {
        let name = display_name.to_string();
        self.update(|progress| progress.current_file = Some(name)).await;
    }

    pub(crate) async fn record_completed(&self) {
        self.update(|progress| progress.completed += 1).await;
    }

    pub(crate) async fn record_failed(&self) {
        self.update(|progress| progress.failed += 1).await;
    }

    /// Marks the batch as no longer active (finished or cancelled).
    pub(crate) async fn finish(&self) {
        self.update(|progress| {
            progress.active = false;
            progress.current_file = None;
        })
        .await;
    }

    async fn update(&self, mutate: impl FnOnce(&mut BatchProgress)) {
        let snapshot = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            mutate(&mut state);
            state.clone()
        };
        // Persistence is best-effort: a failed write costs restart-accuracy,
        // not batch correctness.
        match serde_json::to_value(&snapshot) {
            Ok(value) => {
                if let Err(error) = self.store.set(PROGRESS_KEY, value).await {
                    warn!(%error, "failed to persist batch progress");
                }
            }
            Err(error) => warn!(%error, "failed to serialize batch progress"),
        }
    }
}
