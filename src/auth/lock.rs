//! Durable refresh lock.
//!
//! The lock lives in the host's key-value store, not process memory, because
//! the process may be killed mid-refresh; a lock older than the staleness
//! threshold is considered abandoned and may be seized. The store is not
//! transactional, so ownership is verified by re-reading after a tentative
//! write to resolve the race where two callers write simultaneously.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::host::{KvStore, StoreError};

const LOCK_KEY: &str = "auth/refresh_lock";

/// Delay between the tentative write and the ownership re-read.
const VERIFY_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockRecord {
    owner_id: String,
    acquired_at_ms: u64,
}

/// Proof of lock ownership; passed back to [`RefreshLock::release`].
#[derive(Debug)]
pub(crate) struct LockGuard {
    owner_id: String,
}

/// The durable single-holder lock serializing credential refreshes.
pub(crate) struct RefreshLock {
    store: Arc<dyn KvStore>,
    stale_after: Duration,
    wait_ceiling: Duration,
    poll_interval: Duration,
}

impl RefreshLock {
    pub(crate) fn new(
        store: Arc<dyn KvStore>,
        stale_after: Duration,
        wait_ceiling: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            stale_after,
            wait_ceiling,
            poll_interval,
        }
    }

    /// Attempts to acquire the lock, polling until the wait ceiling.
    ///
    /// Returns `None` when another live holder kept the lock for the whole
    /// window - contention, not an error.
    pub(crate) async fn acquire(&self) -> Result<Option<LockGuard>, StoreError> {
        let owner_id = random_owner_id();
        let deadline = tokio::time::Instant::now() + self.wait_ceiling;

        loop {
            if self.try_take(&owner_id).await? {
                debug!(%owner_id, "acquired refresh lock");
                return Ok(Some(LockGuard { owner_id }));
            }
            if tokio::time::Instant::now() + self.poll_interval > deadline {
                debug!("refresh lock still held at wait ceiling");
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Releases the lock if this guard still owns it.
    ///
    /// A seized lock (we were considered stale) is left alone.
    pub(crate) async fn release(&self, guard: LockGuard) -> Result<(), StoreError> {
        match self.read().await? {
            Some(record) if record.owner_id == guard.owner_id => {
                self.store.remove(LOCK_KEY).await?;
                debug!(owner_id = %guard.owner_id, "released refresh lock");
            }
            Some(record) => {
                warn!(
                    owner_id = %guard.owner_id,
                    holder = %record.owner_id,
                    "refresh lock was seized before release"
                );
            }
            None => {}
        }
        Ok(())
    }

    async fn try_take(&self, owner_id: &str) -> Result<bool, StoreError> {
        let now = now_ms();
        if let Some(existing) = self.read().await? {
            let age = now.saturating_sub(existing.acquired_at_ms);
            if u128::from(age) <= self.stale_after.as_millis() {
                return Ok(false);
            }
            warn!(
                holder = %existing.owner_id,
                age_ms = age,
                "seizing stale refresh lock"
            );
        }

        self.write(owner_id, now).await?;
        // Another caller may have written in the same window; the last
        // write wins, so re-read to learn who actually holds the lock.
        tokio::time::sleep(VERIFY_DELAY).await;
        match self.read().await? {
            Some(record) if record.owner_id == owner_id => Ok(true),
            _ => Ok(false),
        }
    }

    async fn read(&self) -> Result<Option<LockRecord>, StoreError> {
        let Some(raw) = self.store.get(LOCK_KEY).await? else {
            return Ok(None);
        };
        match serde_json::from_value(raw) {
            Ok(record) => Ok(Some(record)),
            Err(error) => {
                warn!(%error, "refresh lock record is corrupt, treating as absent");
                Ok(None)
            }
        }
    }

    async fn write(&self, owner_id: &str, acquired_at_ms: u64) -> Result<(), StoreError> {
        let record = LockRecord {
            owner_id: owner_id.to_string(),
            acquired_at_ms,
        };
        let value = serde_json::to_value(&record)
            .map_err(|error| StoreError::backend(error.to_string()))?;
        self.store.set(LOCK_KEY, value).await
    }
}

fn random_owner_id() -> String {
    let mut rng = rand::thread_rng();
    format!("{:016x}", rng.gen_range(0..u64::MAX))
}

#[allow(clippy::cast_possible_truncation)]
fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
