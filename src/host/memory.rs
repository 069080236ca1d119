//! In-memory host facility backends.
//!
//! These back the host contracts with process-local state. They are the
//! default harness for tests and for embedding the library somewhere the
//! real platform facilities are unavailable. [`MemoryKvStore`] additionally
//! supports quota-failure injection so callers can exercise their storage
//! fallback paths.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use super::{AlarmCallback, AlarmScheduler, FileSink, KvStore, SinkError, StoreError};

/// In-memory [`KvStore`] backed by a concurrent map.
///
/// Not durable across restarts; durability is the real platform's concern.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: DashMap<String, Value>,
    /// -1 rejects every write, 0 rejects none, n > 0 rejects the next n.
    reject_writes: AtomicI64,
}

impl MemoryKvStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// While enabled, every `set` fails with [`StoreError::QuotaExceeded`].
    ///
    /// Used to exercise quota fallback paths.
    pub fn set_quota_exceeded(&self, reject: bool) {
        self.reject_writes
            .store(if reject { -1 } else { 0 }, Ordering::SeqCst);
    }

    /// Rejects only the next `count` writes with
    /// [`StoreError::QuotaExceeded`], then recovers.
    pub fn fail_next_sets(&self, count: u32) {
        self.reject_writes.store(i64::from(count), Ordering::SeqCst);
    }

    fn should_reject(&self) -> bool {
        let remaining = self.reject_writes.load(Ordering::SeqCst);
        if remaining < 0 {
            return true;
        }
        if remaining > 0 {
            return self
                .reject_writes
                .compare_exchange(remaining, remaining - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok();
        }
        false
    }

    /// Returns the number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether the store holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        if self.should_reject() {
            return Err(StoreError::quota_exceeded(key));
        }
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn get_all(&self) -> Result<HashMap<String, Value>, StoreError> {
        Ok(self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect())
    }
}

/// In-memory [`FileSink`] collecting saved files for inspection.
#[derive(Debug, Default)]
pub struct MemoryFileSink {
    files: DashMap<PathBuf, Vec<u8>>,
}

impl MemoryFileSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the bytes saved under `path`, if any.
    #[must_use]
    pub fn saved(&self, path: &Path) -> Option<Vec<u8>> {
        self.files.get(path).map(|entry| entry.value().clone())
    }

    /// Returns every saved path, unordered.
    #[must_use]
    pub fn paths(&self) -> Vec<PathBuf> {
        self.files.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Returns the number of saved files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Returns whether no files were saved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[async_trait]
impl FileSink for MemoryFileSink {
    async fn save(&self, path_hint: &Path, bytes: &[u8]) -> Result<(), SinkError> {
        self.files.insert(path_hint.to_path_buf(), bytes.to_vec());
        Ok(())
    }
}

/// [`AlarmScheduler`] that records registrations and fires them on demand.
///
/// Stands in for the platform alarm facility in tests, where wall-clock
/// recurrence is replaced by explicit [`ManualAlarms::fire`] calls.
#[derive(Default)]
pub struct ManualAlarms {
    alarms: Mutex<Vec<(String, Duration, AlarmCallback)>>,
}

impl ManualAlarms {
    /// Creates a scheduler with no registered alarms.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the alarm registered under `name`, if any.
    ///
    /// Returns whether a callback ran.
    pub fn fire(&self, name: &str) -> bool {
        let alarms = self
            .alarms
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some((_, _, callback)) = alarms.iter().find(|(alarm, _, _)| alarm == name) else {
            return false;
        };
        callback();
        true
    }

    /// Returns the registered alarm names and intervals.
    #[must_use]
    pub fn registered(&self) -> Vec<(String, Duration)> {
        self.alarms
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .map(|(name, interval, _)| (name.clone(), *interval))
            .collect()
    }
}

impl AlarmScheduler for ManualAlarms {
    fn schedule_recurring(&self, name: &str, interval: Duration, callback: AlarmCallback) {
        let mut alarms = self
            .alarms
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        alarms.retain(|(alarm, _, _)| alarm != name);
        alarms.push((name.to_string(), interval, callback));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn memory_store_round_trips_values() {
        let store = MemoryKvStore::new();
        store.set("a", json!({"x": 1})).await.unwrap();

        assert_eq!(store.get("a").await.unwrap(), Some(json!({"x": 1})));
        assert_eq!(store.get("missing").await.unwrap(), None);

        store.remove("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn memory_store_quota_injection_rejects_writes() {
        let store = MemoryKvStore::new();
        store.set_quota_exceeded(true);

        let error = store.set("a", json!(1)).await.unwrap_err();
        assert!(matches!(error, StoreError::QuotaExceeded { .. }));

        store.set_quota_exceeded(false);
        store.set("a", json!(1)).await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn memory_store_counted_failures_recover() {
        let store = MemoryKvStore::new();
        store.fail_next_sets(2);

        assert!(store.set("a", json!(1)).await.is_err());
        assert!(store.set("b", json!(2)).await.is_err());
        store.set("c", json!(3)).await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn memory_store_get_all_snapshots_every_key() {
        let store = MemoryKvStore::new();
        store.set("a", json!(1)).await.unwrap();
        store.set("b", json!(2)).await.unwrap();

        let all = store.get_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all.get("b"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn memory_sink_records_saved_files() {
        let sink = MemoryFileSink::new();
        sink.save(Path::new("batch/a.pdf"), b"bytes").await.unwrap();

        assert_eq!(sink.saved(Path::new("batch/a.pdf")).unwrap(), b"bytes");
        assert!(sink.saved(Path::new("batch/b.pdf")).is_none());
    }

    #[test]
    fn manual_alarms_fire_registered_callback() {
        let alarms = ManualAlarms::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        alarms.schedule_recurring(
            "tick",
            Duration::from_secs(60),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert!(alarms.fire("tick"));
        assert!(alarms.fire("tick"));
        assert!(!alarms.fire("unknown"));
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn manual_alarms_replace_same_name() {
        let alarms = ManualAlarms::new();
        alarms.schedule_recurring("tick", Duration::from_secs(60), Box::new(|| {}));
        alarms.schedule_recurring("tick", Duration::from_secs(120), Box::new(|| {}));

        let registered = alarms.registered();
        assert_eq!(registered.len(), 1);
        assert_eq!(registered[0].1, Duration::from_secs(120));
    }
}
