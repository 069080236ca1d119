//! Durable LRU cache for catalog snapshots.
//!
//! Catalog queries are expensive against a quota-limited service, so their
//! results are cached in the host's durable key-value store, bounded by both
//! entry count and aggregate serialized size. Under pressure the
//! least-recently-used entry is evicted first, oldest explicit touch first
//! with ties broken by insertion order.
//!
//! Reads do not update recency; callers that treat a read as "use" call
//! [`RecordCache::touch`] explicitly. This keeps the recency policy in one
//! place instead of scattering it across call sites.

mod entry;
mod error;

pub use entry::CacheStats;
pub use error::CacheError;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::catalog::CollectionId;
use crate::host::KvStore;

use entry::{CacheMetadata, EntrySummary, StoredEntry};

const META_KEY: &str = "record_cache/meta";
const ENTRY_PREFIX: &str = "record_cache/entry/";

/// Default maximum number of cached collections.
const DEFAULT_MAX_ENTRIES: usize = 10;

/// Default aggregate size bound (4 MiB).
const DEFAULT_MAX_BYTES: u64 = 4 * 1024 * 1024;

/// Default staleness bound (30 days).
const DEFAULT_MAX_AGE: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Sub-collections droppable when a single payload must be truncated,
/// in drop order.
const DROPPABLE_SECTIONS: &[&str] = &["announcements"];

/// Tunable cache bounds.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of cached collections.
    pub max_entries: usize,
    /// Maximum aggregate serialized size in bytes.
    pub max_bytes: u64,
    /// Entries older than this are treated as absent and deleted on read.
    pub max_age: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            max_bytes: DEFAULT_MAX_BYTES,
            max_age: DEFAULT_MAX_AGE,
        }
    }
}

/// LRU cache for catalog query results, persisted across process restarts.
pub struct RecordCache {
    store: Arc<dyn KvStore>,
    config: CacheConfig,
}

impl RecordCache {
    /// Creates a cache over the given durable store.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>, config: CacheConfig) -> Self {
        Self { store, config }
    }

    /// Returns the cached payload for `collection`, if present and fresh.
    ///
    /// A present-but-stale entry is deleted as a side effect and reported
    /// as absent. Recency is NOT updated here; see [`RecordCache::touch`].
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Store`] when the durable store fails.
    pub async fn get(&self, collection: &CollectionId) -> Result<Option<Value>, CacheError> {
        self.get_at(collection, now_ms()).await
    }

    #[instrument(skip(self), fields(collection = %collection))]
    async fn get_at(
        &self,
        collection: &CollectionId,
        now_ms: u64,
    ) -> Result<Option<Value>, CacheError> {
        let mut meta = self.load_meta().await?;
        let key = collection.as_str();
        let Some(summary) = meta.entries.get(key) else {
            return Ok(None);
        };

        let age_ms = now_ms.saturating_sub(summary.created_at_ms);
        if u128::from(age_ms) > self.config.max_age.as_millis() {
            debug!(age_ms, "cache entry is stale, deleting");
            self.drop_row(&mut meta, key).await?;
            self.save_meta(&meta).await?;
            return Ok(None);
        }

        match self.store.get(&entry_key(key)).await? {
            Some(raw) => match serde_json::from_value::<StoredEntry>(raw) {
                Ok(stored) => Ok(Some(stored.payload)),
                Err(error) => {
                    warn!(%error, "cache entry is corrupt, deleting");
                    self.drop_row(&mut meta, key).await?;
                    self.save_meta(&meta).await?;
                    Ok(None)
                }
            },
            None => {
                // Metadata references an entry that no longer exists, e.g.
                // after a crash between the two writes. Heal the accounting.
                warn!("cache metadata referenced a missing entry, healing");
                self.drop_row(&mut meta, key).await?;
                self.save_meta(&meta).await?;
                Ok(None)
            }
        }
    }

    /// Marks `collection` as used now: bumps `last_access_ms` and the
    /// access count. No-op when the entry does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Store`] when the durable store fails.
    pub async fn touch(&self, collection: &CollectionId) -> Result<(), CacheError> {
        self.touch_at(collection, now_ms()).await
    }

    async fn touch_at(&self, collection: &CollectionId, now_ms: u64) -> Result<(), CacheError> {
        let mut meta = self.load_meta().await?;
        let Some(summary) = meta.entries.get_mut(collection.as_str()) else {
            return Ok(());
        };
        // last_access_ms never moves backwards.
        summary.last_access_ms = summary.last_access_ms.max(now_ms);
        summary.access_count += 1;
        self.save_meta(&meta).await
    }

    /// Stores `payload` under `collection`, evicting LRU entries until both
    /// bounds hold.
    ///
    /// A single payload whose serialized size exceeds 90% of the byte bound
    /// is truncated (droppable sub-collections removed first) and flagged
    /// before storage.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Store`] when the durable store rejects the
    /// write even after the eviction fallback, and [`CacheError::Serialize`]
    /// when the payload cannot be serialized.
    pub async fn set(&self, collection: &CollectionId, payload: Value) -> Result<(), CacheError> {
        self.set_at(collection, payload, now_ms()).await
    }

    #[instrument(skip(self, payload), fields(collection = %collection))]
    async fn set_at(
        &self,
        collection: &CollectionId,
        payload: Value,
        now_ms: u64,
    ) -> Result<(), CacheError> {
        let (payload, truncated) = self.truncate_if_oversized(payload)?;
        let size_bytes = serialized_size(&payload)?;

        let mut meta = self.load_meta().await?;
        let key = collection.as_str();
        let prev_size = meta.entries.get(key).map(|summary| summary.size_bytes);
        let is_new = prev_size.is_none();

        // Evict until the write fits both bounds. The entry being written is
        // never an eviction candidate; an empty cache cannot evict, so an
        // oversized first entry still lands (possibly truncated).
        loop {
            let projected_total =
                meta.total_size_bytes - prev_size.unwrap_or(0) + size_bytes;
            let over_bytes = projected_total > self.config.max_bytes;
            let over_count = is_new && meta.entries.len() >= self.config.max_entries;
            if !over_bytes && !over_count {
                break;
            }
            if !self.evict_one(&mut meta, Some(key)).await? {
                break;
            }
        }

        let insert_seq = match meta.entries.get(key) {
            Some(previous) => previous.insert_seq,
            None => {
                let seq = meta.next_seq;
                meta.next_seq += 1;
                seq
            }
        };
        meta.total_size_bytes = meta.total_size_bytes - prev_size.unwrap_or(0) + size_bytes;
        meta.entries.insert(
            key.to_string(),
            EntrySummary {
                size_bytes,
                last_access_ms: now_ms,
                access_count: 0,
                created_at_ms: now_ms,
                insert_seq,
                truncated,
            },
        );

        let stored = StoredEntry {
            payload,
            created_at_ms: now_ms,
            truncated,
        };
        match self.write_entry(key, &stored, &meta).await {
            Ok(()) => Ok(()),
            Err(CacheError::Store(error)) => {
                // The store rejected the write for reasons outside our own
                // accounting (e.g. a global quota). Evict down to the entry
                // being written and retry once.
                warn!(%error, "store rejected cache write, evicting to a single entry");
                while meta.entries.len() > 1 {
                    if !self.evict_one(&mut meta, Some(key)).await? {
                        break;
                    }
                }
                self.write_entry(key, &stored, &meta).await
            }
            Err(other) => Err(other),
        }
    }

    /// Removes the single least-recently-used entry.
    ///
    /// Returns whether an eviction occurred; an empty cache returns false.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Store`] when the durable store fails.
    pub async fn evict_lru(&self) -> Result<bool, CacheError> {
        let mut meta = self.load_meta().await?;
        let evicted = self.evict_one(&mut meta, None).await?;
        if evicted {
            self.save_meta(&meta).await?;
        }
        Ok(evicted)
    }

    /// Unconditionally removes `collection`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Store`] when the durable store fails.
    pub async fn clear(&self, collection: &CollectionId) -> Result<(), CacheError> {
        let mut meta = self.load_meta().await?;
        if meta.entries.contains_key(collection.as_str()) {
            self.drop_row(&mut meta, collection.as_str()).await?;
            self.save_meta(&meta).await?;
        }
        Ok(())
    }

    /// Unconditionally removes every entry and the metadata record.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Store`] when the durable store fails.
    pub async fn clear_all(&self) -> Result<(), CacheError> {
        let meta = self.load_meta().await?;
        for key in meta.entries.keys() {
            self.store.remove(&entry_key(key)).await?;
        }
        self.store.remove(META_KEY).await?;
        info!(entries = meta.entries.len(), "cleared record cache");
        Ok(())
    }

    /// Returns cache statistics for diagnostics.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Store`] when the durable store fails.
    pub async fn stats(&self) -> Result<CacheStats, CacheError> {
        let meta = self.load_meta().await?;
        Ok(CacheStats {
            entries: meta.entries.len(),
            total_size_bytes: meta.total_size_bytes,
            access_counts: meta
                .entries
                .iter()
                .map(|(key, summary)| (key.clone(), summary.access_count))
                .collect(),
        })
    }

    async fn evict_one(
        &self,
        meta: &mut CacheMetadata,
        exclude: Option<&str>,
    ) -> Result<bool, CacheError> {
        let Some(victim) = meta.lru_key(exclude) else {
            return Ok(false);
        };
        self.drop_row(meta, &victim).await?;
        info!(collection = %victim, "evicted least-recently-used cache entry");
        Ok(true)
    }

    /// Removes an entry record and its accounting row; the caller persists
    /// the metadata.
    async fn drop_row(&self, meta: &mut CacheMetadata, key: &str) -> Result<(), CacheError> {
        if let Some(summary) = meta.entries.remove(key) {
            meta.total_size_bytes = meta.total_size_bytes.saturating_sub(summary.size_bytes);
        }
        self.store.remove(&entry_key(key)).await?;
        Ok(())
    }

    async fn write_entry(
        &self,
        key: &str,
        stored: &StoredEntry,
        meta: &CacheMetadata,
    ) -> Result<(), CacheError> {
        let entry_value = serde_json::to_value(stored).map_err(CacheError::serialize)?;
        self.store.set(&entry_key(key), entry_value).await?;
        self.save_meta(meta).await
    }

    async fn load_meta(&self) -> Result<CacheMetadata, CacheError> {
        match self.store.get(META_KEY).await? {
            Some(raw) => match serde_json::from_value(raw) {
                Ok(meta) => Ok(meta),
                Err(error) => {
                    warn!(%error, "cache metadata is corrupt, starting fresh");
                    Ok(CacheMetadata::default())
                }
            },
            None => Ok(CacheMetadata::default()),
        }
    }

    async fn save_meta(&self, meta: &CacheMetadata) -> Result<(), CacheError> {
        let value = serde_json::to_value(meta).map_err(CacheError::serialize)?;
        self.store.set(META_KEY, value).await?;
        Ok(())
    }

    fn truncate_if_oversized(&self, payload: Value) -> Result<(Value, bool), CacheError> {
        let threshold = self.config.max_bytes * 9 / 10;
        if serialized_size(&payload)? <= threshold {
            return Ok((payload, false));
        }

        let mut payload = payload;
        for section in DROPPABLE_SECTIONS {
            if let Some(object) = payload.as_object_mut() {
                object.remove(*section);
            }
            if serialized_size(&payload)? <= threshold {
                warn!(section = *section, "payload truncated by dropping sub-collection");
                return Ok((payload, true));
            }
        }
        // Still oversized: shed records from the tail, keeping at least one
        // so the entry remains useful.
        loop {
            let shrunk = match payload.get_mut("records").and_then(Value::as_array_mut) {
                Some(records) if records.len() > 1 => {
                    records.pop();
                    true
                }
                _ => false,
            };
            if !shrunk || serialized_size(&payload)? <= threshold {
                break;
            }
        }
        warn!("payload exceeded storage threshold and was truncated");
        Ok((payload, true))
    }
}

fn entry_key(collection: &str) -> String {
    format!("{ENTRY_PREFIX}{collection}")
}

fn serialized_size(payload: &Value) -> Result<u64, CacheError> {
    let serialized = serde_json::to_string(payload).map_err(CacheError::serialize)?;
    Ok(serialized.len() as u64)
}

#[allow(clippy::cast_possible_truncation)]
fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
