//! Cache entry records and metadata accounting.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Durable record stored per collection, holding the payload itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredEntry {
    /// The cached catalog payload.
    pub payload: Value,
    /// Write timestamp, unix milliseconds.
    pub created_at_ms: u64,
    /// Whether the payload was truncated to fit storage bounds.
    pub truncated: bool,
}

/// Accounting row kept in [`CacheMetadata`] for one entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct EntrySummary {
    /// Serialized payload size at write time.
    pub size_bytes: u64,
    /// Last explicit touch, unix milliseconds; monotonically non-decreasing.
    pub last_access_ms: u64,
    /// Number of touches.
    pub access_count: u64,
    /// Write timestamp, unix milliseconds.
    pub created_at_ms: u64,
    /// Insertion counter; breaks last-access ties, oldest first.
    pub insert_seq: u64,
    /// Whether the stored payload was truncated.
    pub truncated: bool,
}

/// The cache's durable accounting map.
///
/// Invariant: `total_size_bytes` equals the sum of all entry sizes. Only the
/// cache's own set/evict paths mutate it; a crash between an entry write and
/// the metadata write leaves a stale row that self-heals on the next read or
/// eviction pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct CacheMetadata {
    /// Per-collection accounting rows.
    pub entries: HashMap<String, EntrySummary>,
    /// Sum of all entry sizes.
    pub total_size_bytes: u64,
    /// Next insertion counter value.
    pub next_seq: u64,
}

impl CacheMetadata {
    /// Returns the least-recently-used collection, oldest `last_access_ms`
    /// first with ties broken by insertion order, skipping `exclude`.
    pub fn lru_key(&self, exclude: Option<&str>) -> Option<String> {
        self.entries
            .iter()
            .filter(|(key, _)| exclude != Some(key.as_str()))
            .min_by(|(_, a), (_, b)| {
                a.last_access_ms
                    .cmp(&b.last_access_ms)
                    .then(a.insert_seq.cmp(&b.insert_seq))
            })
            .map(|(key, _)| key.clone())
    }
}

/// Read-only cache statistics, for diagnostics.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Number of cached collections.
    pub entries: usize,
    /// Total serialized bytes across all entries.
    pub total_size_bytes: u64,
    /// Touch counts per collection.
    pub access_counts: HashMap<String, u64>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn summary(last_access_ms: u64, insert_seq: u64) -> EntrySummary {
        EntrySummary {
            size_bytes: 10,
            last_access_ms,
            access_count: 0,
            created_at_ms: last_access_ms,
            insert_seq,
            truncated: false,
        }
    }

    #[test]
    fn lru_key_picks_oldest_access() {
        let mut meta = CacheMetadata::default();
        meta.entries.insert("a".to_string(), summary(100, 0));
        meta.entries.insert("b".to_string(), summary(50, 1));
        meta.entries.insert("c".to_string(), summary(200, 2));

        assert_eq!(meta.lru_key(None), Some("b".to_string()));
    }

    #[test]
    fn lru_key_breaks_ties_by_insertion_order() {
        let mut meta = CacheMetadata::default();
        meta.entries.insert("late".to_string(), summary(100, 5));
        meta.entries.insert("early".to_string(), summary(100, 1));

        assert_eq!(meta.lru_key(None), Some("early".to_string()));
    }

    #[test]
    fn lru_key_respects_exclusion_and_empty_map() {
        let mut meta = CacheMetadata::default();
        assert_eq!(meta.lru_key(None), None);

        meta.entries.insert("only".to_string(), summary(100, 0));
        assert_eq!(meta.lru_key(Some("only")), None);
        assert_eq!(meta.lru_key(Some("other")), Some("only".to_string()));
    }
}
