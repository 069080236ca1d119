//! Error types for the record cache.

use thiserror::Error;

use crate::host::StoreError;

/// Errors that can occur during cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The durable store rejected an operation, after the eviction
    /// fallback already ran.
    #[error("cache storage error: {0}")]
    Store(#[from] StoreError),

    /// A payload could not be serialized for size accounting or storage.
    #[error("cache serialization error: {source}")]
    Serialize {
        /// The underlying serde error.
        #[source]
        source: serde_json::Error,
    },
}

impl CacheError {
    /// Creates a serialization error.
    pub fn serialize(source: serde_json::Error) -> Self {
        Self::Serialize { source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_display_carries_backend_context() {
        let error = CacheError::from(StoreError::quota_exceeded("record_cache/entry/c1"));
        let msg = error.to_string();
        assert!(msg.contains("quota"), "Expected quota context in: {msg}");
        assert!(msg.contains("c1"), "Expected key in: {msg}");
    }
}
