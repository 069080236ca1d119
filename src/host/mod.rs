//! Host platform facilities consumed by the core components.
//!
//! The surrounding platform provides a durable key-value store, a file-save
//! facility, and a timer/alarm facility that can resurrect a dormant process.
//! The core only ever talks to them through the narrow contracts defined
//! here, so every component can be exercised against the bundled in-memory
//! backends as easily as against the real platform.

mod fs;
mod memory;

pub use fs::DirFileSink;
pub use memory::{ManualAlarms, MemoryFileSink, MemoryKvStore};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Errors surfaced by [`KvStore`] backends.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The backend rejected a write because a global quota was exceeded.
    ///
    /// The quota is platform-wide and unrelated to the caller's own
    /// accounting, so a caller may free space and retry.
    #[error("storage quota exceeded writing key {key}")]
    QuotaExceeded {
        /// The key whose write was rejected.
        key: String,
    },

    /// Any other backend-level failure.
    #[error("storage backend failure: {message}")]
    Backend {
        /// Human-readable error payload.
        message: String,
    },
}

impl StoreError {
    /// Creates a quota-exceeded error for the given key.
    pub fn quota_exceeded(key: impl Into<String>) -> Self {
        Self::QuotaExceeded { key: key.into() }
    }

    /// Creates a backend error with the given message.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}

/// Durable key-value store surviving process restarts.
///
/// Values are JSON documents. Individual operations are durable but the
/// store is NOT transactional across multiple keys; callers that maintain
/// related keys must tolerate a crash between two writes.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Returns the value stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Stores `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;

    /// Removes `key`; absent keys are a no-op.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Returns a snapshot of all stored key-value pairs.
    async fn get_all(&self) -> Result<HashMap<String, Value>, StoreError>;
}

/// Errors surfaced by [`FileSink`] implementations.
#[derive(Debug, Error)]
pub enum SinkError {
    /// File system error while saving.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The destination path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The path hint escaped the sink's root (absolute or `..` components).
    #[error("invalid save path: {path}")]
    InvalidPath {
        /// The rejected path hint.
        path: PathBuf,
    },
}

impl SinkError {
    /// Creates an IO error for the given destination path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Host file-save facility.
#[async_trait]
pub trait FileSink: Send + Sync {
    /// Saves `bytes` under the given relative path hint.
    ///
    /// Intermediate folders in the hint are created as needed.
    async fn save(&self, path_hint: &Path, bytes: &[u8]) -> Result<(), SinkError>;
}

/// Callback invoked when a scheduled alarm fires.
pub type AlarmCallback = Box<dyn Fn() + Send + Sync>;

/// Host timer/alarm facility.
///
/// Alarms fire even if the process was dormant, by resurrecting it; the
/// callback must therefore not capture state that only exists in a running
/// process.
pub trait AlarmScheduler: Send + Sync {
    /// Registers `callback` to fire every `interval`, replacing any
    /// previously registered alarm with the same `name`.
    fn schedule_recurring(&self, name: &str, interval: Duration, callback: AlarmCallback);
}
