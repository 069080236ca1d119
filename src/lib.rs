//! Classfetch Core Library
//!
//! This library provides the resilience layer for a course-material client:
//! it fetches structured catalog records from a quota-limited remote service,
//! caches them locally under strict size/count bounds, and drives a
//! bounded-concurrency download pipeline against a second remote content
//! service. The host process may be suspended or killed between any two
//! operations, so all coordination state lives in a durable key-value store.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`limiter`] - priority token-bucket rate limiting with backoff windows
//! - [`cache`] - durable LRU cache for catalog snapshots
//! - [`auth`] - credential management with a durable refresh lock
//! - [`transfer`] - deduplicated, retryable, cancellable download batches
//! - [`catalog`] - the record model and cached catalog fetching
//! - [`api`] - remote API contracts and the bundled HTTP client
//! - [`host`] - host platform facilities (storage, file saves, alarms)

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod auth;
pub mod cache;
pub mod catalog;
pub mod host;
pub mod limiter;
pub mod transfer;

// Re-export commonly used types
pub use api::{ApiError, CatalogApi, ContentApi, HttpApiClient};
pub use auth::{AuthConfig, CredentialError, CredentialManager, ProviderError, TokenProvider};
pub use cache::{CacheConfig, CacheError, CacheStats, RecordCache};
pub use catalog::{
    Announcement, Attachment, CatalogFetcher, CollectionId, CollectionSnapshot, CourseRecord,
    ExportFormat, FetchError,
};
pub use host::{
    AlarmScheduler, DirFileSink, FileSink, KvStore, ManualAlarms, MemoryFileSink, MemoryKvStore,
    SinkError, StoreError,
};
pub use limiter::{LimiterConfig, LimiterStats, Priority, RateLimiter, parse_retry_after};
pub use transfer::{
    BatchProgress, DownloadJob, DownloadOrchestrator, FailureType, JobState, RetryDecision,
    RetryPolicy, TransferConfig, TransferError, classify_api_error,
};
