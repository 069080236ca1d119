//! Download batch orchestration.
//!
//! Given a cached catalog and a set of requested item identifiers, this
//! module executes a deduplicated, bounded-concurrency, retryable,
//! cancellable download batch, persisting progress so a restarted process
//! can report accurate status.
//!
//! # Example
//!
//! ```no_run
//! use std::collections::HashSet;
//! use std::sync::Arc;
//! use classfetch_core::{
//!     CredentialManager, DirFileSink, DownloadOrchestrator, HttpApiClient, MemoryKvStore,
//!     RateLimiter, TransferConfig,
//! };
//!
//! # async fn example(
//! #     client: HttpApiClient,
//! #     credentials: Arc<CredentialManager>,
//! #     records: Vec<classfetch_core::CourseRecord>,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryKvStore::new());
//! let orchestrator = Arc::new(DownloadOrchestrator::new(
//!     Arc::new(RateLimiter::default()),
//!     credentials,
//!     Arc::new(client.clone()),
//!     Arc::new(DirFileSink::new("./downloads")),
//!     store,
//!     TransferConfig::default(),
//! )?);
//!
//! let requested: HashSet<String> = ["file-1".to_string()].into_iter().collect();
//! orchestrator.submit(&records, &requested, "course-2026-08").await?;
//! while orchestrator.progress().active {
//!     tokio::time::sleep(std::time::Duration::from_millis(200)).await;
//! }
//! # Ok(())
//! # }
//! ```

mod engine;
mod error;
mod filename;
mod job;
mod progress;
mod retry;

pub use engine::{DEFAULT_CONCURRENCY, DownloadOrchestrator, TransferConfig};
pub use error::TransferError;
pub use job::{ContentSource, DownloadJob, JobState, LinkEntry, build_jobs, render_link_manifest};
pub use progress::BatchProgress;
pub use retry::{
    DEFAULT_MAX_ATTEMPTS, FailureType, RetryDecision, RetryPolicy, classify_api_error,
};
