//! Download orchestrator: bounded-concurrency batch execution.
//!
//! One batch runs at a time process-wide, serialized by an atomic flag -
//! the one true mutex in the system, distinct from the credential refresh
//! lock. Content jobs start in submission order through a semaphore;
//! cancellation is cooperative and checked before each dequeue, so
//! in-flight transfers finish but nothing new starts.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use crate::api::ContentApi;
use crate::auth::CredentialManager;
use crate::catalog::CourseRecord;
use crate::host::{FileSink, KvStore};
use crate::limiter::{Priority, RateLimiter, parse_retry_after};

use super::error::JobError;
use super::filename::{NameRegistry, sanitize_filename};
use super::job::{ContentSource, DownloadJob, JobState, LinkEntry, build_jobs, render_link_manifest};
use super::progress::{BatchProgress, ProgressTracker};
use super::retry::{FailureType, RetryDecision, RetryPolicy, classify_api_error};
use super::TransferError;

/// Minimum allowed concurrency value.
const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
const MAX_CONCURRENCY: usize = 16;

/// Default number of simultaneous in-flight transfers.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Filename of the synthesized link-manifest job.
const LINK_MANIFEST_NAME: &str = "links.md";

/// Tunable orchestrator constants.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Maximum simultaneous in-flight transfers (1-16).
    pub concurrency: usize,
    /// Retry policy applied per job.
    pub retry_policy: RetryPolicy,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// Executes deduplicated, bounded-concurrency, retryable, cancellable
/// download batches with durable progress.
///
/// Batch state machine: `idle -> running -> (completed | cancelled)`. A
/// submission while running is rejected immediately, not queued.
pub struct DownloadOrchestrator {
    limiter: Arc<RateLimiter>,
    credentials: Arc<CredentialManager>,
    content: Arc<dyn ContentApi>,
    sink: Arc<dyn FileSink>,
    store: Arc<dyn KvStore>,
    retry_policy: RetryPolicy,
    concurrency: usize,
    batch_active: AtomicBool,
    cancelled: AtomicBool,
    progress: ProgressTracker,
}

impl DownloadOrchestrator {
    /// Creates an orchestrator over the given collaborators.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidConcurrency`] if the configured
    /// concurrency is outside 1-16.
    pub fn new(
        limiter: Arc<RateLimiter>,
        credentials: Arc<CredentialManager>,
        content: Arc<dyn ContentApi>,
        sink: Arc<dyn FileSink>,
        store: Arc<dyn KvStore>,
        config: TransferConfig,
    ) -> Result<Self, TransferError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&config.concurrency) {
            return Err(TransferError::InvalidConcurrency {
                value: config.concurrency,
            });
        }
        debug!(
            concurrency = config.concurrency,
            max_attempts = config.retry_policy.max_attempts(),
            "creating download orchestrator"
        );
        Ok(Self {
            limiter,
            credentials,
            content,
            sink,
            progress: ProgressTracker::new(Arc::clone(&store)),
            store,
            retry_policy: config.retry_policy,
            concurrency: config.concurrency,
            batch_active: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
        })
    }

    /// Submits a download batch and returns immediately; the batch runs in
    /// a spawned task.
    ///
    /// Builds the job list from `records`, keeping attachments whose
    /// identifier is in `requested_ids` and collapsing duplicates. Files
    /// are saved under `folder`.
    ///
    /// # Errors
    ///
    /// - [`TransferError::BatchActive`] - another batch is running
    /// - [`TransferError::EmptySelection`] - `requested_ids` is empty
    /// - [`TransferError::NoMatches`] - nothing matched the catalog
    /// - [`TransferError::Credential`] - no valid credential could be
    ///   obtained; the batch never started
    #[instrument(skip(self, records, requested_ids), fields(requested = requested_ids.len()))]
    pub async fn submit(
        self: &Arc<Self>,
        records: &[CourseRecord],
        requested_ids: &HashSet<String>,
        folder: &str,
    ) -> Result<(), TransferError> {
        if self.batch_active.swap(true, Ordering::SeqCst) {
            return Err(TransferError::BatchActive);
        }

        match self.prepare(records, requested_ids).await {
            Ok((jobs, links)) => {
                self.cancelled.store(false, Ordering::SeqCst);
                let total = jobs.len() + usize::from(!links.is_empty());
                self.progress.reset(total).await;

                let this = Arc::clone(self);
                let folder = PathBuf::from(folder);
                tokio::spawn(async move {
                    this.run_batch(jobs, links, folder).await;
                });
                Ok(())
            }
            Err(error) => {
                // Failed to start: release the running flag so a corrected
                // submission can proceed.
                self.batch_active.store(false, Ordering::SeqCst);
                Err(error)
            }
        }
    }

    async fn prepare(
        &self,
        records: &[CourseRecord],
        requested_ids: &HashSet<String>,
    ) -> Result<(Vec<DownloadJob>, Vec<LinkEntry>), TransferError> {
        if requested_ids.is_empty() {
            return Err(TransferError::EmptySelection);
        }
        let (jobs, links) = build_jobs(records, requested_ids);
        if jobs.is_empty() && links.is_empty() {
            return Err(TransferError::NoMatches);
        }
        self.credentials.ensure_valid_for_batch().await?;
        Ok((jobs, links))
    }

    async fn run_batch(
        self: Arc<Self>,
        jobs: Vec<DownloadJob>,
        links: Vec<LinkEntry>,
        folder: PathBuf,
    ) {
        info!(
            jobs = jobs.len(),
            links = links.len(),
            folder = %folder.display(),
            "starting download batch"
        );
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut names = NameRegistry::new();
        let mut handles = Vec::new();

        for mut job in jobs {
            // Cooperative cancellation, checked before each dequeue;
            // in-flight transfers are allowed to finish.
            if self.cancelled.load(Ordering::SeqCst) {
                info!("batch cancelled, no further jobs dequeued");
                break;
            }

            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                warn!("semaphore closed unexpectedly");
                break;
            };
            // A cancel may have landed while waiting for a permit.
            if self.cancelled.load(Ordering::SeqCst) {
                info!("batch cancelled, no further jobs dequeued");
                break;
            }

            let path = folder.join(names.claim(&job_file_name(&job)));
            let this = Arc::clone(&self);
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                this.progress.record_started(&job.display_name).await;
                job.state = JobState::Active;
                match this.run_job(&mut job, &path).await {
                    Ok(()) => {
                        job.state = JobState::Succeeded;
                        info!(item_id = %job.item_id, path = %path.display(), "download completed");
                        this.progress.record_completed().await;
                    }
                    Err(error) => {
                        job.state = JobState::Failed;
                        warn!(
                            item_id = %job.item_id,
                            attempts = job.attempts,
                            %error,
                            "download failed"
                        );
                        this.progress.record_failed().await;
                    }
                }
            }));
        }

        for handle in handles {
            // Task panics are logged but do not fail the batch.
            if let Err(error) = handle.await {
                warn!(%error, "download task panicked");
            }
        }

        if !links.is_empty() && !self.cancelled.load(Ordering::SeqCst) {
            self.save_link_manifest(&links, &folder).await;
        }

        self.progress.finish().await;
        self.batch_active.store(false, Ordering::SeqCst);

        let progress = self.progress.snapshot();
        info!(
            completed = progress.completed,
            failed = progress.failed,
            total = progress.total,
            "batch finished"
        );
    }

    /// Fetches one job's bytes with retry and writes them to `path`.
    async fn run_job(&self, job: &mut DownloadJob, path: &Path) -> Result<(), JobError> {
        loop {
            job.attempts += 1;
            debug!(item_id = %job.item_id, attempt = job.attempts, "attempting download");

            self.limiter.acquire(Priority::Normal).await;
            let credential = self.credentials.get_token(false).await?;

            let fetched = match job.source {
                ContentSource::Direct => {
                    self.content.fetch_content(&job.item_id, &credential).await
                }
                ContentSource::Export(format) => {
                    self.content
                        .convert_and_fetch(&job.item_id, format, &credential)
                        .await
                }
            };

            match fetched {
                Ok(bytes) => {
                    self.limiter.clear_backoff();
                    self.sink.save(path, &bytes).await?;
                    return Ok(());
                }
                Err(error) => {
                    let failure = classify_api_error(&error);
                    let retry_after_delay = if failure == FailureType::Throttled {
                        let delay = error.retry_after().and_then(parse_retry_after);
                        self.limiter.report_429(error.retry_after());
                        delay
                    } else {
                        None
                    };

                    match self.retry_policy.should_retry(failure, job.attempts) {
                        RetryDecision::Retry { delay, attempt } => {
                            // The server-mandated delay wins over backoff.
                            let delay = retry_after_delay.unwrap_or(delay);
                            info!(
                                item_id = %job.item_id,
                                attempt,
                                max_attempts = self.retry_policy.max_attempts(),
                                delay_ms = delay.as_millis(),
                                using_retry_after = retry_after_delay.is_some(),
                                %error,
                                "retrying download"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        RetryDecision::DoNotRetry { reason } => {
                            debug!(item_id = %job.item_id, %reason, "not retrying download");
                            return Err(JobError::Api {
                                source: error,
                                attempts: job.attempts,
                            });
                        }
                    }
                }
            }
        }
    }

    async fn save_link_manifest(&self, links: &[LinkEntry], folder: &Path) {
        self.progress.record_started(LINK_MANIFEST_NAME).await;
        let manifest = render_link_manifest(links);
        match self
            .sink
            .save(&folder.join(LINK_MANIFEST_NAME), manifest.as_bytes())
            .await
        {
            Ok(()) => {
                info!(links = links.len(), "saved link manifest");
                self.progress.record_completed().await;
            }
            Err(error) => {
                warn!(%error, "failed to save link manifest");
                self.progress.record_failed().await;
            }
        }
    }

    /// Requests cancellation of the running batch.
    ///
    /// Cooperative: checked before each dequeue, so transfers already in
    /// flight finish. Progress remains queryable afterwards.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        debug!("batch cancellation requested");
    }

    /// Returns an immutable progress snapshot; safe to poll frequently.
    #[must_use]
    pub fn progress(&self) -> BatchProgress {
        self.progress.snapshot()
    }

    /// Returns whether a batch is currently running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.batch_active.load(Ordering::SeqCst)
    }

    /// Loads the progress snapshot persisted by the most recent batch,
    /// including one from a previous process incarnation.
    pub async fn persisted_progress(&self) -> Option<BatchProgress> {
        ProgressTracker::load(self.store.as_ref()).await
    }
}

/// Resolves the file name a job saves under: the sanitized display name,
/// with the export extension appended when format conversion applies.
fn job_file_name(job: &DownloadJob) -> String {
    let base = sanitize_filename(&job.display_name);
    match job.source {
        ContentSource::Export(format)
            if !base.to_lowercase().ends_with(format.extension()) =>
        {
            format!("{base}{}", format.extension())
        }
        _ => base,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::catalog::{Attachment, ExportFormat};

    fn direct_job(id: &str, name: &str) -> DownloadJob {
        DownloadJob {
            item_id: id.to_string(),
            display_name: name.to_string(),
            source: ContentSource::Direct,
            state: JobState::Pending,
            attempts: 0,
        }
    }

    #[test]
    fn test_job_file_name_sanitizes_display_name() {
        let job = direct_job("f1", "week 1: intro/outline");
        assert_eq!(job_file_name(&job), "week 1_ intro_outline");
    }

    #[test]
    fn test_job_file_name_appends_export_extension() {
        let mut job = direct_job("doc1", "Essay");
        job.source = ContentSource::Export(ExportFormat::Pdf);
        assert_eq!(job_file_name(&job), "Essay.pdf");

        // Already-suffixed names are left alone.
        job.display_name = "Essay.pdf".to_string();
        assert_eq!(job_file_name(&job), "Essay.pdf");
    }

    #[test]
    fn test_default_config_matches_documented_limits() {
        let config = TransferConfig::default();
        assert_eq!(config.concurrency, 5);
        assert_eq!(config.retry_policy.max_attempts(), 3);
    }

    #[test]
    fn test_attachment_variants_are_exhaustively_split() {
        // Guard: every non-file variant must be link-like for the manifest.
        let link = Attachment::Link {
            url: "u".to_string(),
            title: "t".to_string(),
        };
        assert!(!link.is_content());
    }
}
