//! Integration tests for the download orchestrator.
//!
//! These drive full batches through the public API against scripted
//! content-service and credential-provider fakes.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use classfetch_core::{
    ApiError, Attachment, AuthConfig, ContentApi, CourseRecord, CredentialManager,
    DownloadOrchestrator, ExportFormat, KvStore, LimiterConfig, MemoryFileSink, MemoryKvStore,
    Priority, ProviderError, RateLimiter, RetryPolicy, TokenProvider, TransferConfig,
    TransferError,
};

// ==================== Fakes ====================

struct StaticProvider {
    fail: bool,
}

#[async_trait]
impl TokenProvider for StaticProvider {
    async fn request_token(&self, _interactive: bool) -> Result<String, ProviderError> {
        if self.fail {
            return Err(ProviderError::Cancelled);
        }
        Ok("token".to_string())
    }

    async fn revoke_token(&self, _token: &str) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn remaining_lifetime(&self, _token: &str) -> Result<Duration, ProviderError> {
        Ok(Duration::from_secs(3600))
    }
}

/// Scripted per-item behavior for the content fake.
#[derive(Clone)]
enum Behavior {
    Ok(Vec<u8>),
    Status(u16),
    Timeout,
    /// Sleeps before succeeding, to keep transfers in flight.
    Slow(Duration),
}

#[derive(Default)]
struct FakeContent {
    behaviors: Mutex<HashMap<String, Behavior>>,
    fetch_calls: Mutex<HashMap<String, u32>>,
    exports: Mutex<Vec<(String, ExportFormat)>>,
}

impl FakeContent {
    fn with(self, item_id: &str, behavior: Behavior) -> Self {
        self.behaviors
            .lock()
            .unwrap()
            .insert(item_id.to_string(), behavior);
        self
    }

    fn calls(&self, item_id: &str) -> u32 {
        *self.fetch_calls.lock().unwrap().get(item_id).unwrap_or(&0)
    }

    async fn run(&self, item_id: &str) -> Result<Vec<u8>, ApiError> {
        *self
            .fetch_calls
            .lock()
            .unwrap()
            .entry(item_id.to_string())
            .or_insert(0) += 1;
        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(item_id)
            .cloned()
            .unwrap_or_else(|| Behavior::Ok(b"bytes".to_vec()));
        match behavior {
            Behavior::Ok(bytes) => Ok(bytes),
            Behavior::Status(status) => Err(ApiError::status(
                format!("https://content.example.com/files/{item_id}"),
                status,
            )),
            Behavior::Timeout => Err(ApiError::timeout(format!(
                "https://content.example.com/files/{item_id}"
            ))),
            Behavior::Slow(delay) => {
                tokio::time::sleep(delay).await;
                Ok(b"slow-bytes".to_vec())
            }
        }
    }
}

#[async_trait]
impl ContentApi for FakeContent {
    async fn fetch_content(&self, item_id: &str, _credential: &str) -> Result<Vec<u8>, ApiError> {
        self.run(item_id).await
    }

    async fn convert_and_fetch(
        &self,
        item_id: &str,
        format: ExportFormat,
        _credential: &str,
    ) -> Result<Vec<u8>, ApiError> {
        self.exports
            .lock()
            .unwrap()
            .push((item_id.to_string(), format));
        self.run(item_id).await
    }
}

// ==================== Helpers ====================

fn file(id: &str, title: &str) -> Attachment {
    Attachment::File {
        file_id: id.to_string(),
        title: title.to_string(),
        export: None,
    }
}

fn record(id: &str, attachments: Vec<Attachment>) -> CourseRecord {
    CourseRecord {
        id: id.to_string(),
        title: format!("record {id}"),
        attachments,
    }
}

fn requested(ids: &[&str]) -> HashSet<String> {
    ids.iter().map(|id| (*id).to_string()).collect()
}

struct Harness {
    orchestrator: Arc<DownloadOrchestrator>,
    content: Arc<FakeContent>,
    sink: Arc<MemoryFileSink>,
    store: Arc<MemoryKvStore>,
}

fn harness(content: FakeContent) -> Harness {
    harness_with(content, false, TransferConfig::default())
}

fn harness_with(content: FakeContent, fail_credentials: bool, config: TransferConfig) -> Harness {
    let store = Arc::new(MemoryKvStore::new());
    let content = Arc::new(content);
    let sink = Arc::new(MemoryFileSink::new());
    let credentials = Arc::new(CredentialManager::new(
        Arc::clone(&store) as Arc<dyn KvStore>,
        Arc::new(StaticProvider {
            fail: fail_credentials,
        }),
        AuthConfig::default(),
    ));
    let limiter = Arc::new(RateLimiter::new(LimiterConfig {
        capacity: 1000.0,
        refill_per_sec: 1000.0,
        default_backoff: Duration::from_secs(1),
    }));
    let orchestrator = Arc::new(
        DownloadOrchestrator::new(
            limiter,
            credentials,
            Arc::clone(&content) as Arc<dyn ContentApi>,
            Arc::clone(&sink) as _,
            Arc::clone(&store) as Arc<dyn KvStore>,
            config,
        )
        .unwrap(),
    );
    Harness {
        orchestrator,
        content,
        sink,
        store,
    }
}

async fn wait_until_idle(orchestrator: &DownloadOrchestrator) {
    while orchestrator.is_active() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

// ==================== Submission Validation ====================

#[tokio::test(start_paused = true)]
async fn test_submit_rejects_empty_selection() {
    let h = harness(FakeContent::default());
    let records = vec![record("r1", vec![file("f1", "Slides")])];

    let error = h
        .orchestrator
        .submit(&records, &HashSet::new(), "batch")
        .await
        .unwrap_err();
    assert!(matches!(error, TransferError::EmptySelection));
    assert!(!h.orchestrator.is_active());
}

#[tokio::test(start_paused = true)]
async fn test_submit_rejects_unmatched_selection() {
    let h = harness(FakeContent::default());
    let records = vec![record("r1", vec![file("f1", "Slides")])];

    let error = h
        .orchestrator
        .submit(&records, &requested(&["ghost"]), "batch")
        .await
        .unwrap_err();
    assert!(matches!(error, TransferError::NoMatches));
}

#[tokio::test(start_paused = true)]
async fn test_submit_rejects_second_batch_while_running() {
    let content = FakeContent::default().with("f1", Behavior::Slow(Duration::from_secs(10)));
    let h = harness(content);
    let records = vec![record("r1", vec![file("f1", "Slides")])];

    h.orchestrator
        .submit(&records, &requested(&["f1"]), "batch")
        .await
        .unwrap();
    let error = h
        .orchestrator
        .submit(&records, &requested(&["f1"]), "batch")
        .await
        .unwrap_err();
    assert!(matches!(error, TransferError::BatchActive));

    wait_until_idle(&h.orchestrator).await;
}

#[tokio::test(start_paused = true)]
async fn test_submit_with_failing_credentials_never_starts() {
    let h = harness_with(FakeContent::default(), true, TransferConfig::default());
    let records = vec![record("r1", vec![file("f1", "Slides")])];

    let error = h
        .orchestrator
        .submit(&records, &requested(&["f1"]), "batch")
        .await
        .unwrap_err();
    assert!(matches!(error, TransferError::Credential(_)));

    // Failed-to-start, not partially-completed: nothing saved, flag clear.
    assert!(h.sink.is_empty());
    assert!(!h.orchestrator.is_active());
    assert_eq!(h.content.calls("f1"), 0);
}

// ==================== Execution ====================

#[tokio::test(start_paused = true)]
async fn test_batch_downloads_and_reports_progress() {
    let h = harness(FakeContent::default());
    let records = vec![record(
        "r1",
        vec![file("f1", "Slides.pdf"), file("f2", "Notes.pdf")],
    )];

    h.orchestrator
        .submit(&records, &requested(&["f1", "f2"]), "batch")
        .await
        .unwrap();
    wait_until_idle(&h.orchestrator).await;

    let progress = h.orchestrator.progress();
    assert_eq!(progress.total, 2);
    assert_eq!(progress.completed, 2);
    assert_eq!(progress.failed, 0);
    assert!(!progress.active);

    assert_eq!(
        h.sink.saved(Path::new("batch/Slides.pdf")).unwrap(),
        b"bytes"
    );
    assert!(h.sink.saved(Path::new("batch/Notes.pdf")).is_some());
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_attachment_downloaded_once() {
    let h = harness(FakeContent::default());
    // Attachment X referenced from two different parent records.
    let records = vec![
        record("r1", vec![file("x", "Shared.pdf")]),
        record("r2", vec![file("x", "Shared.pdf")]),
    ];

    h.orchestrator
        .submit(&records, &requested(&["x"]), "batch")
        .await
        .unwrap();
    wait_until_idle(&h.orchestrator).await;

    assert_eq!(h.content.calls("x"), 1);
    assert_eq!(h.orchestrator.progress().total, 1);
    assert_eq!(h.sink.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_filename_collisions_get_counter_suffix() {
    let h = harness(FakeContent::default());
    let records = vec![record(
        "r1",
        vec![file("f1", "notes.pdf"), file("f2", "notes.pdf")],
    )];

    h.orchestrator
        .submit(&records, &requested(&["f1", "f2"]), "batch")
        .await
        .unwrap();
    wait_until_idle(&h.orchestrator).await;

    assert!(h.sink.saved(Path::new("batch/notes.pdf")).is_some());
    assert!(h.sink.saved(Path::new("batch/notes (1).pdf")).is_some());
}

#[tokio::test(start_paused = true)]
async fn test_export_items_convert_then_fetch() {
    let content = FakeContent::default();
    let h = harness(content);
    let records = vec![record(
        "r1",
        vec![Attachment::File {
            file_id: "doc1".to_string(),
            title: "Essay".to_string(),
            export: Some(ExportFormat::Pdf),
        }],
    )];

    h.orchestrator
        .submit(&records, &requested(&["doc1"]), "batch")
        .await
        .unwrap();
    wait_until_idle(&h.orchestrator).await;

    let exports = h.content.exports.lock().unwrap().clone();
    assert_eq!(exports, vec![("doc1".to_string(), ExportFormat::Pdf)]);
    assert!(h.sink.saved(Path::new("batch/Essay.pdf")).is_some());
}

#[tokio::test(start_paused = true)]
async fn test_link_items_aggregate_into_manifest() {
    let h = harness(FakeContent::default());
    let records = vec![record(
        "r1",
        vec![
            file("f1", "Slides.pdf"),
            Attachment::Link {
                url: "https://example.com/reading".to_string(),
                title: "Reading".to_string(),
            },
            Attachment::Video {
                url: "https://video.example.com/lecture".to_string(),
                title: "Lecture".to_string(),
            },
        ],
    )];
    let ids = requested(&[
        "f1",
        "https://example.com/reading",
        "https://video.example.com/lecture",
    ]);

    h.orchestrator.submit(&records, &ids, "batch").await.unwrap();
    wait_until_idle(&h.orchestrator).await;

    // One content job plus one synthesized manifest job.
    let progress = h.orchestrator.progress();
    assert_eq!(progress.total, 2);
    assert_eq!(progress.completed, 2);

    let manifest = h.sink.saved(Path::new("batch/links.md")).unwrap();
    let manifest = String::from_utf8(manifest).unwrap();
    assert!(manifest.contains("[Reading](https://example.com/reading)"));
    assert!(manifest.contains("[Lecture](https://video.example.com/lecture)"));
}

// ==================== Failure Handling ====================

#[tokio::test(start_paused = true)]
async fn test_forbidden_item_fails_after_exactly_one_attempt() {
    let content = FakeContent::default()
        .with("denied", Behavior::Status(403))
        .with("ok", Behavior::Ok(b"fine".to_vec()));
    let h = harness(content);
    let records = vec![record("r1", vec![file("denied", "Locked"), file("ok", "Open")])];

    h.orchestrator
        .submit(&records, &requested(&["denied", "ok"]), "batch")
        .await
        .unwrap();
    wait_until_idle(&h.orchestrator).await;

    assert_eq!(h.content.calls("denied"), 1);
    let progress = h.orchestrator.progress();
    assert_eq!(progress.failed, 1);
    assert_eq!(progress.completed, 1);
    assert!(!progress.active);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_item_retried_three_times_then_failed() {
    let content = FakeContent::default().with("flaky", Behavior::Timeout);
    let h = harness(content);
    let records = vec![record("r1", vec![file("flaky", "Flaky")])];

    h.orchestrator
        .submit(&records, &requested(&["flaky"]), "batch")
        .await
        .unwrap();
    wait_until_idle(&h.orchestrator).await;

    assert_eq!(h.content.calls("flaky"), 3);
    assert_eq!(h.orchestrator.progress().failed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_partial_failure_still_completes_batch() {
    let content = FakeContent::default().with("gone", Behavior::Status(404));
    let h = harness(content);
    let records = vec![record(
        "r1",
        vec![file("gone", "Gone"), file("a", "A"), file("b", "B")],
    )];

    h.orchestrator
        .submit(&records, &requested(&["gone", "a", "b"]), "batch")
        .await
        .unwrap();
    wait_until_idle(&h.orchestrator).await;

    let progress = h.orchestrator.progress();
    assert_eq!(progress.total, 3);
    assert_eq!(progress.completed, 2);
    assert_eq!(progress.failed, 1);
}

// ==================== Cancellation ====================

#[tokio::test(start_paused = true)]
async fn test_cancel_stops_dequeuing_but_finishes_in_flight() {
    let mut content = FakeContent::default();
    for i in 0..13 {
        content = content.with(&format!("f{i}"), Behavior::Slow(Duration::from_secs(5)));
    }
    let h = harness_with(
        content,
        false,
        TransferConfig {
            concurrency: 3,
            retry_policy: RetryPolicy::default(),
        },
    );
    let attachments: Vec<Attachment> = (0..13)
        .map(|i| file(&format!("f{i}"), &format!("File {i}")))
        .collect();
    let ids: Vec<String> = (0..13).map(|i| format!("f{i}")).collect();
    let records = vec![record("r1", attachments)];
    let ids: HashSet<String> = ids.into_iter().collect();

    h.orchestrator.submit(&records, &ids, "batch").await.unwrap();
    // Let the first wave of transfers start, then cancel.
    tokio::time::sleep(Duration::from_millis(100)).await;
    h.orchestrator.cancel();
    wait_until_idle(&h.orchestrator).await;

    let progress = h.orchestrator.progress();
    assert!(!progress.active);
    // The three in-flight transfers finished; nothing new was dequeued
    // after the cancellation point.
    let settled = progress.completed + progress.failed;
    assert_eq!(settled, 3, "only in-flight transfers may settle");
}

// ==================== Durable Progress ====================

#[tokio::test(start_paused = true)]
async fn test_progress_persists_for_restarted_process() {
    let h = harness(FakeContent::default());
    let records = vec![record("r1", vec![file("f1", "Slides.pdf")])];

    h.orchestrator
        .submit(&records, &requested(&["f1"]), "batch")
        .await
        .unwrap();
    wait_until_idle(&h.orchestrator).await;

    // A fresh orchestrator over the same store sees the finished batch.
    let revived = harness_from_store(Arc::clone(&h.store));
    let persisted = revived.persisted_progress().await.unwrap();
    assert_eq!(persisted.total, 1);
    assert_eq!(persisted.completed, 1);
    assert!(!persisted.active);
}

fn harness_from_store(store: Arc<MemoryKvStore>) -> Arc<DownloadOrchestrator> {
    let credentials = Arc::new(CredentialManager::new(
        Arc::clone(&store) as Arc<dyn KvStore>,
        Arc::new(StaticProvider { fail: false }),
        AuthConfig::default(),
    ));
    Arc::new(
        DownloadOrchestrator::new(
            Arc::new(RateLimiter::default()),
            credentials,
            Arc::new(FakeContent::default()) as Arc<dyn ContentApi>,
            Arc::new(MemoryFileSink::new()) as _,
            store as Arc<dyn KvStore>,
            TransferConfig::default(),
        )
        .unwrap(),
    )
}

// ==================== Rate Limiter Coupling ====================

#[tokio::test(start_paused = true)]
async fn test_batch_respects_limiter_priority_contract() {
    // A sanity check that batch jobs go through the shared limiter: with a
    // one-token bucket and slow refill, two jobs cannot both start
    // immediately.
    let store = Arc::new(MemoryKvStore::new());
    let limiter = Arc::new(RateLimiter::new(LimiterConfig {
        capacity: 1.0,
        refill_per_sec: 1.0,
        default_backoff: Duration::from_secs(1),
    }));
    let content = Arc::new(FakeContent::default());
    let sink = Arc::new(MemoryFileSink::new());
    let credentials = Arc::new(CredentialManager::new(
        Arc::clone(&store) as Arc<dyn KvStore>,
        Arc::new(StaticProvider { fail: false }),
        AuthConfig::default(),
    ));
    let orchestrator = Arc::new(
        DownloadOrchestrator::new(
            Arc::clone(&limiter),
            credentials,
            Arc::clone(&content) as Arc<dyn ContentApi>,
            Arc::clone(&sink) as _,
            Arc::clone(&store) as Arc<dyn KvStore>,
            TransferConfig::default(),
        )
        .unwrap(),
    );

    let records = vec![record("r1", vec![file("f1", "A"), file("f2", "B")])];
    let start = tokio::time::Instant::now();
    orchestrator
        .submit(&records, &requested(&["f1", "f2"]), "batch")
        .await
        .unwrap();
    wait_until_idle(&orchestrator).await;

    assert_eq!(orchestrator.progress().completed, 2);
    // The second grant had to wait for a refilled token.
    assert!(start.elapsed() >= Duration::from_millis(900));

    // An external high-priority acquire still goes ahead of batch traffic.
    limiter.acquire(Priority::High).await;
}
