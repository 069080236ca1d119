//! Cached catalog fetching.
//!
//! The fetch path before any download batch: serve the collection from the
//! durable cache when fresh (a hit counts as use and touches recency),
//! otherwise make one rate-limited authenticated catalog call, feed the
//! outcome back to the limiter, and cache the snapshot.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::api::{ApiError, CatalogApi};
use crate::auth::{CredentialError, CredentialManager};
use crate::cache::{CacheError, RecordCache};
use crate::limiter::{Priority, RateLimiter};

use super::{CollectionId, CollectionSnapshot};

/// Errors surfaced by catalog fetching.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The catalog API call failed.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The record cache failed.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// No credential could be obtained.
    #[error(transparent)]
    Credential(#[from] CredentialError),
}

/// Fetches collections through the cache, the rate limiter, and the
/// credential manager.
pub struct CatalogFetcher {
    api: Arc<dyn CatalogApi>,
    cache: Arc<RecordCache>,
    limiter: Arc<RateLimiter>,
    credentials: Arc<CredentialManager>,
}

impl CatalogFetcher {
    /// Creates a fetcher over the given collaborators.
    #[must_use]
    pub fn new(
        api: Arc<dyn CatalogApi>,
        cache: Arc<RecordCache>,
        limiter: Arc<RateLimiter>,
        credentials: Arc<CredentialManager>,
    ) -> Self {
        Self {
            api,
            cache,
            limiter,
            credentials,
        }
    }

    /// Returns the collection snapshot, from cache when fresh.
    ///
    /// On a miss: acquires a high-priority limiter permit, authorizes, and
    /// calls the catalog API; quota responses are reported to the limiter
    /// and successes clear any backoff window before the snapshot is
    /// cached.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] when the API call, the cache, or credential
    /// acquisition fails.
    #[instrument(skip(self), fields(collection = %collection))]
    pub async fn fetch(
        &self,
        collection: &CollectionId,
        interactive: bool,
    ) -> Result<CollectionSnapshot, FetchError> {
        if let Some(payload) = self.cache.get(collection).await? {
            match serde_json::from_value::<CollectionSnapshot>(payload) {
                Ok(snapshot) => {
                    // A served read counts as use.
                    self.cache.touch(collection).await?;
                    debug!("catalog served from cache");
                    return Ok(snapshot);
                }
                Err(error) => {
                    warn!(%error, "cached snapshot is undecodable, refetching");
                    self.cache.clear(collection).await?;
                }
            }
        }

        self.limiter.acquire(Priority::High).await;
        let credential = self.credentials.get_token(interactive).await?;
        match self.api.fetch_collection(collection, &credential).await {
            Ok(snapshot) => {
                self.limiter.clear_backoff();
                let value = serde_json::to_value(&snapshot).map_err(CacheError::serialize)?;
                self.cache.set(collection, value).await?;
                info!(records = snapshot.records.len(), "catalog fetched and cached");
                Ok(snapshot)
            }
            Err(error) => {
                if let ApiError::Status {
                    status: 429,
                    retry_after,
                    ..
                } = &error
                {
                    self.limiter.report_429(retry_after.as_deref());
                }
                Err(FetchError::Api(error))
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::auth::{AuthConfig, ProviderError, TokenProvider};
    use crate::cache::CacheConfig;
    use crate::catalog::CourseRecord;
    use crate::host::{KvStore, MemoryKvStore};
    use crate::limiter::LimiterConfig;

    use super::*;

    struct FakeCatalog {
        calls: AtomicUsize,
        status: Option<(u16, Option<String>)>,
    }

    impl FakeCatalog {
        fn ok() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                status: None,
            }
        }

        fn failing(status: u16, retry_after: Option<&str>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                status: Some((status, retry_after.map(str::to_string))),
            }
        }
    }

    #[async_trait]
    impl CatalogApi for FakeCatalog {
        async fn fetch_collection(
            &self,
            collection: &CollectionId,
            _credential: &str,
        ) -> Result<CollectionSnapshot, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some((status, retry_after)) = &self.status {
                return Err(ApiError::status_with_retry_after(
                    "https://catalog.example.com",
                    *status,
                    retry_after.clone(),
                ));
            }
            Ok(CollectionSnapshot {
                collection: collection.clone(),
                records: vec![CourseRecord {
                    id: "r1".to_string(),
                    title: "Week 1".to_string(),
                    attachments: Vec::new(),
                }],
                announcements: Vec::new(),
            })
        }
    }

    struct StaticProvider;

    #[async_trait]
    impl TokenProvider for StaticProvider {
        async fn request_token(&self, _interactive: bool) -> Result<String, ProviderError> {
            Ok("token".to_string())
        }

        async fn revoke_token(&self, _token: &str) -> Result<(), ProviderError> {
            Ok(())
        }

        async fn remaining_lifetime(&self, _token: &str) -> Result<Duration, ProviderError> {
            Ok(Duration::from_secs(3600))
        }
    }

    fn fetcher(api: Arc<FakeCatalog>) -> (CatalogFetcher, Arc<RecordCache>, Arc<RateLimiter>) {
        let store = Arc::new(MemoryKvStore::new()) as Arc<dyn KvStore>;
        let cache = Arc::new(RecordCache::new(
            Arc::clone(&store),
            CacheConfig::default(),
        ));
        let limiter = Arc::new(RateLimiter::new(LimiterConfig {
            capacity: 10.0,
            refill_per_sec: 10.0,
            default_backoff: Duration::from_secs(60),
        }));
        let credentials = Arc::new(CredentialManager::new(
            store,
            Arc::new(StaticProvider),
            AuthConfig::default(),
        ));
        let fetcher = CatalogFetcher::new(
            api,
            Arc::clone(&cache),
            Arc::clone(&limiter),
            credentials,
        );
        (fetcher, cache, limiter)
    }

    #[tokio::test(start_paused = true)]
    async fn test_miss_fetches_and_caches_then_hit_serves_locally() {
        let api = Arc::new(FakeCatalog::ok());
        let (fetcher, cache, _) = fetcher(Arc::clone(&api));
        let collection = CollectionId::new("c1");

        let first = fetcher.fetch(&collection, false).await.unwrap();
        assert_eq!(first.records.len(), 1);
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);

        let second = fetcher.fetch(&collection, false).await.unwrap();
        assert_eq!(second, first);
        // Served from cache, no second API call; the hit touched recency.
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().await.unwrap().access_counts["c1"], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_response_installs_backoff_window() {
        let api = Arc::new(FakeCatalog::failing(429, Some("120")));
        let (fetcher, _, limiter) = fetcher(Arc::clone(&api));

        let error = fetcher.fetch(&CollectionId::new("c1"), false).await.unwrap_err();
        assert!(matches!(error, FetchError::Api(ApiError::Status { status: 429, .. })));

        let remaining = limiter.stats().backoff_remaining.unwrap();
        assert!(remaining > Duration::from_secs(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_clears_existing_backoff() {
        let api = Arc::new(FakeCatalog::ok());
        let (fetcher, _, limiter) = fetcher(Arc::clone(&api));

        limiter.report_429(Some("0"));
        fetcher.fetch(&CollectionId::new("c1"), false).await.unwrap();
        assert!(limiter.stats().backoff_remaining.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_status_propagates_without_caching() {
        let api = Arc::new(FakeCatalog::failing(404, None));
        let (fetcher, cache, _) = fetcher(Arc::clone(&api));

        let error = fetcher.fetch(&CollectionId::new("c1"), false).await.unwrap_err();
        assert!(matches!(error, FetchError::Api(ApiError::Status { status: 404, .. })));
        assert_eq!(cache.stats().await.unwrap().entries, 0);
    }
}
