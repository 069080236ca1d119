//! Credential management.
//!
//! Supplies a valid bearer credential to every other component, refreshing
//! it proactively and resolving concurrent refresh attempts without
//! duplicate provider work. Refreshes are serialized through a durable
//! lock because the host process may be killed mid-refresh; a caller that
//! loses the lock race briefly waits and reuses the winner's result.

mod error;
mod lock;

pub use error::{CredentialError, ProviderError};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::host::{AlarmScheduler, KvStore};

use lock::RefreshLock;

const TOKEN_KEY: &str = "auth/token";
const REFRESH_ALARM: &str = "credential-refresh";

/// External credential provider, possibly prompting the user.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Requests a fresh bearer token; user-visible prompting is allowed
    /// only when `interactive` is true.
    async fn request_token(&self, interactive: bool) -> Result<String, ProviderError>;

    /// Revokes a previously issued token. Best-effort from the caller's
    /// perspective.
    async fn revoke_token(&self, token: &str) -> Result<(), ProviderError>;

    /// Returns the remaining lifetime the provider reports for `token`.
    async fn remaining_lifetime(&self, token: &str) -> Result<Duration, ProviderError>;
}

/// Tunable credential-management constants.
///
/// The proactive interval deliberately precedes the assumed lifetime so a
/// token is renewed before it can expire under a caller.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// How long an issued token is assumed to live.
    pub assumed_lifetime: Duration,
    /// Subtracted from the assumed lifetime when judging freshness.
    pub refresh_safety_buffer: Duration,
    /// Recurring proactive-refresh interval.
    pub proactive_interval: Duration,
    /// Age past which a refresh lock is considered abandoned.
    pub lock_stale_after: Duration,
    /// Total time an acquirer waits for the refresh lock.
    pub lock_wait_ceiling: Duration,
    /// Poll interval while waiting for the refresh lock.
    pub lock_poll_interval: Duration,
    /// How long a losing caller waits before reusing the winner's token.
    pub contention_grace: Duration,
    /// Minimum remaining lifetime required to start a download batch.
    pub min_batch_lifetime: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            assumed_lifetime: Duration::from_secs(60 * 60),
            refresh_safety_buffer: Duration::from_secs(5 * 60),
            proactive_interval: Duration::from_secs(50 * 60),
            lock_stale_after: Duration::from_secs(10),
            lock_wait_ceiling: Duration::from_secs(15),
            lock_poll_interval: Duration::from_millis(500),
            contention_grace: Duration::from_secs(2),
            min_batch_lifetime: Duration::from_secs(10 * 60),
        }
    }
}

/// Durable token record with its issuance timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TokenRecord {
    token: String,
    issued_at_ms: u64,
}

/// Supplies bearer credentials, renewing them proactively and serializing
/// refreshes across concurrent callers and process restarts.
pub struct CredentialManager {
    store: Arc<dyn KvStore>,
    provider: Arc<dyn TokenProvider>,
    lock: RefreshLock,
    config: AuthConfig,
}

impl CredentialManager {
    /// Creates a manager over the given store and provider.
    #[must_use]
    pub fn new(
        store: Arc<dyn KvStore>,
        provider: Arc<dyn TokenProvider>,
        config: AuthConfig,
    ) -> Self {
        let lock = RefreshLock::new(
            Arc::clone(&store),
            config.lock_stale_after,
            config.lock_wait_ceiling,
            config.lock_poll_interval,
        );
        Self {
            store,
            provider,
            lock,
            config,
        }
    }

    /// Returns a bearer token, reusing the cached one while it is believed
    /// unexpired.
    ///
    /// The heuristic: elapsed time since issuance must be under the assumed
    /// lifetime minus the safety buffer. Otherwise a fresh token is
    /// requested from the provider and persisted.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError`] when the provider or the durable store
    /// fails; provider failures keep their classification.
    #[instrument(skip(self))]
    pub async fn get_token(&self, interactive: bool) -> Result<String, CredentialError> {
        if let Some(record) = self.load_record().await? {
            let age_ms = now_ms().saturating_sub(record.issued_at_ms);
            let usable = self
                .config
                .assumed_lifetime
                .saturating_sub(self.config.refresh_safety_buffer);
            if u128::from(age_ms) < usable.as_millis() {
                return Ok(record.token);
            }
            debug!("cached credential past assumed lifetime, requesting fresh");
        }
        self.request_and_store(interactive).await
    }

    /// Forces a credential renewal.
    ///
    /// If another refresh is already in flight (here or in a concurrent
    /// process incarnation), waits briefly and returns the credential it
    /// produced instead of starting a redundant one.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError`] when the provider or the durable store
    /// fails.
    #[instrument(skip(self))]
    pub async fn refresh(&self, interactive: bool) -> Result<String, CredentialError> {
        let started_at_ms = now_ms();
        match self.lock.acquire().await? {
            None => {
                debug!("refresh lock contended, reusing in-flight refresh");
                tokio::time::sleep(self.config.contention_grace).await;
                if let Some(record) = self.load_record().await? {
                    return Ok(record.token);
                }
                // The in-flight refresh failed or was abandoned.
                self.request_and_store(interactive).await
            }
            Some(guard) => {
                let result = self.refresh_locked(interactive, started_at_ms).await;
                // The lock must come off on the error path too.
                if let Err(error) = self.lock.release(guard).await {
                    warn!(%error, "failed to release refresh lock");
                }
                result
            }
        }
    }

    async fn refresh_locked(
        &self,
        interactive: bool,
        started_at_ms: u64,
    ) -> Result<String, CredentialError> {
        if let Some(record) = self.load_record().await? {
            if record.issued_at_ms >= started_at_ms {
                debug!("credential was refreshed while waiting for the lock");
                return Ok(record.token);
            }
            // Best-effort revoke; failure does not abort the refresh.
            if let Err(error) = self.provider.revoke_token(&record.token).await {
                warn!(%error, "failed to revoke previous credential");
            }
        }
        self.request_and_store(interactive).await
    }

    /// Pre-flight check before a download batch: when the provider reports
    /// less than the configured minimum remaining lifetime, forces an
    /// interactive refresh so a long batch does not fail midway.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError`] when no valid credential can be
    /// obtained.
    #[instrument(skip(self))]
    pub async fn ensure_valid_for_batch(&self) -> Result<(), CredentialError> {
        let token = self.get_token(false).await?;
        let remaining = self.provider.remaining_lifetime(&token).await?;
        if remaining < self.config.min_batch_lifetime {
            info!(
                remaining_secs = remaining.as_secs(),
                "credential expiring soon, refreshing before batch"
            );
            self.refresh(true).await?;
        }
        Ok(())
    }

    /// Registers the recurring proactive refresh on the host alarm
    /// facility.
    ///
    /// The alarm fires a non-interactive [`CredentialManager::refresh`];
    /// failures there are logged and swallowed so they never surface to
    /// unrelated callers.
    pub fn schedule_proactive_refresh(self: &Arc<Self>, alarms: &dyn AlarmScheduler) {
        let manager = Arc::clone(self);
        alarms.schedule_recurring(
            REFRESH_ALARM,
            self.config.proactive_interval,
            Box::new(move || {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move {
                    if let Err(error) = manager.refresh(false).await {
                        warn!(%error, "proactive credential refresh failed");
                    }
                });
            }),
        );
        debug!(
            interval_secs = self.config.proactive_interval.as_secs(),
            "scheduled proactive credential refresh"
        );
    }

    async fn request_and_store(&self, interactive: bool) -> Result<String, CredentialError> {
        let token = self.provider.request_token(interactive).await?;
        let record = TokenRecord {
            token: token.clone(),
            issued_at_ms: now_ms(),
        };
        let value = serde_json::to_value(&record)
            .map_err(|error| crate::host::StoreError::backend(error.to_string()))?;
        self.store.set(TOKEN_KEY, value).await?;
        info!("persisted fresh credential");
        Ok(token)
    }

    async fn load_record(&self) -> Result<Option<TokenRecord>, CredentialError> {
        let Some(raw) = self.store.get(TOKEN_KEY).await? else {
            return Ok(None);
        };
        match serde_json::from_value(raw) {
            Ok(record) => Ok(Some(record)),
            Err(error) => {
                warn!(%error, "stored credential record is corrupt, ignoring");
                Ok(None)
            }
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
