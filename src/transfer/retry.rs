//! Retry logic with exponential backoff for failed transfers.
//!
//! Failures are classified into a [`FailureType`] and the [`RetryPolicy`]
//! decides whether to try again:
//! - [`FailureType::Transient`] - network/timeout/5xx, retried with
//!   backoff plus jitter
//! - [`FailureType::Throttled`] - quota responses, retried with the
//!   server-mandated delay when one was given
//! - [`FailureType::TerminalItem`] - unauthorized/forbidden/not-found,
//!   never retried; the item is recorded as failed and the batch continues

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

use crate::api::ApiError;

/// Default maximum attempts per item (including the initial attempt).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base delay for exponential backoff (1 second).
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default maximum delay cap (32 seconds).
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);

/// Default backoff multiplier (doubles each attempt).
const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;

/// Maximum jitter added to delays (500ms).
const MAX_JITTER: Duration = Duration::from_millis(500);

/// Classification of transfer failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry.
    ///
    /// Examples: network timeout, 5xx server errors, connection refused.
    Transient,

    /// Server quota signal (HTTP 429); retried, honoring Retry-After.
    Throttled,

    /// Terminal for this item: retrying cannot help.
    ///
    /// Examples: 401/403 (authorization), 404/410 (gone), malformed
    /// response bodies.
    TerminalItem,
}

/// Decision on whether to retry a failed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed).
        attempt: u32,
    },

    /// Do not retry.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Configuration for retry behavior with exponential backoff.
///
/// Delay formula: `min(base_delay * multiplier^attempt, max_delay) + jitter`.
/// With defaults the delays are approximately 1s, 2s before attempts run
/// out.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,

    /// Base delay for the first retry.
    base_delay: Duration,

    /// Maximum delay cap.
    max_delay: Duration,

    /// Multiplier applied each attempt.
    backoff_multiplier: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    /// Creates a retry policy with custom settings.
    ///
    /// `max_attempts` is clamped to at least 1.
    #[must_use]
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f32,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            backoff_multiplier,
        }
    }

    /// Creates a policy with a custom attempt ceiling, defaults otherwise.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Determines whether to retry after a failed attempt.
    ///
    /// `attempt` is the attempt number that just failed (1-indexed).
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        if failure_type == FailureType::TerminalItem {
            return RetryDecision::DoNotRetry {
                reason: "terminal failure - retry would not help".to_string(),
            };
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.calculate_delay(attempt);
        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Calculates the delay for a retry with exponential backoff and jitter.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let multiplier = f64::from(self.backoff_multiplier);

        // attempt is 1-indexed: attempt 1 retries after base * multiplier^0.
        let exponent = f64::from(attempt - 1);
        let delay_ms = base_ms * multiplier.powf(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        Duration::from_millis(capped_ms as u64) + calculate_jitter()
    }
}

/// Generates random jitter between 0 and [`MAX_JITTER`].
///
/// Prevents thundering herd when several transfers fail simultaneously and
/// would otherwise retry in lockstep.
#[allow(clippy::cast_possible_truncation)]
fn calculate_jitter() -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_ms = rng.gen_range(0..=MAX_JITTER.as_millis() as u64);
    Duration::from_millis(jitter_ms)
}

/// Classifies an API error into a failure type for retry decisions.
///
/// # HTTP Status Code Classification
///
/// | Status | Type | Rationale |
/// |--------|------|-----------|
/// | 401 | TerminalItem | Unauthorized - retrying the item cannot help |
/// | 403 | TerminalItem | Forbidden - no access to this item |
/// | 404 | TerminalItem | Not found - item no longer exists |
/// | 408 | Transient | Request timeout - may succeed |
/// | 410 | TerminalItem | Gone - permanently removed |
/// | 429 | Throttled | Quota exceeded - retry with backoff |
/// | 5xx | Transient | Server trouble - may be temporary |
///
/// Timeouts and network errors are transient; undecodable bodies are
/// terminal for the item.
#[must_use]
pub fn classify_api_error(error: &ApiError) -> FailureType {
    match error {
        ApiError::Status { status, .. } => classify_http_status(*status),
        ApiError::Timeout { .. } | ApiError::Network { .. } => FailureType::Transient,
        ApiError::Decode { .. } | ApiError::ClientBuild { .. } => FailureType::TerminalItem,
    }
}

/// Classifies an HTTP status code into a failure type.
#[allow(clippy::match_same_arms)]
fn classify_http_status(status: u16) -> FailureType {
    match status {
        401 => FailureType::TerminalItem, // Unauthorized
        403 => FailureType::TerminalItem, // Forbidden
        404 => FailureType::TerminalItem, // Not Found
        408 => FailureType::Transient,    // Request Timeout
        410 => FailureType::TerminalItem, // Gone
        429 => FailureType::Throttled,    // Too Many Requests

        // Other 4xx are terminal for the item
        status if (400..500).contains(&status) => FailureType::TerminalItem,

        // 5xx are transient
        status if (500..600).contains(&status) => FailureType::Transient,

        // Anything else is unexpected, treat as terminal
        _ => FailureType::TerminalItem,
    }
}
