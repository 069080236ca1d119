//! Token bucket with a priority-ordered wait set and backoff windows.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::backoff::parse_retry_after;

/// Default bucket capacity, in tokens.
const DEFAULT_CAPACITY: f64 = 90.0;

/// Default continuous refill rate, in tokens per second.
const DEFAULT_REFILL_PER_SEC: f64 = 1.5;

/// Default backoff applied when a 429 carries no usable Retry-After.
const DEFAULT_BACKOFF: Duration = Duration::from_secs(60);

/// Priority classes for permit grants.
///
/// Waiters are granted in priority order once tokens exist; within one
/// priority the order is FIFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Interactive work the user is waiting on (catalog fetches).
    High,
    /// Batch work (content downloads).
    Normal,
    /// Opportunistic background work.
    Low,
}

impl Priority {
    /// Lower rank is granted first.
    fn rank(self) -> u8 {
        match self {
            Self::High => 0,
            Self::Normal => 1,
            Self::Low => 2,
        }
    }
}

/// Tunable limiter constants.
#[derive(Debug, Clone)]
pub struct LimiterConfig {
    /// Maximum number of stored tokens.
    pub capacity: f64,
    /// Continuous refill rate in tokens per second.
    pub refill_per_sec: f64,
    /// Backoff applied when a quota response carries no usable Retry-After.
    pub default_backoff: Duration,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            refill_per_sec: DEFAULT_REFILL_PER_SEC,
            default_backoff: DEFAULT_BACKOFF,
        }
    }
}

/// Read-only snapshot of limiter state, for observability.
#[derive(Debug, Clone)]
pub struct LimiterStats {
    /// Tokens currently available.
    pub available_tokens: f64,
    /// Time remaining in the active backoff window, if any.
    pub backoff_remaining: Option<Duration>,
    /// Number of callers currently waiting for a permit.
    pub waiting: usize,
}

#[derive(Debug)]
struct Waiter {
    rank: u8,
    seq: u64,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
    backoff_until: Option<Instant>,
    queue: VecDeque<Waiter>,
    next_seq: u64,
}

impl BucketState {
    fn refill(&mut self, now: Instant, config: &LimiterConfig) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens =
            (self.tokens + elapsed.as_secs_f64() * config.refill_per_sec).min(config.capacity);
        self.last_refill = now;
    }
}

enum GrantStep {
    Granted,
    WaitUntil(Instant),
    WaitForTurn,
}

/// Token-bucket rate limiter shared by every outbound request.
///
/// The bucket refills continuously at a fixed rate. A server-signaled
/// backoff window suspends all grants until it expires, regardless of
/// bucket fill. The limiter never errors; it only delays. Callers feed
/// response outcomes back through [`RateLimiter::report_429`] and
/// [`RateLimiter::clear_backoff`].
#[derive(Debug)]
pub struct RateLimiter {
    config: LimiterConfig,
    state: Mutex<BucketState>,
    notify: Notify,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(LimiterConfig::default())
    }
}

impl RateLimiter {
    /// Creates a limiter with the given configuration; the bucket starts
    /// full.
    ///
    /// Non-positive capacity or refill values are clamped to minimal
    /// positive values rather than rejected.
    #[must_use]
    pub fn new(config: LimiterConfig) -> Self {
        let config = LimiterConfig {
            capacity: config.capacity.max(1.0),
            refill_per_sec: config.refill_per_sec.max(0.001),
            default_backoff: config.default_backoff,
        };
        debug!(
            capacity = config.capacity,
            refill_per_sec = config.refill_per_sec,
            "creating rate limiter"
        );
        Self {
            state: Mutex::new(BucketState {
                tokens: config.capacity,
                last_refill: Instant::now(),
                backoff_until: None,
                queue: VecDeque::new(),
                next_seq: 0,
            }),
            config,
            notify: Notify::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Suspends the caller until a permit is available.
    ///
    /// The permit is implicit authorization to proceed; nothing is returned
    /// and this method never errors. If the returned future is dropped
    /// before a grant, the caller's place in the wait set is released.
    #[instrument(skip(self))]
    pub async fn acquire(&self, priority: Priority) {
        let mut ticket = Ticket::enqueue(self, priority);
        loop {
            // Register for wakeups before inspecting state so a grant or
            // backoff change between the check and the await is not lost.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.step(ticket.seq) {
                GrantStep::Granted => {
                    ticket.granted = true;
                    // Wake the next waiter to re-evaluate its position.
                    self.notify.notify_waiters();
                    return;
                }
                GrantStep::WaitUntil(deadline) => {
                    tokio::select! {
                        () = tokio::time::sleep_until(deadline) => {}
                        () = &mut notified => {}
                    }
                }
                GrantStep::WaitForTurn => {
                    notified.await;
                }
            }
        }
    }

    fn step(&self, seq: u64) -> GrantStep {
        let mut state = self.state();
        let now = Instant::now();
        state.refill(now, &self.config);

        if let Some(until) = state.backoff_until {
            if now < until {
                return GrantStep::WaitUntil(until);
            }
            state.backoff_until = None;
        }

        if state.queue.front().map(|waiter| waiter.seq) != Some(seq) {
            return GrantStep::WaitForTurn;
        }

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            state.queue.pop_front();
            return GrantStep::Granted;
        }

        let deficit = 1.0 - state.tokens;
        let wait = Duration::from_secs_f64(deficit / self.config.refill_per_sec);
        GrantStep::WaitUntil(now + wait)
    }

    /// Records a quota-exceeded response and installs or extends the
    /// backoff window.
    ///
    /// `retry_after` is the raw Retry-After header value (integer seconds
    /// or HTTP-date); unparseable or absent values fall back to the
    /// configured default delay. A later, shorter delay never shrinks an
    /// existing longer window.
    #[instrument(skip(self))]
    pub fn report_429(&self, retry_after: Option<&str>) {
        let delay = retry_after
            .and_then(parse_retry_after)
            .unwrap_or(self.config.default_backoff);
        let until = Instant::now() + delay;

        let mut state = self.state();
        match state.backoff_until {
            Some(existing) if existing >= until => {
                debug!(
                    delay_ms = delay.as_millis(),
                    "backoff window already extends past reported delay"
                );
            }
            _ => {
                warn!(delay_ms = delay.as_millis(), "entering backoff window");
                state.backoff_until = Some(until);
            }
        }
        drop(state);
        // Waiters re-evaluate their deadlines against the new window.
        self.notify.notify_waiters();
    }

    /// Clears any active backoff window; called after a successful
    /// response, which signals the server is no longer throttling.
    pub fn clear_backoff(&self) {
        let mut state = self.state();
        if state.backoff_until.take().is_some() {
            debug!("backoff window cleared after successful response");
            drop(state);
            self.notify.notify_waiters();
        }
    }

    /// Returns a read-only snapshot of available tokens and backoff state.
    ///
    /// Does not mutate limiter state; the projected refill is computed
    /// without being stored.
    #[must_use]
    pub fn stats(&self) -> LimiterStats {
        let state = self.state();
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(state.last_refill);
        let available_tokens = (state.tokens + elapsed.as_secs_f64() * self.config.refill_per_sec)
            .min(self.config.capacity);
        let backoff_remaining = state
            .backoff_until
            .map(|until| until.saturating_duration_since(now))
            .filter(|remaining| !remaining.is_zero());
        LimiterStats {
            available_tokens,
            backoff_remaining,
            waiting: state.queue.len(),
        }
    }
}

/// A caller's place in the wait set; removed on drop unless granted.
struct Ticket<'a> {
    limiter: &'a RateLimiter,
    seq: u64,
    granted: bool,
}

impl<'a> Ticket<'a> {
    fn enqueue(limiter: &'a RateLimiter, priority: Priority) -> Self {
        let mut state = limiter.state();
        let seq = state.next_seq;
        state.next_seq += 1;
        let rank = priority.rank();
        let position = state
            .queue
            .iter()
            .position(|waiter| waiter.rank > rank)
            .unwrap_or(state.queue.len());
        state.queue.insert(position, Waiter { rank, seq });
        Self {
            limiter,
            seq,
            granted: false,
        }
    }
}

impl Drop for Ticket<'_> {
    fn drop(&mut self) {
        if self.granted {
            return;
        }
        let mut state = self.limiter.state();
        if let Some(position) = state.queue.iter().position(|waiter| waiter.seq == self.seq) {
            state.queue.remove(position);
        }
        drop(state);
        self.limiter.notify.notify_waiters();
    }
}
