//! Request rate limiting for the remote services.
//!
//! This module provides the [`RateLimiter`], a token bucket shared by every
//! outbound request. The bucket refills continuously; when the server
//! signals throttling (HTTP 429) a backoff window suspends all grants until
//! it expires, regardless of bucket fill. Waiters are granted permits in
//! priority order, FIFO within the same priority.
//!
//! # Example
//!
//! ```
//! use classfetch_core::limiter::{Priority, RateLimiter};
//!
//! # async fn example() {
//! let limiter = RateLimiter::default();
//!
//! // Gate a request, then feed the outcome back.
//! limiter.acquire(Priority::Normal).await;
//! // ... perform the request ...
//! limiter.clear_backoff(); // on success
//! // limiter.report_429(Some("120")); // on a quota-exceeded response
//! # }
//! ```

mod backoff;
mod bucket;

pub use backoff::parse_retry_after;
pub use bucket::{LimiterConfig, LimiterStats, Priority, RateLimiter};
