//! Error types for remote API calls.
//!
//! Both remote services speak plain HTTP; the core only interprets status
//! codes and the Retry-After header, so the error type carries exactly that
//! context for the retry and backoff machinery.

use thiserror::Error;

/// Errors that can occur calling the catalog or content API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Non-success HTTP response.
    #[error("HTTP {status} from {endpoint}")]
    Status {
        /// The endpoint that returned the status.
        endpoint: String,
        /// The HTTP status code.
        status: u16,
        /// The Retry-After header value, if present (for 429 responses).
        retry_after: Option<String>,
    },

    /// Request timed out before completion.
    #[error("timeout calling {endpoint}")]
    Timeout {
        /// The endpoint that timed out.
        endpoint: String,
    },

    /// Network-level error (DNS resolution, connection refused, TLS, etc.)
    #[error("network error calling {endpoint}: {source}")]
    Network {
        /// The endpoint that failed.
        endpoint: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Response body could not be decoded into the expected shape.
    #[error("invalid response body from {endpoint}: {source}")]
    Decode {
        /// The endpoint that returned the body.
        endpoint: String,
        /// The underlying decode error.
        #[source]
        source: serde_json::Error,
    },

    /// HTTP client construction failed.
    #[error("HTTP client construction failed: {message}")]
    ClientBuild {
        /// Human-readable failure description.
        message: String,
    },
}

impl ApiError {
    /// Creates a status error without a Retry-After header.
    pub fn status(endpoint: impl Into<String>, status: u16) -> Self {
        Self::Status {
            endpoint: endpoint.into(),
            status,
            retry_after: None,
        }
    }

    /// Creates a status error carrying the Retry-After header value.
    pub fn status_with_retry_after(
        endpoint: impl Into<String>,
        status: u16,
        retry_after: Option<String>,
    ) -> Self {
        Self::Status {
            endpoint: endpoint.into(),
            status,
            retry_after,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(endpoint: impl Into<String>) -> Self {
        Self::Timeout {
            endpoint: endpoint.into(),
        }
    }

    /// Creates a network error from a reqwest error.
    pub fn network(endpoint: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            endpoint: endpoint.into(),
            source,
        }
    }

    /// Creates a decode error.
    pub fn decode(endpoint: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Decode {
            endpoint: endpoint.into(),
            source,
        }
    }

    /// Returns the HTTP status code, if this is a status error.
    #[must_use]
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns the raw Retry-After header value, if any.
    #[must_use]
    pub fn retry_after(&self) -> Option<&str> {
        match self {
            Self::Status { retry_after, .. } => retry_after.as_deref(),
            _ => None,
        }
    }
}

// No blanket `From<reqwest::Error>`: every variant needs the endpoint for
// context, so callers go through the helper constructors.

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn status_error_display_includes_code_and_endpoint() {
        let error = ApiError::status("https://api.example.com/collections/c1", 404);
        let msg = error.to_string();
        assert!(msg.contains("404"), "Expected '404' in: {msg}");
        assert!(msg.contains("/collections/c1"), "Expected endpoint in: {msg}");
    }

    #[test]
    fn retry_after_only_present_on_status_errors() {
        let throttled = ApiError::status_with_retry_after(
            "https://api.example.com/files/f1",
            429,
            Some("120".to_string()),
        );
        assert_eq!(throttled.http_status(), Some(429));
        assert_eq!(throttled.retry_after(), Some("120"));

        let timeout = ApiError::timeout("https://api.example.com/files/f1");
        assert_eq!(timeout.http_status(), None);
        assert_eq!(timeout.retry_after(), None);
    }
}
