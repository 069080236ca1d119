//! Error types for the download orchestrator.
//!
//! Only batch-level setup failures surface to callers; individual job
//! failures are aggregated into the progress report instead.

use thiserror::Error;

use crate::api::ApiError;
use crate::auth::CredentialError;
use crate::host::SinkError;

/// Errors surfaced by batch submission.
#[derive(Debug, Error)]
pub enum TransferError {
    /// A batch is already running; submissions are rejected, not queued.
    #[error("a download batch is already active")]
    BatchActive,

    /// Nothing was selected for download.
    #[error("no items were selected for download")]
    EmptySelection,

    /// Items were selected but none matched the catalog's attachments.
    #[error("none of the selected items match the catalog")]
    NoMatches,

    /// Invalid concurrency configuration.
    #[error("invalid concurrency value {value}: must be between 1 and 16")]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// No valid credential could be obtained; the batch never started.
    #[error("could not obtain a valid credential: {0}")]
    Credential(#[from] CredentialError),
}

/// Failure of a single job, recorded in progress and logged.
#[derive(Debug, Error)]
pub(crate) enum JobError {
    /// The content fetch failed after all permitted attempts.
    #[error("fetch failed after {attempts} attempt(s): {source}")]
    Api {
        /// The final fetch error.
        #[source]
        source: ApiError,
        /// Attempts made.
        attempts: u32,
    },

    /// The fetched bytes could not be saved.
    #[error("save failed: {0}")]
    Sink(#[from] SinkError),

    /// No credential was available for this job.
    #[error("credential unavailable: {0}")]
    Credential(#[from] CredentialError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_errors_distinguish_empty_from_unmatched_selection() {
        let empty = TransferError::EmptySelection.to_string();
        let unmatched = TransferError::NoMatches.to_string();
        assert_ne!(empty, unmatched);
        assert!(empty.contains("selected"));
        assert!(unmatched.contains("match"));
    }

    #[test]
    fn job_error_display_carries_attempt_count() {
        let error = JobError::Api {
            source: ApiError::status("https://content.example.com/files/f1", 403),
            attempts: 1,
        };
        let msg = error.to_string();
        assert!(msg.contains("1 attempt"), "Expected attempts in: {msg}");
    }
}
