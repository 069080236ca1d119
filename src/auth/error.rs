//! Error types for credential management.
//!
//! Provider failures are classified so calling UI can decide whether to
//! prompt again (cancelled), show a network error, or show a configuration
//! error. Expected conditions - an unexpired cached token, lock contention -
//! are not errors and never surface here.

use thiserror::Error;

use crate::host::StoreError;

/// Failure classes reported by a credential provider.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// The user dismissed an interactive prompt.
    #[error("credential request cancelled by user")]
    Cancelled,

    /// The provider was unreachable or the exchange failed in transit.
    #[error("network failure reaching credential provider: {message}")]
    Network {
        /// Human-readable failure description.
        message: String,
    },

    /// The provider rejected the request outright (bad client setup,
    /// revoked grant, unsupported operation).
    #[error("credential provider misconfigured: {message}")]
    Config {
        /// Human-readable failure description.
        message: String,
    },
}

impl ProviderError {
    /// Creates a network classification with the given message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates a config classification with the given message.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

/// Errors surfaced by the credential manager.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// The credential provider failed; the classification is preserved.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The durable store failed while reading or writing credential state.
    #[error("credential store error: {0}")]
    Store(#[from] StoreError),
}

impl CredentialError {
    /// Returns whether the user cancelled an interactive prompt.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Provider(ProviderError::Cancelled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_classification_is_preserved_through_credential_error() {
        let error = CredentialError::from(ProviderError::network("dns failure"));
        assert!(matches!(
            error,
            CredentialError::Provider(ProviderError::Network { .. })
        ));
        assert!(!error.is_cancelled());
        assert!(error.to_string().contains("dns failure"));

        let cancelled = CredentialError::from(ProviderError::Cancelled);
        assert!(cancelled.is_cancelled());
    }
}
