//! Remote API contracts and the bundled HTTP client.
//!
//! The core talks to two remote services: a catalog API returning course
//! records and a content API returning file bytes (optionally converting
//! them first). Both are consumed through the trait contracts here; the
//! [`HttpApiClient`] is the bundled `reqwest` implementation that makes
//! authenticated requests and interprets status codes, and nothing more.

mod client;
mod error;

pub use client::HttpApiClient;
pub use error::ApiError;

use async_trait::async_trait;

use crate::catalog::{CollectionId, CollectionSnapshot, ExportFormat};

/// Quota-limited catalog service returning course records.
#[async_trait]
pub trait CatalogApi: Send + Sync {
    /// Fetches every record of one collection.
    async fn fetch_collection(
        &self,
        collection: &CollectionId,
        credential: &str,
    ) -> Result<CollectionSnapshot, ApiError>;
}

/// Content service returning file bytes.
#[async_trait]
pub trait ContentApi: Send + Sync {
    /// Fetches a stored file's bytes.
    async fn fetch_content(&self, item_id: &str, credential: &str) -> Result<Vec<u8>, ApiError>;

    /// Converts a native item to `format`, then fetches the converted bytes.
    async fn convert_and_fetch(
        &self,
        item_id: &str,
        format: ExportFormat,
        credential: &str,
    ) -> Result<Vec<u8>, ApiError>;
}
