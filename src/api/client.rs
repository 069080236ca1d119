//! Bundled `reqwest` implementation of the API contracts.
//!
//! Client construction follows shared project policy (connect/read
//! timeouts, gzip, a single user agent) so both services see consistent
//! traffic. Responses are interpreted only as far as "success, bytes, or a
//! status code plus Retry-After" - protocol details beyond that are out of
//! scope.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, header};
use tracing::{debug, instrument};
use url::Url;

use crate::catalog::{CollectionId, CollectionSnapshot, ExportFormat};

use super::{ApiError, CatalogApi, ContentApi};

const CONNECT_TIMEOUT_SECS: u64 = 10;
const READ_TIMEOUT_SECS: u64 = 60;
const USER_AGENT: &str = concat!("classfetch/", env!("CARGO_PKG_VERSION"));

/// HTTP client for the catalog and content services.
///
/// Cheap to clone; both trait impls share one connection pool.
#[derive(Debug, Clone)]
pub struct HttpApiClient {
    http: Client,
    catalog_base: Url,
    content_base: Url,
}

impl HttpApiClient {
    /// Creates a client against the given service base URLs.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::ClientBuild`] when the underlying HTTP client
    /// cannot be constructed.
    pub fn new(catalog_base: Url, content_base: Url) -> Result<Self, ApiError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(READ_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .gzip(true)
            .build()
            .map_err(|error| ApiError::ClientBuild {
                message: error.to_string(),
            })?;
        Ok(Self {
            http,
            catalog_base,
            content_base,
        })
    }

    fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = base.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|()| ApiError::ClientBuild {
                    message: format!("base URL cannot be a base: {base}"),
                })?;
            path.pop_if_empty();
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }

    async fn get(&self, endpoint: Url, credential: &str) -> Result<Response, ApiError> {
        let target = endpoint.to_string();
        let response = self
            .http
            .get(endpoint)
            .bearer_auth(credential)
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() {
                    ApiError::timeout(&target)
                } else {
                    ApiError::network(&target, error)
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = (status == StatusCode::TOO_MANY_REQUESTS)
            .then(|| {
                response
                    .headers()
                    .get(header::RETRY_AFTER)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_string)
            })
            .flatten();
        debug!(endpoint = %target, status = status.as_u16(), "request rejected");
        Err(ApiError::status_with_retry_after(
            target,
            status.as_u16(),
            retry_after,
        ))
    }

    async fn body_bytes(response: Response) -> Result<Vec<u8>, ApiError> {
        let target = response.url().to_string();
        let bytes = response.bytes().await.map_err(|error| {
            if error.is_timeout() {
                ApiError::timeout(&target)
            } else {
                ApiError::network(&target, error)
            }
        })?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl CatalogApi for HttpApiClient {
    #[instrument(skip(self, credential), fields(collection = %collection))]
    async fn fetch_collection(
        &self,
        collection: &CollectionId,
        credential: &str,
    ) -> Result<CollectionSnapshot, ApiError> {
        let endpoint =
            Self::endpoint(&self.catalog_base, &["collections", collection.as_str()])?;
        let target = endpoint.to_string();
        let response = self.get(endpoint, credential).await?;
        let bytes = Self::body_bytes(response).await?;
        let snapshot = serde_json::from_slice(&bytes)
            .map_err(|source| ApiError::decode(&target, source))?;
        Ok(snapshot)
    }
}

#[async_trait]
impl ContentApi for HttpApiClient {
    #[instrument(skip(self, credential))]
    async fn fetch_content(&self, item_id: &str, credential: &str) -> Result<Vec<u8>, ApiError> {
        let mut endpoint = Self::endpoint(&self.content_base, &["files", item_id])?;
        endpoint.query_pairs_mut().append_pair("alt", "media");
        let response = self.get(endpoint, credential).await?;
        Self::body_bytes(response).await
    }

    #[instrument(skip(self, credential))]
    async fn convert_and_fetch(
        &self,
        item_id: &str,
        format: ExportFormat,
        credential: &str,
    ) -> Result<Vec<u8>, ApiError> {
        let mut endpoint = Self::endpoint(&self.content_base, &["files", item_id, "export"])?;
        endpoint
            .query_pairs_mut()
            .append_pair("format", format.as_str());
        let response = self.get(endpoint, credential).await?;
        Self::body_bytes(response).await
    }
}
