//! HTTP object store using reqwest.
//!
//! Ranged reads use the `Range` request header. Servers that ignore the
//! header and answer `200 OK` with the whole body are tolerated: the
//! requested slice is cut out locally.

use std::time::Duration;

use bytes::Bytes;
use reqwest::header::RANGE;
use reqwest::StatusCode;
use tracing::debug;

use super::error::FetchError;
use super::store::{slice_available, BoxFuture, ByteRange, ObjectLocation, ObjectStore};

/// Default connect timeout for new connections.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Object store over plain HTTP(S).
///
/// Locations that are absolute URLs are used as-is; anything else is joined
/// onto `base_url`.
pub struct HttpObjectStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpObjectStore {
    /// Creates a store rooted at `base_url`, e.g. a blob container URL.
    pub fn new(base_url: impl Into<String>) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| FetchError::Io {
                location: "<client>".to_string(),
                reason: format!("failed to create HTTP client: {e}"),
            })?;
        Ok(Self::with_client(client, base_url))
    }

    /// Creates a store using an existing client (shared connection pool).
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Resolves a location to a request URL.
    pub fn url_for(&self, location: &ObjectLocation) -> String {
        let loc = location.as_str();
        if loc.starts_with("http://") || loc.starts_with("https://") || self.base_url.is_empty() {
            loc.to_string()
        } else {
            format!("{}/{}", self.base_url, loc.trim_start_matches('/'))
        }
    }

    async fn request(
        &self,
        location: &ObjectLocation,
        range: Option<ByteRange>,
    ) -> Result<Bytes, FetchError> {
        let url = self.url_for(location);
        let mut request = self.client.get(&url);
        if let Some(range) = range {
            request = request.header(RANGE, range.http_header());
        }

        let response = request.send().await.map_err(|e| classify(location, e))?;
        let status = response.status();
        if let Some(err) = FetchError::from_status(location.as_str(), status.as_u16()) {
            return Err(err);
        }

        let body = response.bytes().await.map_err(|e| classify(location, e))?;

        match range {
            Some(range) if status == StatusCode::OK => {
                debug!(
                    location = %location,
                    range = %range,
                    body_len = body.len(),
                    "Server ignored Range header, slicing locally"
                );
                Ok(slice_available(&body, range))
            }
            _ => Ok(body),
        }
    }
}

fn classify(location: &ObjectLocation, error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        return FetchError::Timeout {
            location: location.to_string(),
            timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        };
    }
    if let Some(status) = error.status() {
        if let Some(err) = FetchError::from_status(location.as_str(), status.as_u16()) {
            return err;
        }
    }
    if error.is_builder() {
        return FetchError::Io {
            location: location.to_string(),
            reason: error.to_string(),
        };
    }
    FetchError::Transient {
        location: location.to_string(),
        reason: error.to_string(),
    }
}

impl ObjectStore for HttpObjectStore {
    fn get_range<'a>(
        &'a self,
        location: &'a ObjectLocation,
        range: ByteRange,
    ) -> BoxFuture<'a, Result<Bytes, FetchError>> {
        Box::pin(self.request(location, Some(range)))
    }

    fn get_object<'a>(
        &'a self,
        location: &'a ObjectLocation,
    ) -> BoxFuture<'a, Result<Bytes, FetchError>> {
        Box::pin(self.request(location, None))
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_for_relative_location() {
        let store = HttpObjectStore::new("https://example.blob.core.windows.net/sentinel2/").unwrap();
        let loc = ObjectLocation::new("2024-06/33TUN_20240615_B04.tif");
        assert_eq!(
            store.url_for(&loc),
            "https://example.blob.core.windows.net/sentinel2/2024-06/33TUN_20240615_B04.tif"
        );
    }

    #[test]
    fn test_url_for_absolute_location() {
        let store = HttpObjectStore::new("https://a.example").unwrap();
        let loc = ObjectLocation::new("https://b.example/x.tif");
        assert_eq!(store.url_for(&loc), "https://b.example/x.tif");
    }
}
