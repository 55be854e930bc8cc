//! Range fetching with centralized retry.
//!
//! [`RangeFetcher`] wraps an [`ObjectStore`] with the one retry policy used
//! for every request (ranged or whole-object) and a per-attempt timeout.
//! Transient failures are retried with backoff; `NotFound` and
//! `Unauthorized` return immediately. The fetcher holds no per-call state.
//!
//! # Architecture
//!
//! ```text
//! TileCache / Directory ──► RangeFetcher ──► dyn ObjectStore
//!                           (retry, timeout,   ├── HttpObjectStore
//!                            metrics)          ├── LocalObjectStore
//!                                              └── MemoryObjectStore
//! ```

mod error;
mod http;
mod local;
mod memory;
mod policy;
mod store;

pub use error::FetchError;
pub use http::{HttpObjectStore, DEFAULT_CONNECT_TIMEOUT_SECS};
pub use local::LocalObjectStore;
pub use memory::{MemoryObjectStore, RecordedRequest};
pub use policy::{
    RetryPolicy, DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_INITIAL_DELAY_MS, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_MAX_DELAY_SECS,
};
pub use store::{BoxFuture, ByteRange, ObjectLocation, ObjectMeta, ObjectStore};

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, warn};

use crate::config::FetchConfig;
use crate::telemetry::StreamMetrics;

/// What to read from an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchRange {
    Bytes(ByteRange),
    Full,
}

/// Retrieves bytes from an object store under a shared retry policy.
#[derive(Clone)]
pub struct RangeFetcher {
    store: Arc<dyn ObjectStore>,
    policy: RetryPolicy,
    request_timeout: Duration,
    max_concurrent_ranges: usize,
    metrics: Arc<StreamMetrics>,
}

impl RangeFetcher {
    /// Creates a fetcher.
    ///
    /// # Arguments
    ///
    /// * `store` - Backing object store
    /// * `config` - Retry policy, per-attempt timeout and range concurrency
    /// * `metrics` - Shared counters
    pub fn new(store: Arc<dyn ObjectStore>, config: &FetchConfig, metrics: Arc<StreamMetrics>) -> Self {
        Self {
            store,
            policy: config.retry.clone(),
            request_timeout: config.request_timeout,
            max_concurrent_ranges: config.max_concurrent_ranges.max(1),
            metrics,
        }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetches a byte range or a whole object.
    ///
    /// Ranged reads may return fewer bytes than requested when the range runs
    /// past the end of the object.
    pub async fn fetch(
        &self,
        location: &ObjectLocation,
        range: FetchRange,
    ) -> Result<Bytes, FetchError> {
        let max_attempts = self.policy.max_attempts();
        let mut attempt = 1;

        loop {
            match self.attempt(location, range).await {
                Ok(data) => {
                    match range {
                        FetchRange::Bytes(_) => self.metrics.range_fetched(data.len() as u64),
                        FetchRange::Full => self.metrics.full_fetched(data.len() as u64),
                    }
                    return Ok(data);
                }
                Err(err) if !err.is_retryable() => {
                    self.metrics.fetch_failed();
                    debug!(location = %location, error = %err, "Fetch failed (not retryable)");
                    return Err(err);
                }
                Err(err) => match self.policy.delay_for_attempt(attempt) {
                    Some(delay) => {
                        self.metrics.retried();
                        warn!(
                            location = %location,
                            attempt,
                            max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "Transient fetch failure, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => {
                        self.metrics.fetch_failed();
                        return Err(if attempt > 1 {
                            FetchError::RetriesExhausted {
                                location: location.to_string(),
                                attempts: attempt,
                                last: Box::new(err),
                            }
                        } else {
                            err
                        });
                    }
                },
            }
        }
    }

    async fn attempt(
        &self,
        location: &ObjectLocation,
        range: FetchRange,
    ) -> Result<Bytes, FetchError> {
        let request = async {
            match range {
                FetchRange::Bytes(r) => self.store.get_range(location, r).await,
                FetchRange::Full => self.store.get_object(location).await,
            }
        };
        match tokio::time::timeout(self.request_timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout {
                location: location.to_string(),
                timeout: self.request_timeout,
            }),
        }
    }

    /// Fetches several ranges of one object concurrently.
    ///
    /// Results are returned in the order of `ranges`. Fails if any range
    /// fails after retries.
    pub async fn fetch_ranges(
        &self,
        location: &ObjectLocation,
        ranges: &[ByteRange],
    ) -> Result<Vec<(ByteRange, Bytes)>, FetchError> {
        stream::iter(ranges.iter().copied())
            .map(|r| async move {
                let data = self.fetch(location, FetchRange::Bytes(r)).await?;
                Ok::<_, FetchError>((r, data))
            })
            .buffered(self.max_concurrent_ranges)
            .try_collect()
            .await
    }
}
