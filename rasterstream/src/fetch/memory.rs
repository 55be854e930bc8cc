//! In-process object store with request accounting.
//!
//! Holds objects in memory, counts every request it serves and can inject
//! failures and latency. Embedders use it for fixtures; the crate's own
//! tests use it to assert how many fetches a code path performs.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};

use super::error::FetchError;
use super::store::{slice_available, BoxFuture, ByteRange, ObjectLocation, ObjectMeta, ObjectStore};

/// A request observed by a [`MemoryObjectStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedRequest {
    Range(ObjectLocation, ByteRange),
    Full(ObjectLocation),
}

impl RecordedRequest {
    pub fn location(&self) -> &ObjectLocation {
        match self {
            RecordedRequest::Range(loc, _) | RecordedRequest::Full(loc) => loc,
        }
    }
}

/// In-memory [`ObjectStore`].
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<ObjectLocation, Bytes>>,
    failures: Mutex<HashMap<ObjectLocation, VecDeque<FetchError>>>,
    log: Mutex<Vec<RecordedRequest>>,
    latency: Mutex<Option<Duration>>,
    range_requests: AtomicU64,
    full_requests: AtomicU64,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores (or replaces) an object.
    pub fn insert(&self, location: impl Into<ObjectLocation>, data: impl Into<Bytes>) {
        self.objects.write().insert(location.into(), data.into());
    }

    /// Queues a failure returned by the next request for `location`.
    ///
    /// Failures are consumed in order, one per request.
    pub fn fail_next(&self, location: impl Into<ObjectLocation>, error: FetchError) {
        self.failures
            .lock()
            .entry(location.into())
            .or_default()
            .push_back(error);
    }

    /// Delays every request by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    /// Number of ranged requests served (including failed ones).
    pub fn range_requests(&self) -> u64 {
        self.range_requests.load(Ordering::SeqCst)
    }

    /// Number of whole-object requests served (including failed ones).
    pub fn full_requests(&self) -> u64 {
        self.full_requests.load(Ordering::SeqCst)
    }

    pub fn total_requests(&self) -> u64 {
        self.range_requests() + self.full_requests()
    }

    /// All requests in arrival order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.log.lock().clone()
    }

    /// Requests that touched `location`.
    pub fn requests_for(&self, location: &ObjectLocation) -> Vec<RecordedRequest> {
        self.log
            .lock()
            .iter()
            .filter(|r| r.location() == location)
            .cloned()
            .collect()
    }

    pub fn reset_counters(&self) {
        self.range_requests.store(0, Ordering::SeqCst);
        self.full_requests.store(0, Ordering::SeqCst);
        self.log.lock().clear();
    }

    async fn serve(&self, request: RecordedRequest) -> Result<Bytes, FetchError> {
        match &request {
            RecordedRequest::Range(..) => self.range_requests.fetch_add(1, Ordering::SeqCst),
            RecordedRequest::Full(_) => self.full_requests.fetch_add(1, Ordering::SeqCst),
        };
        self.log.lock().push(request.clone());

        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let injected = self
            .failures
            .lock()
            .get_mut(request.location())
            .and_then(|queue| queue.pop_front());
        if let Some(error) = injected {
            return Err(error);
        }

        let data = self
            .objects
            .read()
            .get(request.location())
            .cloned()
            .ok_or_else(|| FetchError::NotFound {
                location: request.location().to_string(),
            })?;

        Ok(match request {
            RecordedRequest::Range(_, range) => slice_available(&data, range),
            RecordedRequest::Full(_) => data,
        })
    }
}

impl ObjectStore for MemoryObjectStore {
    fn get_range<'a>(
        &'a self,
        location: &'a ObjectLocation,
        range: ByteRange,
    ) -> BoxFuture<'a, Result<Bytes, FetchError>> {
        Box::pin(self.serve(RecordedRequest::Range(location.clone(), range)))
    }

    fn get_object<'a>(
        &'a self,
        location: &'a ObjectLocation,
    ) -> BoxFuture<'a, Result<Bytes, FetchError>> {
        Box::pin(self.serve(RecordedRequest::Full(location.clone())))
    }

    fn list<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, Result<Vec<ObjectMeta>, FetchError>> {
        let mut found: Vec<ObjectMeta> = self
            .objects
            .read()
            .iter()
            .filter(|(loc, _)| loc.as_str().starts_with(prefix))
            .map(|(loc, data)| ObjectMeta {
                location: loc.clone(),
                size: data.len() as u64,
            })
            .collect();
        found.sort_by(|a, b| a.location.cmp(&b.location));
        Box::pin(async move { Ok(found) })
    }

    fn name(&self) -> &str {
        "memory"
    }
}
