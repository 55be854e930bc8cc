//! Atomic counters for the streaming subsystem.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use super::snapshot::MetricsSnapshot;

/// Counters shared (via `Arc`) by every component of one streaming service.
#[derive(Debug)]
pub struct StreamMetrics {
    started: Instant,

    // Cache
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    coalesced_waits: AtomicU64,
    evictions: AtomicU64,
    bytes_evicted: AtomicU64,

    // Fetching
    range_requests: AtomicU64,
    full_fetches: AtomicU64,
    bytes_fetched: AtomicU64,
    retries: AtomicU64,
    fetch_failures: AtomicU64,

    // Directory parsing
    directories_parsed: AtomicU64,
    parse_failures: AtomicU64,
}

impl Default for StreamMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamMetrics {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            coalesced_waits: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            bytes_evicted: AtomicU64::new(0),
            range_requests: AtomicU64::new(0),
            full_fetches: AtomicU64::new(0),
            bytes_fetched: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            fetch_failures: AtomicU64::new(0),
            directories_parsed: AtomicU64::new(0),
            parse_failures: AtomicU64::new(0),
        }
    }

    pub fn cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// A request joined another request's in-flight fetch.
    pub fn coalesced_wait(&self) {
        self.coalesced_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn evicted(&self, bytes: u64) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
        self.bytes_evicted.fetch_add(bytes, Ordering::Relaxed);
    }

    /// A ranged read completed with `bytes` of payload.
    pub fn range_fetched(&self, bytes: u64) {
        self.range_requests.fetch_add(1, Ordering::Relaxed);
        self.bytes_fetched.fetch_add(bytes, Ordering::Relaxed);
    }

    /// A whole-object read completed with `bytes` of payload.
    pub fn full_fetched(&self, bytes: u64) {
        self.full_fetches.fetch_add(1, Ordering::Relaxed);
        self.bytes_fetched.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn retried(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fetch_failed(&self) {
        self.fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn directory_parsed(&self) {
        self.directories_parsed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn parse_failed(&self) {
        self.parse_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Total store requests (ranged plus full).
    pub fn requests(&self) -> u64 {
        self.range_requests.load(Ordering::Relaxed) + self.full_fetches.load(Ordering::Relaxed)
    }

    /// Takes a point-in-time copy of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime: self.started.elapsed(),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            coalesced_waits: self.coalesced_waits.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            bytes_evicted: self.bytes_evicted.load(Ordering::Relaxed),
            range_requests: self.range_requests.load(Ordering::Relaxed),
            full_fetches: self.full_fetches.load(Ordering::Relaxed),
            bytes_fetched: self.bytes_fetched.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            directories_parsed: self.directories_parsed.load(Ordering::Relaxed),
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
        }
    }
}
