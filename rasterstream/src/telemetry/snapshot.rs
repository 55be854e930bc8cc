//! Point-in-time view of [`StreamMetrics`](super::StreamMetrics).

use std::fmt;
use std::time::Duration;

/// Copy of all counters at one instant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub uptime: Duration,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub coalesced_waits: u64,
    pub evictions: u64,
    pub bytes_evicted: u64,
    pub range_requests: u64,
    pub full_fetches: u64,
    pub bytes_fetched: u64,
    pub retries: u64,
    pub fetch_failures: u64,
    pub directories_parsed: u64,
    pub parse_failures: u64,
}

impl MetricsSnapshot {
    /// Fraction of cache lookups served without I/O (0.0 when idle).
    pub fn hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }

    /// Average fetch throughput since start.
    pub fn bytes_per_second(&self) -> f64 {
        let secs = self.uptime.as_secs_f64();
        if secs > 0.0 {
            self.bytes_fetched as f64 / secs
        } else {
            0.0
        }
    }
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cache: {} hits / {} misses ({:.1}% hit rate), {} coalesced, {} evicted; \
             fetch: {} ranged + {} full, {:.1} MB, {} retries, {} failed; \
             directories: {} parsed, {} unparseable",
            self.cache_hits,
            self.cache_misses,
            self.hit_rate() * 100.0,
            self.coalesced_waits,
            self.evictions,
            self.range_requests,
            self.full_fetches,
            self.bytes_fetched as f64 / 1_000_000.0,
            self.retries,
            self.fetch_failures,
            self.directories_parsed,
            self.parse_failures,
        )
    }
}
