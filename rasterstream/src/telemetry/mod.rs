//! Streaming telemetry for observability.
//!
//! Lock-free atomic counters updated by the fetcher, the directory parser and
//! the tile cache, with point-in-time snapshots for reporting.
//!
//! # Architecture
//!
//! ```text
//! RangeFetcher ─┐
//! TileCache ────┼──► StreamMetrics ─────► MetricsSnapshot ─────► logs / callers
//! Directory ────┘    (atomic counters)    (point-in-time copy)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use rasterstream::telemetry::StreamMetrics;
//!
//! let metrics = StreamMetrics::new();
//! metrics.cache_hit();
//! metrics.range_fetched(16_384);
//!
//! let snapshot = metrics.snapshot();
//! println!("{snapshot}");
//! ```

mod metrics;
mod snapshot;

pub use metrics::StreamMetrics;
pub use snapshot::MetricsSnapshot;
