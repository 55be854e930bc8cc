//! Decoded tile cache.
//!
//! Holds decoded band windows in memory under a byte budget, keyed by tile
//! identity. A miss fetches the blocks covering the requested window (or the
//! whole band when most of it is needed), decodes them off the async workers
//! and stores the result as an immutable buffer shared with every reader.
//!
//! # Design Principles
//!
//! - **Tile-granular eviction**: all bands of a tile are evicted together,
//!   least recently used first
//! - **Grow, never shrink**: a band buffer is replaced by one covering the
//!   union of the old and new windows
//! - **One fetch per tile**: concurrent misses for a tile wait on the first
//!   one instead of fetching again
//! - **Stable views**: a [`PixelView`] keeps its buffer alive after eviction
//!
//! # Example
//!
//! ```ignore
//! use rasterstream::cache::TileCache;
//!
//! let cache = TileCache::new(&config, fetcher, directories, metrics);
//! let view = cache.get(&tile, &"B04".into(), window).await?;
//! let red = view.to_f64();
//! ```

mod coalesce;
mod entry;
mod plan;
mod tile_cache;

pub use coalesce::{CoalesceResult, FlightGuard, FlightOutcome, RequestCoalescer};
pub use entry::{CacheEntry, PixelView, ResidentBand};
pub use plan::{plan_fetch, FetchPlan};
pub use tile_cache::TileCache;

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::decode::DecodeError;
use crate::directory::ParseError;
use crate::fetch::FetchError;

/// Errors returned by [`TileCache::get`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CacheError {
    #[error("tile {tile} has no band {band}")]
    UnknownBand { tile: String, band: String },

    #[error("requested window is empty")]
    EmptyWindow,

    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("tile could not be parsed: {0}")]
    Parse(#[from] ParseError),

    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),

    /// Waited longer than the configured timeout for another request's fetch.
    #[error("timed out after {waited:?} waiting for tile {tile}")]
    WaitTimeout { tile: String, waited: Duration },

    #[error("cache is shutting down")]
    ShuttingDown,
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    pub entries: usize,
    pub size_bytes: u64,
    pub max_size_bytes: u64,
    /// Tiles with a fetch in progress.
    pub in_flight: usize,
    pub hits: u64,
    pub misses: u64,
    pub coalesced_waits: u64,
    pub evictions: u64,
    pub bytes_evicted: u64,
}

impl CacheStats {
    /// Hits over all lookups, or 0 when nothing was looked up.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Fraction of the byte budget in use.
    pub fn utilization(&self) -> f64 {
        if self.max_size_bytes == 0 {
            0.0
        } else {
            self.size_bytes as f64 / self.max_size_bytes as f64
        }
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} tiles, {}/{} bytes ({:.1}%), {} hits, {} misses, {} evictions",
            self.entries,
            self.size_bytes,
            self.max_size_bytes,
            self.utilization() * 100.0,
            self.hits,
            self.misses,
            self.evictions
        )
    }
}
