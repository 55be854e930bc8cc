//! Tile directory parsing.
//!
//! A band directory lists, for every block of one band, where its compressed
//! bytes live in the object. It is read from a header prefix without touching
//! pixel data, then memoized by [`DirectoryCache`] for the life of the
//! process: each (object, band) is parsed at most once, and structural
//! failures are remembered as well as successes.
//!
//! # Prefix growth
//!
//! ```text
//! fetch [0, header_probe_bytes)
//!     └─► parse ──► Ok(directory)
//!           └─► Truncated { needed } ──► fetch [len, needed) and append
//!                                        (while needed <= max_header_bytes)
//! ```

mod covering;
mod tiff;
mod types;

pub use covering::{blocks_covering, covering_blocks, merge_ranges, needed_fraction};
pub use tiff::parse_band_directory;
pub use types::{
    BandDirectory, BlockEntry, BlockLayout, ByteOrder, Codec, DirectoryError, GeoReference,
    ParseError, Predictor, SampleType,
};

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use moka::future::Cache as MokaCache;
use tracing::{debug, instrument, warn};

use crate::config::FetchConfig;
use crate::decode::DecoderRegistry;
use crate::fetch::{ByteRange, FetchError, FetchRange, ObjectLocation, RangeFetcher};
use crate::telemetry::StreamMetrics;

/// How much of an object's head the parser may read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderProbe {
    /// First prefix fetched.
    pub initial_bytes: u64,
    /// Largest prefix ever fetched.
    pub max_bytes: u64,
}

impl HeaderProbe {
    pub fn new(initial_bytes: u64, max_bytes: u64) -> Self {
        Self {
            initial_bytes: initial_bytes.max(16),
            max_bytes: max_bytes.max(initial_bytes),
        }
    }
}

impl From<&FetchConfig> for HeaderProbe {
    fn from(config: &FetchConfig) -> Self {
        Self::new(config.header_probe_bytes, config.max_header_bytes)
    }
}

/// Reads and parses the directory of one band from the head of an object.
///
/// # Arguments
///
/// * `fetcher` - Fetcher used for the prefix reads
/// * `location` - Object holding the band
/// * `band` - Sample plane within the object (0 for single-band objects)
/// * `registry` - Codecs the caller can decode
/// * `probe` - Initial and maximum prefix sizes
#[instrument(level = "debug", skip(fetcher, registry), fields(location = %location))]
pub async fn parse_directory(
    fetcher: &RangeFetcher,
    location: &ObjectLocation,
    band: u16,
    registry: &DecoderRegistry,
    probe: HeaderProbe,
) -> Result<BandDirectory, DirectoryError> {
    let first = fetcher
        .fetch(location, FetchRange::Bytes(ByteRange::new(0, probe.initial_bytes)))
        .await?;
    let mut at_end = (first.len() as u64) < probe.initial_bytes;
    let mut prefix = BytesMut::from(first.as_ref());

    loop {
        match parse_band_directory(&prefix, band, registry) {
            Ok(directory) => {
                debug!(
                    blocks = directory.blocks.len(),
                    prefix_bytes = prefix.len(),
                    "Parsed band directory"
                );
                return Ok(directory);
            }
            Err(ParseError::Truncated { needed, available })
                if !at_end && needed <= probe.max_bytes =>
            {
                let extra = ByteRange::new(available, needed - available);
                debug!(needed, available, "Header prefix too short, extending");
                let more: Bytes = fetcher.fetch(location, FetchRange::Bytes(extra)).await?;
                at_end = (more.len() as u64) < extra.length;
                prefix.extend_from_slice(&more);
            }
            Err(err) => return Err(err.into()),
        }
    }
}

type DirectoryKey = (ObjectLocation, u16);
type DirectoryOutcome = Result<Arc<BandDirectory>, ParseError>;

/// Process-wide memo of parsed band directories.
///
/// Concurrent requests for the same (object, band) share one parse. Fetch
/// failures are not memoized so a later request can try again.
#[derive(Clone)]
pub struct DirectoryCache {
    entries: MokaCache<DirectoryKey, DirectoryOutcome>,
    fetcher: RangeFetcher,
    registry: DecoderRegistry,
    probe: HeaderProbe,
    metrics: Arc<StreamMetrics>,
}

impl DirectoryCache {
    /// Creates a cache holding up to `capacity` directories.
    pub fn new(
        fetcher: RangeFetcher,
        registry: DecoderRegistry,
        probe: HeaderProbe,
        capacity: u64,
        metrics: Arc<StreamMetrics>,
    ) -> Self {
        Self {
            entries: MokaCache::builder().max_capacity(capacity).build(),
            fetcher,
            registry,
            probe,
            metrics,
        }
    }

    pub fn registry(&self) -> &DecoderRegistry {
        &self.registry
    }

    /// Directory of `band` in `location`, parsing it on first use.
    pub async fn get(
        &self,
        location: &ObjectLocation,
        band: u16,
    ) -> Result<Arc<BandDirectory>, DirectoryError> {
        let key = (location.clone(), band);
        let outcome = self
            .entries
            .try_get_with(key, async {
                match parse_directory(&self.fetcher, location, band, &self.registry, self.probe)
                    .await
                {
                    Ok(directory) => {
                        self.metrics.directory_parsed();
                        Ok(Ok(Arc::new(directory)))
                    }
                    Err(DirectoryError::Parse(err)) => {
                        self.metrics.parse_failed();
                        warn!(location = %location, band, error = %err, "Band directory unusable");
                        Ok(Err(err))
                    }
                    Err(DirectoryError::Fetch(err)) => Err(err),
                }
            })
            .await
            .map_err(|err: Arc<FetchError>| DirectoryError::Fetch((*err).clone()))?;
        outcome.map_err(DirectoryError::Parse)
    }

    /// True if a parse outcome for (`location`, `band`) is memoized.
    pub fn contains(&self, location: &ObjectLocation, band: u16) -> bool {
        self.entries.contains_key(&(location.clone(), band))
    }

    pub fn entry_count(&self) -> u64 {
        self.entries.entry_count()
    }

    pub fn clear(&self) {
        self.entries.invalidate_all();
    }
}
