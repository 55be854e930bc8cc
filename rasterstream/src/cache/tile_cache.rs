//! The tile cache.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use super::coalesce::{CoalesceResult, FlightOutcome, RequestCoalescer};
use super::entry::{CacheEntry, PixelView, ResidentBand};
use super::plan::{plan_fetch, FetchPlan};
use super::{CacheError, CacheStats};
use crate::config::StreamingConfig;
use crate::coord::PixelWindow;
use crate::decode::{assemble_window, DecodeError, FetchedBytes};
use crate::directory::{parse_band_directory, BandDirectory, DirectoryCache, DirectoryError};
use crate::fetch::{ByteRange, FetchRange, RangeFetcher};
use crate::index::{BandId, BandSource, TileDescriptor, TileId};
use crate::telemetry::StreamMetrics;

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<TileId, CacheEntry>,
    /// Access tick → tile, oldest first.
    lru: BTreeMap<u64, TileId>,
    size_bytes: u64,
    next_tick: u64,
}

impl CacheState {
    fn tick(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }
}

/// LRU cache of decoded band windows keyed by tile identity.
///
/// All bands of a tile live in one entry and are evicted together. Misses
/// are coalesced per tile so concurrent requests trigger one fetch.
pub struct TileCache {
    state: Mutex<CacheState>,
    max_size_bytes: u64,
    full_fetch_threshold: f64,
    wait_timeout: Duration,
    fetcher: RangeFetcher,
    directories: DirectoryCache,
    coalescer: Arc<RequestCoalescer>,
    metrics: Arc<StreamMetrics>,
    shutdown: CancellationToken,
}

impl TileCache {
    /// Creates a cache.
    ///
    /// # Arguments
    ///
    /// * `config` - Byte budget, full-fetch threshold and wait timeout
    /// * `fetcher` - Fetcher for pixel data
    /// * `directories` - Band directory memo
    /// * `metrics` - Shared counters
    pub fn new(
        config: &StreamingConfig,
        fetcher: RangeFetcher,
        directories: DirectoryCache,
        metrics: Arc<StreamMetrics>,
    ) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            max_size_bytes: config.cache.max_size_bytes,
            full_fetch_threshold: config.streaming.full_fetch_threshold,
            wait_timeout: config.streaming.wait_timeout,
            fetcher,
            directories,
            coalescer: Arc::new(RequestCoalescer::new()),
            metrics,
            shutdown: CancellationToken::new(),
        }
    }

    /// Returns `window` of `band` of `tile`, fetching it if necessary.
    ///
    /// `window` is in the band's pixel space and must lie inside the band.
    #[instrument(level = "debug", skip(self, tile), fields(tile = %tile.id))]
    pub async fn get(
        &self,
        tile: &TileDescriptor,
        band: &BandId,
        window: PixelWindow,
    ) -> Result<PixelView, CacheError> {
        if window.is_empty() {
            return Err(CacheError::EmptyWindow);
        }
        let source = tile.band_source(band).ok_or_else(|| CacheError::UnknownBand {
            tile: tile.id.to_string(),
            band: band.to_string(),
        })?;

        loop {
            if self.shutdown.is_cancelled() {
                return Err(CacheError::ShuttingDown);
            }
            if let Some(view) = self.lookup(&tile.id, band, &window) {
                self.metrics.cache_hit();
                trace!(band = %band, "Cache hit");
                return Ok(view);
            }

            match self.coalescer.register(&tile.id) {
                CoalesceResult::Leader(guard) => {
                    // A previous leader may have stored it since the lookup
                    if let Some(view) = self.lookup(&tile.id, band, &window) {
                        guard.complete(FlightOutcome {
                            band: band.clone(),
                            result: Ok(()),
                        });
                        self.metrics.cache_hit();
                        return Ok(view);
                    }
                    self.metrics.cache_miss();
                    let result = tokio::select! {
                        _ = self.shutdown.cancelled() => Err(CacheError::ShuttingDown),
                        result = self.load(&tile.id, band, &source, window) => result,
                    };
                    guard.complete(FlightOutcome {
                        band: band.clone(),
                        result: result.as_ref().map(|_| ()).map_err(Clone::clone),
                    });
                    return result;
                }
                CoalesceResult::Coalesced(mut rx) => {
                    self.metrics.coalesced_wait();
                    debug!(band = %band, "Waiting for in-flight fetch");
                    let received = tokio::select! {
                        _ = self.shutdown.cancelled() => return Err(CacheError::ShuttingDown),
                        received = tokio::time::timeout(self.wait_timeout, rx.recv()) => received,
                    };
                    match received {
                        Err(_) => {
                            return Err(CacheError::WaitTimeout {
                                tile: tile.id.to_string(),
                                waited: self.wait_timeout,
                            })
                        }
                        Ok(Ok(FlightOutcome {
                            band: fetched,
                            result: Err(err),
                        })) if &fetched == band => return Err(err),
                        // Success, another band, or the leader went away
                        Ok(_) => continue,
                    }
                }
            }
        }
    }

    fn lookup(&self, tile: &TileId, band: &BandId, window: &PixelWindow) -> Option<PixelView> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let tick = state.next_tick + 1;
        let entry = state.entries.get_mut(tile)?;
        let resident = entry.band(band)?;
        if !resident.buffer.covers(window) {
            return None;
        }
        let view = PixelView::new(Arc::clone(&resident.buffer), *window, resident.nodata);

        state.next_tick = tick;
        let previous = entry.touch(tick);
        state.lru.remove(&previous);
        state.lru.insert(tick, tile.clone());
        Some(view)
    }

    /// Fetches and decodes a band window and stores it. Runs as the tile's
    /// coalescing leader.
    async fn load(
        &self,
        tile: &TileId,
        band: &BandId,
        source: &BandSource,
        window: PixelWindow,
    ) -> Result<PixelView, CacheError> {
        let directory = match self.directories.get(&source.location, source.plane).await {
            Ok(directory) => Some(directory),
            Err(DirectoryError::Parse(err)) => {
                debug!(location = %source.location, error = %err, "Directory unusable, reading whole object");
                None
            }
            Err(DirectoryError::Fetch(err)) => return Err(err.into()),
        };

        let (previous, sibling_full) = {
            let state = self.state.lock();
            match state.entries.get(tile) {
                Some(entry) => (
                    entry.band(band).map(|b| b.buffer.window()),
                    entry.has_full_band_besides(band),
                ),
                None => (None, false),
            }
        };
        // Buffers only grow
        let target = previous.map_or(window, |p| p.union(&window));

        let plan = plan_fetch(
            directory.as_deref(),
            &target,
            self.full_fetch_threshold,
            sibling_full,
        );
        debug!(
            band = %band,
            plan = ?plan_kind(&plan),
            planned_bytes = plan.planned_bytes(),
            "Fetching band"
        );

        let resident = match (plan, directory) {
            (FetchPlan::Windowed { window, ranges }, Some(directory)) => {
                self.load_ranges(directory, window, source, &ranges).await?
            }
            (FetchPlan::WholeBand { ranges }, Some(directory)) => {
                let full = directory.full_window();
                self.load_ranges(directory, full, source, &ranges).await?
            }
            _ => self.load_whole_object(source).await?,
        };

        Ok(self.store(tile, band, resident, window))
    }

    async fn load_ranges(
        &self,
        directory: Arc<BandDirectory>,
        window: PixelWindow,
        source: &BandSource,
        ranges: &[ByteRange],
    ) -> Result<ResidentBand, CacheError> {
        let parts = self.fetcher.fetch_ranges(&source.location, ranges).await?;
        let fetched = FetchedBytes::from_parts(parts);
        let registry = self.directories.registry().clone();
        let nodata = directory.nodata;

        let buffer = run_decode(move || assemble_window(&directory, window, &fetched, &registry))
            .await??;
        Ok(ResidentBand {
            buffer: Arc::new(buffer),
            nodata,
        })
    }

    async fn load_whole_object(&self, source: &BandSource) -> Result<ResidentBand, CacheError> {
        let data = self.fetcher.fetch(&source.location, FetchRange::Full).await?;
        let registry = self.directories.registry().clone();
        let plane = source.plane;

        let (buffer, nodata) = run_decode(move || {
            let directory = parse_band_directory(&data, plane, &registry)?;
            let fetched = FetchedBytes::whole(data);
            let buffer =
                assemble_window(&directory, directory.full_window(), &fetched, &registry)?;
            Ok::<_, CacheError>((buffer, directory.nodata))
        })
        .await??;
        Ok(ResidentBand {
            buffer: Arc::new(buffer),
            nodata,
        })
    }

    /// Swaps a band buffer into the tile's entry and evicts down to budget.
    fn store(
        &self,
        tile: &TileId,
        band: &BandId,
        resident: ResidentBand,
        window: PixelWindow,
    ) -> PixelView {
        let bytes = resident.buffer.byte_len();
        let view = PixelView::new(Arc::clone(&resident.buffer), window, resident.nodata);
        if bytes > self.max_size_bytes {
            warn!(
                tile = %tile,
                band = %band,
                bytes,
                budget = self.max_size_bytes,
                "Band buffer exceeds cache budget, not retaining"
            );
            return view;
        }
        if self.shutdown.is_cancelled() {
            return view;
        }

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let tick = state.tick();
        let entry = state
            .entries
            .entry(tile.clone())
            .or_insert_with(|| CacheEntry::new(tile.clone(), tick));
        let previous_tick = entry.touch(tick);
        let replaced = entry.put_band(band.clone(), resident);
        state.lru.remove(&previous_tick);
        state.lru.insert(tick, tile.clone());
        state.size_bytes = state.size_bytes + bytes - replaced;

        debug!(
            tile = %tile,
            band = %band,
            window = %view.buffer().window(),
            bytes,
            cache_bytes = state.size_bytes,
            "Stored band buffer"
        );
        self.evict_to_budget(state);
        view
    }

    fn evict_to_budget(&self, state: &mut CacheState) {
        while state.size_bytes > self.max_size_bytes {
            let Some((_, victim)) = state.lru.pop_first() else {
                break;
            };
            if let Some(entry) = state.entries.remove(&victim) {
                let freed = entry.size_bytes();
                state.size_bytes -= freed;
                self.metrics.evicted(freed);
                debug!(tile = %victim, bytes = freed, "Evicted tile");
            }
        }
    }

    /// True if `window` of `band` is resident. Does not affect LRU order.
    pub fn contains(&self, tile: &TileId, band: &BandId, window: &PixelWindow) -> bool {
        let state = self.state.lock();
        state
            .entries
            .get(tile)
            .and_then(|entry| entry.band(band))
            .is_some_and(|resident| resident.buffer.covers(window))
    }

    pub fn contains_tile(&self, tile: &TileId) -> bool {
        self.state.lock().entries.contains_key(tile)
    }

    /// Resident tiles, least recently used first.
    pub fn lru_order(&self) -> Vec<TileId> {
        let state = self.state.lock();
        debug_assert!(state
            .lru
            .iter()
            .all(|(tick, tile)| state.entries.get(tile).map(CacheEntry::tick) == Some(*tick)));
        state.lru.values().cloned().collect()
    }

    pub fn size_bytes(&self) -> u64 {
        self.state.lock().size_bytes
    }

    pub fn entry_count(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_bytes
    }

    pub fn directories(&self) -> &DirectoryCache {
        &self.directories
    }

    pub fn stats(&self) -> CacheStats {
        let (entries, size_bytes) = {
            let state = self.state.lock();
            (state.entries.len(), state.size_bytes)
        };
        let snapshot = self.metrics.snapshot();
        CacheStats {
            entries,
            size_bytes,
            max_size_bytes: self.max_size_bytes,
            in_flight: self.coalescer.in_flight_count(),
            hits: snapshot.cache_hits,
            misses: snapshot.cache_misses,
            coalesced_waits: snapshot.coalesced_waits,
            evictions: snapshot.evictions,
            bytes_evicted: snapshot.bytes_evicted,
        }
    }

    /// Drops every entry. Outstanding views stay valid.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        let entries = state.entries.len();
        state.entries.clear();
        state.lru.clear();
        state.size_bytes = 0;
        debug!(entries, "Cache cleared");
    }

    /// Cancels waiters, releases all entries and rejects later requests.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.clear();
        self.directories.clear();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

fn plan_kind(plan: &FetchPlan) -> &'static str {
    match plan {
        FetchPlan::WholeObject => "whole_object",
        FetchPlan::WholeBand { .. } => "whole_band",
        FetchPlan::Windowed { .. } => "windowed",
    }
}

/// Runs CPU-bound decoding off the async workers.
async fn run_decode<T, E, F>(decode: F) -> Result<Result<T, E>, CacheError>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    tokio::task::spawn_blocking(decode)
        .await
        .map_err(|e| CacheError::Decode(DecodeError::TaskFailed(e.to_string())))
}
