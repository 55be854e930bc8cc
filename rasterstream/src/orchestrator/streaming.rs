//! Parcel resolution over the tile cache.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, instrument, warn};

use super::grid::{grid_offset, OutputGrid, Placement};
use super::types::{
    BandRaster, ContributionOutcome, CoverageGap, Parcel, ParcelOutcome, ParcelReport,
    ParcelWindowResult, ResolveError, TileContribution, TileFailure,
};
use crate::cache::{CacheStats, PixelView, TileCache};
use crate::config::{ConfigError, StreamingConfig};
use crate::coord::{window_for, Crs, PixelWindow, TileWindow};
use crate::decode::DecoderRegistry;
use crate::directory::{DirectoryCache, HeaderProbe};
use crate::fetch::{ObjectStore, RangeFetcher};
use crate::index::{BandId, Catalog, TileDescriptor, TileIndex};
use crate::telemetry::{MetricsSnapshot, StreamMetrics};

/// Resolves parcels to pixel windows.
///
/// Built once per process from a [`StreamingConfig`]; all parcels share one
/// tile cache, so tiles are fetched once no matter how many parcels land in
/// them.
pub struct StreamingOrchestrator {
    config: StreamingConfig,
    index: TileIndex,
    cache: Arc<TileCache>,
    metrics: Arc<StreamMetrics>,
}

impl StreamingOrchestrator {
    /// Creates an orchestrator with the built-in block decoders.
    ///
    /// # Arguments
    ///
    /// * `config` - Validated before use
    /// * `catalog` - Tile metadata source
    /// * `store` - Where tile objects live
    pub fn new(
        config: StreamingConfig,
        catalog: Arc<dyn Catalog>,
        store: Arc<dyn ObjectStore>,
    ) -> Result<Self, ConfigError> {
        Self::with_registry(config, catalog, store, DecoderRegistry::default())
    }

    /// Creates an orchestrator with a custom decoder registry.
    pub fn with_registry(
        config: StreamingConfig,
        catalog: Arc<dyn Catalog>,
        store: Arc<dyn ObjectStore>,
        registry: DecoderRegistry,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        info!(
            catalog = catalog.name(),
            store = store.name(),
            cache_bytes = config.cache.max_size_bytes,
            workers = config.streaming.worker_pool_size,
            full_fetch_threshold = config.streaming.full_fetch_threshold,
            "Starting streaming orchestrator"
        );

        let metrics = Arc::new(StreamMetrics::new());
        let fetcher = RangeFetcher::new(store, &config.fetch, Arc::clone(&metrics));
        let directories = DirectoryCache::new(
            fetcher.clone(),
            registry,
            HeaderProbe::from(&config.fetch),
            config.cache.directory_capacity,
            Arc::clone(&metrics),
        );
        let cache = Arc::new(TileCache::new(
            &config,
            fetcher,
            directories,
            Arc::clone(&metrics),
        ));

        Ok(Self {
            config,
            index: TileIndex::new(catalog),
            cache,
            metrics,
        })
    }

    /// Pixels of `bands` for `parcel`, merged onto one grid.
    ///
    /// Tiles that fail are recorded in the result; the parcel fails only
    /// when the catalog is unavailable or every intersecting tile fails.
    #[instrument(level = "debug", skip(self, parcel, bands), fields(parcel = %parcel.id))]
    pub async fn resolve(
        &self,
        parcel: &Parcel,
        bands: &[BandId],
    ) -> Result<ParcelOutcome, ResolveError> {
        if self.cache.is_shut_down() {
            return Err(ResolveError::ShuttingDown);
        }
        let region = parcel
            .bounds()
            .ok_or_else(|| ResolveError::EmptyParcel(parcel.id.clone()))?;

        let tiles = self.index.tiles_for(&region).await?;
        if tiles.is_empty() {
            debug!(region = %region, "No tiles cover parcel");
            return Ok(ParcelOutcome::NoSourceData);
        }

        let padding = self.config.streaming.window_padding;
        let mut contributions = Vec::new();
        let mut candidates: Vec<(&TileDescriptor, PixelWindow)> = Vec::new();
        for tile in &tiles {
            match window_for(&tile.grid, &region, Crs::WGS84, padding) {
                Ok(TileWindow::Intersecting(window)) => candidates.push((tile, window)),
                Ok(TileWindow::NotIntersecting) => {}
                Err(err) => {
                    warn!(tile = %tile.id, error = %err, "Cannot map parcel into tile");
                    contributions.push(failed(tile, None, err.into()));
                }
            }
        }

        // Largest overlap wins; the first listed on ties
        let Some(&(reference, _)) = candidates
            .iter()
            .rev()
            .max_by_key(|(_, window)| window.pixel_count())
        else {
            if contributions.is_empty() {
                return Ok(ParcelOutcome::NoSourceData);
            }
            return Err(ResolveError::AllTilesFailed {
                parcel: parcel.id.clone(),
                failures: contributions,
            });
        };

        let out = OutputGrid::covering(&reference.grid, &region, padding).map_err(|source| {
            ResolveError::Coord {
                parcel: parcel.id.clone(),
                source,
            }
        })?;
        let polygon_mask = out
            .polygon_mask(&parcel.geometry)
            .map_err(|source| ResolveError::Coord {
                parcel: parcel.id.clone(),
                source,
            })?;

        let mut covered = vec![false; out.pixel_count()];
        let mut planned = Vec::new();
        for (tile, window) in &candidates {
            match grid_offset(&reference.grid, &tile.grid) {
                Ok(offset) => {
                    if let Some(placement) = out.placement(offset, &tile.grid) {
                        mark(&mut covered, out.grid.width, &placement);
                        planned.push((*tile, placement));
                    }
                }
                Err(reason) => {
                    warn!(tile = %tile.id, reason = %reason, "Tile not on output grid");
                    out.mark_footprint(&tile.bounds, tile.crs(), &mut covered);
                    contributions.push(failed(tile, Some(*window), TileFailure::GridMismatch(reason)));
                }
            }
        }

        let fetched = futures::future::join_all(planned.iter().map(|(tile, placement)| async move {
            let result = self.fetch_tile(tile, placement.window, bands).await;
            (*tile, *placement, result)
        }))
        .await;

        let (width, height) = (out.grid.width, out.grid.height);
        let mut rasters: BTreeMap<BandId, BandRaster> = bands
            .iter()
            .map(|band| (band.clone(), BandRaster::empty(width, height)))
            .collect();
        let mut valid = vec![false; out.pixel_count()];

        for (tile, placement, result) in fetched {
            match result {
                Ok(views) => {
                    for (band, view) in &views {
                        if let Some(raster) = rasters.get_mut(band) {
                            place(raster, view, &placement);
                            raster.nodata = raster.nodata.or(view.nodata());
                        }
                    }
                    mark(&mut valid, width, &placement);
                    contributions.push(TileContribution {
                        tile: tile.id.clone(),
                        window: Some(placement.window),
                        outcome: ContributionOutcome::Contributed {
                            pixels: placement.window.pixel_count(),
                        },
                    });
                }
                Err(failure) => {
                    warn!(tile = %tile.id, error = %failure, "Tile contribution failed");
                    contributions.push(failed(tile, Some(placement.window), failure));
                }
            }
        }
        contributions.sort_by(|a, b| a.tile.cmp(&b.tile));

        if !contributions.iter().any(TileContribution::is_success) {
            if self.cache.is_shut_down() {
                return Err(ResolveError::ShuttingDown);
            }
            return Err(ResolveError::AllTilesFailed {
                parcel: parcel.id.clone(),
                failures: contributions,
            });
        }

        let coverage_gap = out
            .uncovered_core(&covered)
            .map(|(uncovered_pixels, region)| CoverageGap {
                uncovered_pixels,
                total_pixels: out.core.pixel_count(),
                region,
            });
        if let Some(gap) = &coverage_gap {
            debug!(
                uncovered = gap.uncovered_pixels,
                total = gap.total_pixels,
                "Parcel extends beyond indexed tiles"
            );
        }

        debug!(
            reference = %reference.id,
            width,
            height,
            tiles = contributions.len(),
            "Parcel resolved"
        );
        Ok(ParcelOutcome::Resolved(ParcelWindowResult {
            parcel_id: parcel.id.clone(),
            grid: out.grid,
            bands: rasters,
            valid,
            polygon_mask,
            contributions,
            coverage_gap,
        }))
    }

    /// Reads every band of one tile window.
    async fn fetch_tile(
        &self,
        tile: &TileDescriptor,
        window: PixelWindow,
        bands: &[BandId],
    ) -> Result<Vec<(BandId, PixelView)>, TileFailure> {
        let mut views = Vec::with_capacity(bands.len());
        for band in bands {
            let view = self.cache.get(tile, band, window).await?;
            let (band_width, band_height) = view.band_size();
            if (band_width, band_height) != (tile.grid.width, tile.grid.height) {
                return Err(TileFailure::GridMismatch(format!(
                    "band {band} is {band_width}x{band_height}, tile grid is {}x{}",
                    tile.grid.width, tile.grid.height
                )));
            }
            views.push((band.clone(), view));
        }
        Ok(views)
    }

    /// Resolves `parcels` with at most `worker_pool_size` in flight.
    ///
    /// Reports come back in input order. One parcel failing never stops the
    /// others.
    pub async fn resolve_batch(&self, parcels: &[Parcel], bands: &[BandId]) -> Vec<ParcelReport> {
        let workers = self.config.streaming.worker_pool_size.max(1);
        let started = Instant::now();
        info!(parcels = parcels.len(), workers, "Resolving parcel batch");

        let mut reports: Vec<(usize, ParcelReport)> = stream::iter(parcels.iter().enumerate())
            .map(|(i, parcel)| async move {
                let start = Instant::now();
                let outcome = self.resolve(parcel, bands).await;
                if let Err(err) = &outcome {
                    warn!(parcel = %parcel.id, error = %err, "Parcel failed");
                }
                let report = ParcelReport {
                    parcel_id: parcel.id.clone(),
                    outcome,
                    elapsed: start.elapsed(),
                };
                (i, report)
            })
            .buffer_unordered(workers)
            .collect()
            .await;
        reports.sort_by_key(|(i, _)| *i);

        let failed = reports.iter().filter(|(_, r)| r.outcome.is_err()).count();
        let empty = reports
            .iter()
            .filter(|(_, r)| matches!(r.outcome, Ok(ParcelOutcome::NoSourceData)))
            .count();
        info!(
            parcels = reports.len(),
            failed,
            no_source_data = empty,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Batch complete"
        );
        reports.into_iter().map(|(_, report)| report).collect()
    }

    /// Cancels waiting requests and releases cached pixels. Later calls fail
    /// with [`ResolveError::ShuttingDown`].
    pub fn shutdown(&self) {
        let stats = self.cache.stats();
        self.cache.shutdown();
        info!(
            released_bytes = stats.size_bytes,
            metrics = %self.metrics.snapshot(),
            "Streaming orchestrator shut down"
        );
    }

    pub fn is_shut_down(&self) -> bool {
        self.cache.is_shut_down()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn cache(&self) -> &TileCache {
        &self.cache
    }

    pub fn index(&self) -> &TileIndex {
        &self.index
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }
}

fn failed(tile: &TileDescriptor, window: Option<PixelWindow>, failure: TileFailure) -> TileContribution {
    TileContribution {
        tile: tile.id.clone(),
        window,
        outcome: ContributionOutcome::Failed(failure),
    }
}

/// Sets the placement's output rectangle in a row-major mask.
fn mark(mask: &mut [bool], width: u32, placement: &Placement) {
    let w = placement.window;
    for row in placement.out_row..placement.out_row + w.height {
        let start = (row * width + placement.out_col) as usize;
        mask[start..start + w.width as usize].fill(true);
    }
}

/// Copies a tile window's samples into the output raster.
fn place(raster: &mut BandRaster, view: &PixelView, placement: &Placement) {
    let sample_type = view.sample_type();
    let bps = sample_type.bytes_per_sample();
    let w = placement.window;
    for r in 0..w.height {
        let Some(bytes) = view.row(w.row + r) else {
            continue;
        };
        let start = ((placement.out_row + r) * raster.width + placement.out_col) as usize;
        for (dst, sample) in raster.data[start..start + w.width as usize]
            .iter_mut()
            .zip(bytes.chunks_exact(bps))
        {
            *dst = sample_type.read_le(sample);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::{Bounds, GeoTransform, RasterGrid};
    use crate::fetch::MemoryObjectStore;
    use crate::index::{ManifestCatalog, TileLocation};
    use crate::testing::{gradient_at, TiffBuilder};
    use chrono::{DateTime, Utc};

    fn tile(id: &str, lon: f64) -> TileDescriptor {
        let grid = RasterGrid::new(
            Crs::WGS84,
            GeoTransform::north_up(lon, 51.0, 0.125, 0.125),
            64,
            64,
        );
        let objects = [(BandId::from("B04"), format!("{id}_B04.tif").into())]
            .into_iter()
            .collect();
        TileDescriptor::new(id.into(), grid, DateTime::<Utc>::UNIX_EPOCH, TileLocation::PerBand(objects))
    }

    fn orchestrator(tiles: Vec<TileDescriptor>) -> (StreamingOrchestrator, Arc<MemoryObjectStore>) {
        let store = Arc::new(MemoryObjectStore::new());
        for t in &tiles {
            let tiff = TiffBuilder::new(64, 64).tiled(16, 16).build();
            store.insert(format!("{}_B04.tif", t.id), tiff);
        }
        let orchestrator = StreamingOrchestrator::new(
            StreamingConfig::default(),
            Arc::new(ManifestCatalog::new(tiles)),
            store.clone(),
        )
        .unwrap();
        (orchestrator, store)
    }

    #[tokio::test]
    async fn test_resolve_single_tile() {
        let (orchestrator, _) = orchestrator(vec![tile("T1", 10.0)]);
        // Columns 8..12, rows 4..6
        let parcel = Parcel::from_bounds("p1", Bounds::new(11.0, 50.25, 11.5, 50.5));

        let outcome = orchestrator.resolve(&parcel, &["B04".into()]).await.unwrap();
        let result = outcome.into_resolved().unwrap();
        assert_eq!((result.width(), result.height()), (4, 2));
        let b04 = result.band(&"B04".into()).unwrap();
        assert_eq!(b04.get(0, 0), Some(gradient_at(4, 8, 0)));
        assert_eq!(b04.get(1, 3), Some(gradient_at(5, 11, 0)));
        assert!(result.is_complete());
        assert_eq!(result.valid_count(), 8);
        assert!(result.polygon_mask.iter().all(|&inside| inside));
    }

    #[tokio::test]
    async fn test_no_tiles_is_no_source_data() {
        let (orchestrator, store) = orchestrator(vec![tile("T1", 10.0)]);
        let parcel = Parcel::from_bounds("p1", Bounds::new(100.0, 10.0, 100.1, 10.1));
        let outcome = orchestrator.resolve(&parcel, &["B04".into()]).await.unwrap();
        assert!(outcome.is_no_source_data());
        assert_eq!(store.total_requests(), 0);
    }

    #[tokio::test]
    async fn test_unknown_band_fails_parcel() {
        let (orchestrator, _) = orchestrator(vec![tile("T1", 10.0)]);
        let parcel = Parcel::from_bounds("p1", Bounds::new(11.0, 50.25, 11.5, 50.5));
        let err = orchestrator.resolve(&parcel, &["B12".into()]).await.unwrap_err();
        assert!(matches!(err, ResolveError::AllTilesFailed { ref failures, .. } if failures.len() == 1));
    }

    #[tokio::test]
    async fn test_resolve_after_shutdown() {
        let (orchestrator, _) = orchestrator(vec![tile("T1", 10.0)]);
        orchestrator.shutdown();
        let parcel = Parcel::from_bounds("p1", Bounds::new(11.0, 50.25, 11.5, 50.5));
        let err = orchestrator.resolve(&parcel, &["B04".into()]).await.unwrap_err();
        assert_eq!(err, ResolveError::ShuttingDown);
        assert!(orchestrator.is_shut_down());
    }

    #[tokio::test]
    async fn test_batch_reports_in_input_order() {
        let (orchestrator, _) = orchestrator(vec![tile("T1", 10.0)]);
        let parcels = vec![
            Parcel::from_bounds("inside", Bounds::new(11.0, 50.25, 11.5, 50.5)),
            Parcel::from_bounds("outside", Bounds::new(100.0, 10.0, 100.1, 10.1)),
            Parcel::new("empty", geo::MultiPolygon::<f64>::new(vec![])),
        ];

        let reports = orchestrator.resolve_batch(&parcels, &["B04".into()]).await;
        let ids: Vec<_> = reports.iter().map(|r| r.parcel_id.as_str()).collect();
        assert_eq!(ids, vec!["inside", "outside", "empty"]);
        assert!(matches!(reports[0].outcome, Ok(ParcelOutcome::Resolved(_))));
        assert!(matches!(reports[1].outcome, Ok(ParcelOutcome::NoSourceData)));
        assert!(matches!(reports[2].outcome, Err(ResolveError::EmptyParcel(_))));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = StreamingConfig::default().with_worker_pool_size(0);
        let result = StreamingOrchestrator::new(
            config,
            Arc::new(ManifestCatalog::default()),
            Arc::new(MemoryObjectStore::new()),
        );
        assert!(result.is_err());
    }
}
