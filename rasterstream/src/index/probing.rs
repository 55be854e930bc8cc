//! Catalog discovered from object names and tile headers.
//!
//! Objects under a prefix are matched against a naming pattern with `tile`,
//! `date` and `band` capture groups. For each tile only the newest date is
//! kept; its first band's header is then parsed to learn the pixel grid. The
//! resulting index is built once on first use. A store failure while
//! building leaves the index unbuilt so the next lookup tries again.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use regex::Regex;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::types::{BandId, TileDescriptor, TileId, TileLocation};
use super::{Catalog, CatalogError};
use crate::coord::{parse_mgrs_tile_id, Bounds, RasterGrid};
use crate::directory::{DirectoryCache, DirectoryError};
use crate::fetch::{BoxFuture, ObjectLocation, ObjectStore};

/// Sentinel-2 style names: `33TUM_20230614_B04.tif`.
pub const DEFAULT_TILE_PATTERN: &str =
    r"(?P<tile>\d{2}[A-Z]{3})_(?P<date>\d{8})_(?P<band>B\d{2}[A-Z]?)\.tif$";

/// Tiles probed concurrently while building the index.
pub const DEFAULT_PROBE_CONCURRENCY: usize = 8;

/// Objects of the newest acquisition of one tile.
#[derive(Debug, Clone)]
struct Acquisition {
    date: NaiveDate,
    bands: BTreeMap<BandId, ObjectLocation>,
}

/// A probed tile with its WGS84 footprint, when it can be computed.
#[derive(Debug, Clone)]
struct IndexedTile {
    footprint: Option<Bounds>,
    tile: TileDescriptor,
}

impl IndexedTile {
    fn new(tile: TileDescriptor) -> Self {
        let footprint = tile.wgs84_bounds().ok();
        Self { footprint, tile }
    }

    /// Tiles without a footprint are passed on for the index to report.
    fn may_intersect(&self, region: &Bounds) -> bool {
        self.footprint.map_or(true, |footprint| footprint.intersects(region))
    }
}

/// Catalog that lists and probes an object store.
pub struct ProbingCatalog {
    store: Arc<dyn ObjectStore>,
    directories: DirectoryCache,
    prefix: String,
    pattern: Regex,
    tiles: OnceCell<Vec<IndexedTile>>,
}

impl ProbingCatalog {
    /// Creates a catalog using [`DEFAULT_TILE_PATTERN`].
    ///
    /// # Arguments
    ///
    /// * `store` - Store to list
    /// * `directories` - Directory cache used to probe headers
    /// * `prefix` - Key prefix to list, e.g. an acquisition period
    pub fn new(
        store: Arc<dyn ObjectStore>,
        directories: DirectoryCache,
        prefix: impl Into<String>,
    ) -> Result<Self, CatalogError> {
        Self::with_pattern(store, directories, prefix, DEFAULT_TILE_PATTERN)
    }

    /// Creates a catalog with a custom naming pattern.
    ///
    /// The pattern must define the `tile`, `date` (`YYYYMMDD`) and `band`
    /// capture groups.
    pub fn with_pattern(
        store: Arc<dyn ObjectStore>,
        directories: DirectoryCache,
        prefix: impl Into<String>,
        pattern: &str,
    ) -> Result<Self, CatalogError> {
        let pattern = Regex::new(pattern).map_err(|e| CatalogError::Pattern(e.to_string()))?;
        for group in ["tile", "date", "band"] {
            if !pattern.capture_names().flatten().any(|name| name == group) {
                return Err(CatalogError::Pattern(format!(
                    "pattern lacks a `{group}` capture group"
                )));
            }
        }
        Ok(Self {
            store,
            directories,
            prefix: prefix.into(),
            pattern,
            tiles: OnceCell::new(),
        })
    }

    /// Number of indexed tiles, if the index has been built.
    pub fn indexed_len(&self) -> Option<usize> {
        self.tiles.get().map(Vec::len)
    }

    /// Groups listed objects by tile, keeping each tile's newest date.
    fn newest_acquisitions<'a>(
        &self,
        locations: impl IntoIterator<Item = &'a ObjectLocation>,
    ) -> BTreeMap<TileId, Acquisition> {
        let mut tiles: BTreeMap<TileId, Acquisition> = BTreeMap::new();
        for location in locations {
            let Some(caps) = self.pattern.captures(location.as_str()) else {
                continue;
            };
            let (Some(tile), Some(date), Some(band)) =
                (caps.name("tile"), caps.name("date"), caps.name("band"))
            else {
                continue;
            };
            let Ok(date) = NaiveDate::parse_from_str(date.as_str(), "%Y%m%d") else {
                debug!(location = %location, "Skipping object with invalid date");
                continue;
            };

            let entry = tiles
                .entry(TileId::new(tile.as_str()))
                .or_insert_with(|| Acquisition {
                    date,
                    bands: BTreeMap::new(),
                });
            if date > entry.date {
                entry.date = date;
                entry.bands.clear();
            }
            if date == entry.date {
                entry
                    .bands
                    .insert(BandId::new(band.as_str()), location.clone());
            }
        }
        tiles
    }

    /// Describes one tile from its first band's header.
    ///
    /// Unusable headers skip the tile; store failures abort the build.
    async fn probe(
        &self,
        tile: TileId,
        acquisition: Acquisition,
    ) -> Result<Option<TileDescriptor>, CatalogError> {
        let Some((_, first)) = acquisition.bands.iter().next() else {
            return Ok(None);
        };
        let directory = match self.directories.get(first, 0).await {
            Ok(directory) => directory,
            Err(DirectoryError::Fetch(err)) => return Err(CatalogError::Store(err)),
            Err(DirectoryError::Parse(err)) => {
                warn!(tile = %tile, location = %first, error = %err, "Cannot parse tile header");
                return Ok(None);
            }
        };
        let Some(georef) = directory.georef else {
            warn!(tile = %tile, location = %first, "Tile header has no georeferencing");
            return Ok(None);
        };
        let crs = match georef.crs {
            Some(crs) => crs,
            None => match parse_mgrs_tile_id(tile.as_str()) {
                Ok(mgrs) => mgrs.utm_crs(),
                Err(_) => {
                    warn!(tile = %tile, "Tile has no CRS in its header or its name");
                    return Ok(None);
                }
            },
        };

        let grid = RasterGrid::new(crs, georef.transform, directory.width, directory.height);
        let acquired_at: DateTime<Utc> = acquisition.date.and_time(NaiveTime::MIN).and_utc();
        Ok(Some(TileDescriptor::new(
            tile,
            grid,
            acquired_at,
            TileLocation::PerBand(acquisition.bands),
        )))
    }

    async fn build_index(&self) -> Result<Vec<IndexedTile>, CatalogError> {
        let listing = self.store.list(&self.prefix).await?;
        let acquisitions = self.newest_acquisitions(listing.iter().map(|meta| &meta.location));
        let candidates = acquisitions.len();

        let probed: Vec<Option<TileDescriptor>> = stream::iter(acquisitions)
            .map(|(tile, acquisition)| self.probe(tile, acquisition))
            .buffer_unordered(DEFAULT_PROBE_CONCURRENCY)
            .try_collect()
            .await?;
        let mut tiles: Vec<IndexedTile> =
            probed.into_iter().flatten().map(IndexedTile::new).collect();
        tiles.sort_by(|a, b| a.tile.id.cmp(&b.tile.id));

        info!(
            prefix = %self.prefix,
            objects = listing.len(),
            candidates,
            tiles = tiles.len(),
            "Built tile index from object listing"
        );
        Ok(tiles)
    }
}

impl Catalog for ProbingCatalog {
    fn list_tiles<'a>(
        &'a self,
        region: &'a Bounds,
    ) -> BoxFuture<'a, Result<Vec<TileDescriptor>, CatalogError>> {
        Box::pin(async move {
            let tiles = self.tiles.get_or_try_init(|| self.build_index()).await?;
            Ok(tiles
                .iter()
                .filter(|indexed| indexed.may_intersect(region))
                .map(|indexed| indexed.tile.clone())
                .collect())
        })
    }

    fn name(&self) -> &str {
        "probing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FetchConfig;
    use crate::coord::{Crs, GeoTransform};
    use crate::decode::DecoderRegistry;
    use crate::directory::HeaderProbe;
    use crate::fetch::{MemoryObjectStore, RangeFetcher, RetryPolicy};
    use crate::telemetry::StreamMetrics;
    use crate::testing::TiffBuilder;

    fn catalog(store: Arc<MemoryObjectStore>, prefix: &str) -> ProbingCatalog {
        let config = FetchConfig::default().with_retry(RetryPolicy::None);
        let metrics = Arc::new(StreamMetrics::new());
        let fetcher = RangeFetcher::new(store.clone(), &config, metrics.clone());
        let directories = DirectoryCache::new(
            fetcher,
            DecoderRegistry::default(),
            HeaderProbe::from(&config),
            100,
            metrics,
        );
        ProbingCatalog::new(store, directories, prefix).unwrap()
    }

    fn tile_bytes(crs: Option<Crs>) -> Vec<u8> {
        let transform = GeoTransform::north_up(500_000.0, 5_000_000.0, 10.0, 10.0);
        let builder = TiffBuilder::new(64, 64);
        match crs {
            Some(crs) => builder.georeferenced(crs, transform).build(),
            None => builder.build(),
        }
    }

    #[tokio::test]
    async fn test_newest_date_per_tile() {
        let store = Arc::new(MemoryObjectStore::new());
        for name in [
            "s2/33TUM_20230601_B04.tif",
            "s2/33TUM_20230601_B08.tif",
            "s2/33TUM_20230614_B04.tif",
            "s2/33TUM_20230614_B08.tif",
            "s2/33TUM_20230614_B8A.tif",
            "s2/32TQR_20230520_B04.tif",
            "s2/readme.txt",
        ] {
            store.insert(name, tile_bytes(Some(Crs::epsg(32633))));
        }
        let catalog = catalog(store, "s2/");

        let tiles = catalog
            .list_tiles(&Bounds::new(-180.0, -90.0, 180.0, 90.0))
            .await
            .unwrap();
        assert_eq!(tiles.len(), 2);
        assert_eq!(tiles[0].id.as_str(), "32TQR");
        let tum = &tiles[1];
        assert_eq!(tum.acquired_at.format("%Y%m%d").to_string(), "20230614");
        assert_eq!(tum.bands.len(), 3);
        assert_eq!(
            tum.band_source(&"B08".into()).unwrap().location.as_str(),
            "s2/33TUM_20230614_B08.tif"
        );
        assert_eq!((tum.grid.width, tum.grid.height), (64, 64));
    }

    #[tokio::test]
    async fn test_index_built_once() {
        let store = Arc::new(MemoryObjectStore::new());
        store.insert("33TUM_20230614_B04.tif", tile_bytes(Some(Crs::epsg(32633))));
        let catalog = catalog(store.clone(), "");
        let region = Bounds::new(-180.0, -90.0, 180.0, 90.0);

        catalog.list_tiles(&region).await.unwrap();
        let after_first = store.total_requests();
        catalog.list_tiles(&region).await.unwrap();
        assert_eq!(store.total_requests(), after_first);
        assert_eq!(catalog.indexed_len(), Some(1));
    }

    #[tokio::test]
    async fn test_crs_from_tile_name_when_header_lacks_it() {
        let store = Arc::new(MemoryObjectStore::new());
        // Georeferenced but with a user-defined CRS code
        store.insert("33TUM_20230614_B04.tif", tile_bytes(Some(Crs::epsg(32767))));
        let tiles = catalog(store, "")
            .list_tiles(&Bounds::new(-180.0, -90.0, 180.0, 90.0))
            .await
            .unwrap();
        assert_eq!(tiles[0].crs(), Crs::epsg(32633));
    }

    #[tokio::test]
    async fn test_unreferenced_tiles_skipped() {
        let store = Arc::new(MemoryObjectStore::new());
        store.insert("33TUM_20230614_B04.tif", tile_bytes(None));
        let tiles = catalog(store, "")
            .list_tiles(&Bounds::new(-180.0, -90.0, 180.0, 90.0))
            .await
            .unwrap();
        assert!(tiles.is_empty());
    }

    #[test]
    fn test_pattern_requires_groups() {
        let store = Arc::new(MemoryObjectStore::new());
        let config = FetchConfig::default();
        let metrics = Arc::new(StreamMetrics::new());
        let directories = DirectoryCache::new(
            RangeFetcher::new(store.clone(), &config, metrics.clone()),
            DecoderRegistry::default(),
            HeaderProbe::from(&config),
            10,
            metrics,
        );
        let result = ProbingCatalog::with_pattern(store, directories, "", r"(?P<tile>\w+)\.tif");
        assert!(matches!(result, Err(CatalogError::Pattern(_))));
    }
}
