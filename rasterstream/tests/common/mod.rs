//! Shared fixtures for integration tests.
//!
//! Tiles sit on a WGS84 lattice of 1/8 degree pixels so window arithmetic is
//! exact. Adjacent tiles use `pixel_offset` so the fixture pattern runs
//! continuously across tile edges: output pixel (r, c) on the lattice of a
//! tile anchored at [`ORIGIN_LON`] always holds `gradient_at(r, c, seed)`.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rasterstream::coord::{Bounds, Crs, GeoTransform, RasterGrid};
use rasterstream::fetch::MemoryObjectStore;
use rasterstream::index::{BandId, ManifestCatalog, TileDescriptor, TileLocation};
use rasterstream::testing::{gradient_at, TiffBuilder};
use rasterstream::{StreamingConfig, StreamingOrchestrator};

pub const PIXEL_DEG: f64 = 0.125;
pub const ORIGIN_LON: f64 = 10.0;
pub const ORIGIN_LAT: f64 = 51.0;
pub const TILE_PX: u32 = 64;

/// Tile `index` columns of tiles east of the origin, one object per band.
pub fn tile(id: &str, index: u32, bands: &[&str]) -> TileDescriptor {
    let lon = ORIGIN_LON + f64::from(index * TILE_PX) * PIXEL_DEG;
    let grid = RasterGrid::new(
        Crs::WGS84,
        GeoTransform::north_up(lon, ORIGIN_LAT, PIXEL_DEG, PIXEL_DEG),
        TILE_PX,
        TILE_PX,
    );
    let objects: BTreeMap<BandId, _> = bands
        .iter()
        .map(|band| (BandId::from(*band), format!("{id}_{band}.tif").into()))
        .collect();
    TileDescriptor::new(
        id.into(),
        grid,
        DateTime::<Utc>::UNIX_EPOCH,
        TileLocation::PerBand(objects),
    )
}

/// Writes every band of `tile` to `store`. Band `i` uses seed `i`.
pub fn store_tile(store: &MemoryObjectStore, tile: &TileDescriptor, index: u32, builder: &TiffBuilder) {
    for (i, band) in tile.location.bands().iter().enumerate() {
        let Some(source) = tile.band_source(band) else {
            continue;
        };
        let bytes = builder
            .clone()
            .seed(i as u32)
            .pixel_offset(0, index * TILE_PX)
            .build();
        store.insert(source.location, bytes);
    }
}

/// Default fixture TIFF for a tile.
pub fn fixture() -> TiffBuilder {
    TiffBuilder::new(TILE_PX, TILE_PX).tiled(16, 16)
}

/// WGS84 bounds of reference-lattice pixels `rows` x `cols`.
pub fn pixel_bounds(rows: std::ops::Range<u32>, cols: std::ops::Range<u32>) -> Bounds {
    Bounds::new(
        ORIGIN_LON + f64::from(cols.start) * PIXEL_DEG,
        ORIGIN_LAT - f64::from(rows.end) * PIXEL_DEG,
        ORIGIN_LON + f64::from(cols.end) * PIXEL_DEG,
        ORIGIN_LAT - f64::from(rows.start) * PIXEL_DEG,
    )
}

/// Expected samples of lattice pixels `rows` x `cols`, row-major.
pub fn expected(rows: std::ops::Range<u32>, cols: std::ops::Range<u32>, seed: u32) -> Vec<f64> {
    rows.flat_map(|r| cols.clone().map(move |c| gradient_at(r, c, seed)))
        .collect()
}

pub fn orchestrator(
    store: Arc<MemoryObjectStore>,
    tiles: Vec<TileDescriptor>,
    config: StreamingConfig,
) -> StreamingOrchestrator {
    StreamingOrchestrator::new(config, Arc::new(ManifestCatalog::new(tiles)), store)
        .expect("valid config")
}
