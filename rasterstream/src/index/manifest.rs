//! Catalog backed by a static JSON manifest.
//!
//! ```json
//! {
//!   "tiles": [
//!     {
//!       "id": "33TUM",
//!       "crs": 32633,
//!       "transform": [300000.0, 10.0, 0.0, 5100000.0, 0.0, -10.0],
//!       "width": 10980,
//!       "height": 10980,
//!       "acquired_at": "2023-06-14T10:05:59Z",
//!       "location": { "B04": "2023-06/33TUM_20230614_B04.tif" }
//!     }
//!   ]
//! }
//! ```
//!
//! `location` is either a band → object map or
//! `{ "object": "...", "bands": ["B02", ...] }` for planar multi-band objects.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{TileDescriptor, TileId, TileLocation};
use super::{Catalog, CatalogError};
use crate::coord::{Bounds, Crs, GeoTransform, RasterGrid};
use crate::fetch::BoxFuture;

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    tiles: Vec<ManifestTile>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ManifestTile {
    id: TileId,
    crs: Crs,
    transform: GeoTransform,
    width: u32,
    height: u32,
    acquired_at: DateTime<Utc>,
    location: TileLocation,
}

impl From<ManifestTile> for TileDescriptor {
    fn from(tile: ManifestTile) -> Self {
        let grid = RasterGrid::new(tile.crs, tile.transform, tile.width, tile.height);
        TileDescriptor::new(tile.id, grid, tile.acquired_at, tile.location)
    }
}

impl From<&TileDescriptor> for ManifestTile {
    fn from(tile: &TileDescriptor) -> Self {
        Self {
            id: tile.id.clone(),
            crs: tile.grid.crs,
            transform: tile.grid.transform,
            width: tile.grid.width,
            height: tile.grid.height,
            acquired_at: tile.acquired_at,
            location: tile.location.clone(),
        }
    }
}

/// In-memory catalog of known tiles.
#[derive(Debug, Clone, Default)]
pub struct ManifestCatalog {
    tiles: Vec<TileDescriptor>,
}

impl ManifestCatalog {
    pub fn new(tiles: Vec<TileDescriptor>) -> Self {
        Self { tiles }
    }

    pub fn from_json_str(json: &str) -> Result<Self, CatalogError> {
        let manifest: Manifest =
            serde_json::from_str(json).map_err(|e| CatalogError::Manifest(e.to_string()))?;
        Ok(Self::new(manifest.tiles.into_iter().map(Into::into).collect()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| CatalogError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json_str(&json)
    }

    /// Serializes the catalog in manifest form.
    pub fn to_json_string(&self) -> Result<String, CatalogError> {
        let manifest = Manifest {
            tiles: self.tiles.iter().map(ManifestTile::from).collect(),
        };
        serde_json::to_string_pretty(&manifest).map_err(|e| CatalogError::Manifest(e.to_string()))
    }

    pub fn tiles(&self) -> &[TileDescriptor] {
        &self.tiles
    }
}

impl Catalog for ManifestCatalog {
    fn list_tiles<'a>(
        &'a self,
        _region: &'a Bounds,
    ) -> BoxFuture<'a, Result<Vec<TileDescriptor>, CatalogError>> {
        Box::pin(async move { Ok(self.tiles.clone()) })
    }

    fn name(&self) -> &str {
        "manifest"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::BandId;

    const MANIFEST: &str = r#"{
        "tiles": [
            {
                "id": "33TUM",
                "crs": 32633,
                "transform": [300000.0, 10.0, 0.0, 5100000.0, 0.0, -10.0],
                "width": 10980,
                "height": 10980,
                "acquired_at": "2023-06-14T10:05:59Z",
                "location": { "B04": "2023-06/33TUM_20230614_B04.tif", "B08": "2023-06/33TUM_20230614_B08.tif" }
            },
            {
                "id": "33TVM",
                "crs": 32633,
                "transform": [400000.0, 10.0, 0.0, 5100000.0, 0.0, -10.0],
                "width": 10980,
                "height": 10980,
                "acquired_at": "2023-06-14T10:05:59Z",
                "location": { "object": "stack/33TVM.tif", "bands": ["B04", "B08"] }
            }
        ]
    }"#;

    #[test]
    fn test_parse_manifest() {
        let catalog = ManifestCatalog::from_json_str(MANIFEST).unwrap();
        let tiles = catalog.tiles();
        assert_eq!(tiles.len(), 2);
        assert_eq!(tiles[0].id.as_str(), "33TUM");
        assert_eq!(tiles[0].crs(), Crs::epsg(32633));
        assert_eq!(tiles[0].bands, vec![BandId::from("B04"), BandId::from("B08")]);
        assert_eq!(tiles[1].band_source(&"B08".into()).unwrap().plane, 1);
        assert!((tiles[0].bounds.max_x - 409_800.0).abs() < 1e-6);
    }

    #[test]
    fn test_manifest_roundtrip() {
        let catalog = ManifestCatalog::from_json_str(MANIFEST).unwrap();
        let json = catalog.to_json_string().unwrap();
        let again = ManifestCatalog::from_json_str(&json).unwrap();
        assert_eq!(catalog.tiles(), again.tiles());
    }

    #[test]
    fn test_invalid_manifest() {
        assert!(matches!(
            ManifestCatalog::from_json_str("{\"tiles\": 3}"),
            Err(CatalogError::Manifest(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            ManifestCatalog::load("/nonexistent/manifest.json"),
            Err(CatalogError::Io { .. })
        ));
    }
}
