//! Tile identity and descriptor types.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::coord::{transform_bounds, Bounds, CoordError, Crs, GeoTransform, RasterGrid};
use crate::fetch::ObjectLocation;

/// Identity of a tile, e.g. an MGRS grid square such as `33TUM`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TileId(Arc<str>);

impl TileId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TileId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Identity of a spectral band, e.g. `B04`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BandId(Arc<str>);

impl BandId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BandId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Where one band's pixels are stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BandSource {
    pub location: ObjectLocation,
    /// Sample plane inside the object; 0 for single-band objects.
    pub plane: u16,
}

/// Remote layout of a tile's bands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TileLocation {
    /// One object per band.
    PerBand(BTreeMap<BandId, ObjectLocation>),
    /// One planar-separate object; band `i` of `bands` is sample plane `i`.
    Planar {
        object: ObjectLocation,
        bands: Vec<BandId>,
    },
}

impl TileLocation {
    pub fn source(&self, band: &BandId) -> Option<BandSource> {
        match self {
            TileLocation::PerBand(objects) => objects.get(band).map(|location| BandSource {
                location: location.clone(),
                plane: 0,
            }),
            TileLocation::Planar { object, bands } => {
                let plane = bands.iter().position(|b| b == band)?;
                Some(BandSource {
                    location: object.clone(),
                    plane: u16::try_from(plane).ok()?,
                })
            }
        }
    }

    pub fn bands(&self) -> Vec<BandId> {
        match self {
            TileLocation::PerBand(objects) => objects.keys().cloned().collect(),
            TileLocation::Planar { bands, .. } => bands.clone(),
        }
    }
}

/// Metadata describing one remote tile. Immutable once created.
#[derive(Debug, Clone, PartialEq)]
pub struct TileDescriptor {
    pub id: TileId,
    /// Pixel grid shared by every band of the tile.
    pub grid: RasterGrid,
    /// Footprint in the tile's native CRS.
    pub bounds: Bounds,
    pub acquired_at: DateTime<Utc>,
    pub bands: Vec<BandId>,
    pub location: TileLocation,
}

impl TileDescriptor {
    /// Creates a descriptor; bounds and band list derive from `grid` and
    /// `location`.
    pub fn new(
        id: TileId,
        grid: RasterGrid,
        acquired_at: DateTime<Utc>,
        location: TileLocation,
    ) -> Self {
        Self {
            id,
            bounds: grid.bounds(),
            bands: location.bands(),
            grid,
            acquired_at,
            location,
        }
    }

    pub fn crs(&self) -> Crs {
        self.grid.crs
    }

    pub fn transform(&self) -> GeoTransform {
        self.grid.transform
    }

    pub fn has_band(&self, band: &BandId) -> bool {
        self.bands.contains(band)
    }

    pub fn band_source(&self, band: &BandId) -> Option<BandSource> {
        self.location.source(band)
    }

    /// Footprint reprojected to WGS84 longitude/latitude.
    pub fn wgs84_bounds(&self) -> Result<Bounds, CoordError> {
        transform_bounds(&self.bounds, self.grid.crs, Crs::WGS84)
    }
}
