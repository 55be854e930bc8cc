//! Orchestrator types and errors

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use geo::{coord, BoundingRect, MultiPolygon, Rect};
use thiserror::Error;

use crate::cache::CacheError;
use crate::coord::{Bounds, CoordError, PixelWindow, RasterGrid};
use crate::index::{BandId, IndexError, TileId};

/// A parcel to resolve, with its geometry in WGS84 longitude/latitude.
#[derive(Debug, Clone, PartialEq)]
pub struct Parcel {
    pub id: String,
    pub geometry: MultiPolygon<f64>,
}

impl Parcel {
    pub fn new(id: impl Into<String>, geometry: impl Into<MultiPolygon<f64>>) -> Self {
        Self {
            id: id.into(),
            geometry: geometry.into(),
        }
    }

    /// A rectangular parcel.
    pub fn from_bounds(id: impl Into<String>, bounds: Bounds) -> Self {
        let rect = Rect::new(
            coord! { x: bounds.min_x, y: bounds.min_y },
            coord! { x: bounds.max_x, y: bounds.max_y },
        );
        Self::new(id, rect.to_polygon())
    }

    /// Bounding box of the geometry, or `None` if it is empty.
    pub fn bounds(&self) -> Option<Bounds> {
        self.geometry.bounding_rect().map(|rect| {
            Bounds::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y)
        })
    }
}

/// Why a tile contributed nothing to a parcel.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TileFailure {
    /// The tile is not on the output pixel grid and would need resampling.
    #[error("tile not on the output grid: {0}")]
    GridMismatch(String),

    #[error(transparent)]
    Coord(#[from] CoordError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// What one tile did for a parcel.
#[derive(Debug, Clone, PartialEq)]
pub enum ContributionOutcome {
    /// Pixels placed into the output grid.
    Contributed { pixels: u64 },
    Failed(TileFailure),
}

/// One tile's part in a parcel result.
#[derive(Debug, Clone, PartialEq)]
pub struct TileContribution {
    pub tile: TileId,
    /// Window read from the tile, in its own pixel space.
    pub window: Option<PixelWindow>,
    pub outcome: ContributionOutcome,
}

impl TileContribution {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ContributionOutcome::Contributed { .. })
    }

    pub fn failure(&self) -> Option<&TileFailure> {
        match &self.outcome {
            ContributionOutcome::Failed(failure) => Some(failure),
            ContributionOutcome::Contributed { .. } => None,
        }
    }
}

/// Part of the parcel lies outside every indexed tile.
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageGap {
    /// Output pixels inside the parcel bounds that no tile covers.
    pub uncovered_pixels: u64,
    /// Output pixels inside the parcel bounds.
    pub total_pixels: u64,
    /// Bounding box of the uncovered pixels, in the output CRS.
    pub region: Bounds,
}

impl CoverageGap {
    pub fn fraction(&self) -> f64 {
        if self.total_pixels == 0 {
            0.0
        } else {
            self.uncovered_pixels as f64 / self.total_pixels as f64
        }
    }
}

/// One band on the output grid. Pixels no tile supplied are NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct BandRaster {
    pub width: u32,
    pub height: u32,
    /// Row-major samples.
    pub data: Vec<f64>,
    /// Nodata value declared by the source tiles, if any.
    pub nodata: Option<f64>,
}

impl BandRaster {
    pub(crate) fn empty(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![f64::NAN; width as usize * height as usize],
            nodata: None,
        }
    }

    pub fn get(&self, row: u32, col: u32) -> Option<f64> {
        if row >= self.height || col >= self.width {
            return None;
        }
        self.data
            .get(row as usize * self.width as usize + col as usize)
            .copied()
    }

    /// Samples where `mask` is set, in row-major order.
    pub fn masked(&self, mask: &[bool]) -> Vec<f64> {
        self.data
            .iter()
            .zip(mask)
            .filter(|(_, keep)| **keep)
            .map(|(&v, _)| v)
            .collect()
    }
}

/// Pixels for one parcel on a grid aligned to its reference tile.
#[derive(Debug, Clone, PartialEq)]
pub struct ParcelWindowResult {
    pub parcel_id: String,
    /// Output grid: the reference tile's CRS and pixel grid, cropped to the
    /// parcel bounds.
    pub grid: RasterGrid,
    pub bands: BTreeMap<BandId, BandRaster>,
    /// Set where a tile supplied every requested band.
    pub valid: Vec<bool>,
    /// Set where the pixel centre lies inside the parcel geometry.
    pub polygon_mask: Vec<bool>,
    pub contributions: Vec<TileContribution>,
    pub coverage_gap: Option<CoverageGap>,
}

impl ParcelWindowResult {
    pub fn width(&self) -> u32 {
        self.grid.width
    }

    pub fn height(&self) -> u32 {
        self.grid.height
    }

    pub fn band(&self, band: &BandId) -> Option<&BandRaster> {
        self.bands.get(band)
    }

    pub fn contributing_tiles(&self) -> Vec<&TileId> {
        self.contributions
            .iter()
            .filter(|c| c.is_success())
            .map(|c| &c.tile)
            .collect()
    }

    pub fn failed_tiles(&self) -> Vec<&TileContribution> {
        self.contributions.iter().filter(|c| !c.is_success()).collect()
    }

    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|&&v| v).count()
    }

    /// Pixels that are both valid and inside the parcel geometry.
    pub fn parcel_pixels(&self) -> Vec<bool> {
        self.valid
            .iter()
            .zip(&self.polygon_mask)
            .map(|(&valid, &inside)| valid && inside)
            .collect()
    }

    /// True when every indexed tile contributed and nothing is uncovered.
    pub fn is_complete(&self) -> bool {
        self.coverage_gap.is_none() && self.contributions.iter().all(|c| c.is_success())
    }
}

/// Result of resolving one parcel.
#[derive(Debug, Clone, PartialEq)]
pub enum ParcelOutcome {
    /// No indexed tile intersects the parcel.
    NoSourceData,
    Resolved(ParcelWindowResult),
}

impl ParcelOutcome {
    pub fn is_no_source_data(&self) -> bool {
        matches!(self, ParcelOutcome::NoSourceData)
    }

    pub fn resolved(&self) -> Option<&ParcelWindowResult> {
        match self {
            ParcelOutcome::Resolved(result) => Some(result),
            ParcelOutcome::NoSourceData => None,
        }
    }

    pub fn into_resolved(self) -> Option<ParcelWindowResult> {
        match self {
            ParcelOutcome::Resolved(result) => Some(result),
            ParcelOutcome::NoSourceData => None,
        }
    }
}

/// Errors that fail a whole parcel.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolveError {
    #[error("parcel {0} has an empty geometry")]
    EmptyParcel(String),

    #[error(transparent)]
    IndexLookup(#[from] IndexError),

    #[error("output grid for parcel {parcel}: {source}")]
    Coord { parcel: String, source: CoordError },

    #[error("all {} intersecting tiles failed for parcel {parcel}", .failures.len())]
    AllTilesFailed {
        parcel: String,
        failures: Vec<TileContribution>,
    },

    #[error("streaming service is shutting down")]
    ShuttingDown,
}

/// Per-parcel entry of a batch run.
#[derive(Debug, Clone)]
pub struct ParcelReport {
    pub parcel_id: String,
    pub outcome: Result<ParcelOutcome, ResolveError>,
    pub elapsed: Duration,
}

impl fmt::Display for ParcelReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            Ok(ParcelOutcome::NoSourceData) => {
                write!(f, "{}: no source data", self.parcel_id)
            }
            Ok(ParcelOutcome::Resolved(result)) => write!(
                f,
                "{}: {}x{} pixels from {} tiles in {:.0?}",
                self.parcel_id,
                result.width(),
                result.height(),
                result.contributing_tiles().len(),
                self.elapsed
            ),
            Err(err) => write!(f, "{}: failed: {}", self.parcel_id, err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parcel_bounds() {
        let parcel = Parcel::from_bounds("p1", Bounds::new(10.0, 50.0, 10.5, 50.2));
        assert_eq!(parcel.bounds(), Some(Bounds::new(10.0, 50.0, 10.5, 50.2)));
        let empty = Parcel::new("p2", MultiPolygon::<f64>::new(vec![]));
        assert_eq!(empty.bounds(), None);
    }

    #[test]
    fn test_band_raster_masked() {
        let raster = BandRaster {
            width: 2,
            height: 2,
            data: vec![1.0, 2.0, 3.0, 4.0],
            nodata: None,
        };
        assert_eq!(raster.masked(&[true, false, false, true]), vec![1.0, 4.0]);
        assert_eq!(raster.get(1, 0), Some(3.0));
        assert_eq!(raster.get(2, 0), None);
    }

    #[test]
    fn test_all_tiles_failed_message() {
        let err = ResolveError::AllTilesFailed {
            parcel: "p1".into(),
            failures: vec![TileContribution {
                tile: "T1".into(),
                window: None,
                outcome: ContributionOutcome::Failed(TileFailure::GridMismatch("EPSG:32634".into())),
            }],
        };
        assert_eq!(err.to_string(), "all 1 intersecting tiles failed for parcel p1");
    }
}
