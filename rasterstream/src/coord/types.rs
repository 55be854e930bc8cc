//! Geometry types shared by the coordinate mapper.

use serde::{Deserialize, Serialize};
use std::fmt;

/// EPSG code of WGS84 geographic coordinates.
pub const WGS84_EPSG: u32 = 4326;

/// Number of intermediate points sampled per edge when reprojecting bounds.
///
/// Straight edges in one projection become curves in another, so corners
/// alone under-estimate the projected extent.
pub const DENSIFY_POINTS: usize = 21;

/// A coordinate reference system identified by its EPSG code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Crs(pub u32);

impl Crs {
    /// WGS84 longitude/latitude in degrees.
    pub const WGS84: Crs = Crs(WGS84_EPSG);

    /// Creates a CRS from an EPSG code.
    pub fn epsg(code: u32) -> Self {
        Self(code)
    }

    /// Returns the EPSG code.
    pub fn code(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.0)
    }
}

/// Axis-aligned bounding box in some CRS.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds {
    /// Creates bounds, normalizing the corner order.
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            min_x: x1.min(x2),
            min_y: y1.min(y2),
            max_x: x1.max(x2),
            max_y: y1.max(y2),
        }
    }

    /// Builds the bounding box of a set of points. Returns `None` when the
    /// iterator is empty or contains a non-finite coordinate.
    pub fn from_points<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        let mut bounds: Option<Bounds> = None;
        for (x, y) in points {
            if !x.is_finite() || !y.is_finite() {
                return None;
            }
            bounds = Some(match bounds {
                None => Bounds::new(x, y, x, y),
                Some(b) => Bounds {
                    min_x: b.min_x.min(x),
                    min_y: b.min_y.min(y),
                    max_x: b.max_x.max(x),
                    max_y: b.max_y.max(y),
                },
            });
        }
        bounds
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Area of the box; zero for degenerate boxes.
    pub fn area(&self) -> f64 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// Returns the four corners, counter-clockwise from the lower-left.
    pub fn corners(&self) -> [(f64, f64); 4] {
        [
            (self.min_x, self.min_y),
            (self.max_x, self.min_y),
            (self.max_x, self.max_y),
            (self.min_x, self.max_y),
        ]
    }

    /// Points along the boundary, `per_edge` samples per side.
    pub fn densified_boundary(&self, per_edge: usize) -> Vec<(f64, f64)> {
        let steps = per_edge.max(2) - 1;
        let mut points = Vec::with_capacity(steps * 4);
        let corners = self.corners();
        for i in 0..4 {
            let (x0, y0) = corners[i];
            let (x1, y1) = corners[(i + 1) % 4];
            for s in 0..steps {
                let t = s as f64 / steps as f64;
                points.push((x0 + (x1 - x0) * t, y0 + (y1 - y0) * t));
            }
        }
        points
    }

    /// True when the boxes share interior area.
    ///
    /// Boxes that only touch along an edge do not intersect.
    pub fn intersects(&self, other: &Bounds) -> bool {
        self.min_x < other.max_x
            && other.min_x < self.max_x
            && self.min_y < other.max_y
            && other.min_y < self.max_y
    }

    /// Overlapping region of two boxes, if any.
    pub fn intersection(&self, other: &Bounds) -> Option<Bounds> {
        if !self.intersects(other) {
            return None;
        }
        Some(Bounds {
            min_x: self.min_x.max(other.min_x),
            min_y: self.min_y.max(other.min_y),
            max_x: self.max_x.min(other.max_x),
            max_y: self.max_y.min(other.max_y),
        })
    }

    /// Smallest box containing both.
    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }
}

impl fmt::Display for Bounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:.6}, {:.6}, {:.6}, {:.6}]",
            self.min_x, self.min_y, self.max_x, self.max_y
        )
    }
}

/// Six-coefficient affine transform from pixel space to CRS coordinates.
///
/// Coefficients follow the GDAL ordering:
///
/// ```text
/// x = c[0] + col * c[1] + row * c[2]
/// y = c[3] + col * c[4] + row * c[5]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeoTransform(pub [f64; 6]);

impl GeoTransform {
    /// North-up transform with square or rectangular pixels.
    ///
    /// `pixel_height` is the (positive) ground size of a row; rows increase
    /// southwards.
    pub fn north_up(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self([origin_x, pixel_width, 0.0, origin_y, 0.0, -pixel_height])
    }

    pub fn origin(&self) -> (f64, f64) {
        (self.0[0], self.0[3])
    }

    /// Ground size of one pixel along x and y (both positive for north-up).
    pub fn pixel_size(&self) -> (f64, f64) {
        (self.0[1].abs(), self.0[5].abs())
    }

    /// True when the transform has no rotation or shear terms.
    pub fn is_north_up(&self) -> bool {
        self.0[2] == 0.0 && self.0[4] == 0.0
    }

    /// Maps a pixel-space position (fractional allowed) to CRS coordinates.
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        let c = &self.0;
        (c[0] + col * c[1] + row * c[2], c[3] + col * c[4] + row * c[5])
    }

    /// Returns the inverse transform, or `None` if the matrix is singular.
    pub fn inverse(&self) -> Option<GeoTransform> {
        let c = &self.0;
        let det = c[1] * c[5] - c[2] * c[4];
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let inv_det = 1.0 / det;
        let a = c[5] * inv_det;
        let b = -c[2] * inv_det;
        let d = -c[4] * inv_det;
        let e = c[1] * inv_det;
        Some(GeoTransform([
            -(a * c[0] + b * c[3]),
            a,
            b,
            -(d * c[0] + e * c[3]),
            d,
            e,
        ]))
    }

    /// CRS bounds of a `width` x `height` raster under this transform.
    pub fn bounds_for(&self, width: u32, height: u32) -> Bounds {
        let (w, h) = (width as f64, height as f64);
        let points = [(0.0, 0.0), (w, 0.0), (w, h), (0.0, h)].map(|(c, r)| self.apply(c, r));
        Bounds::from_points(points).unwrap_or(Bounds::new(0.0, 0.0, 0.0, 0.0))
    }
}

/// A tile's georeferenced pixel grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RasterGrid {
    pub crs: Crs,
    pub transform: GeoTransform,
    pub width: u32,
    pub height: u32,
}

impl RasterGrid {
    pub fn new(crs: Crs, transform: GeoTransform, width: u32, height: u32) -> Self {
        Self {
            crs,
            transform,
            width,
            height,
        }
    }

    /// Footprint of the grid in its own CRS.
    pub fn bounds(&self) -> Bounds {
        self.transform.bounds_for(self.width, self.height)
    }

    /// Window covering the whole grid.
    pub fn full_window(&self) -> PixelWindow {
        PixelWindow::new(0, 0, self.width, self.height)
    }
}

/// Rectangular region in a tile's pixel space.
///
/// `row`/`col` are the top-left origin; the window covers rows
/// `row..row + height` and columns `col..col + width`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelWindow {
    pub row: u32,
    pub col: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelWindow {
    pub fn new(row: u32, col: u32, width: u32, height: u32) -> Self {
        Self {
            row,
            col,
            width,
            height,
        }
    }

    /// One past the last row.
    pub fn row_end(&self) -> u32 {
        self.row + self.height
    }

    /// One past the last column.
    pub fn col_end(&self) -> u32 {
        self.col + self.width
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// True when `other` lies entirely inside this window.
    pub fn contains(&self, other: &PixelWindow) -> bool {
        other.row >= self.row
            && other.col >= self.col
            && other.row_end() <= self.row_end()
            && other.col_end() <= self.col_end()
    }

    /// Overlapping part of two windows, if non-empty.
    pub fn intersection(&self, other: &PixelWindow) -> Option<PixelWindow> {
        let row = self.row.max(other.row);
        let col = self.col.max(other.col);
        let row_end = self.row_end().min(other.row_end());
        let col_end = self.col_end().min(other.col_end());
        if row_end <= row || col_end <= col {
            return None;
        }
        Some(PixelWindow::new(row, col, col_end - col, row_end - row))
    }

    /// Smallest window containing both.
    pub fn union(&self, other: &PixelWindow) -> PixelWindow {
        let row = self.row.min(other.row);
        let col = self.col.min(other.col);
        let row_end = self.row_end().max(other.row_end());
        let col_end = self.col_end().max(other.col_end());
        PixelWindow::new(row, col, col_end - col, row_end - row)
    }
}

impl fmt::Display for PixelWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}@({},{})",
            self.width, self.height, self.row, self.col
        )
    }
}

/// Outcome of mapping a geographic region onto a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileWindow {
    /// The region overlaps the tile in this (clamped, outward-rounded) window.
    Intersecting(PixelWindow),
    /// The region falls outside the tile or collapses to zero area.
    NotIntersecting,
}

impl TileWindow {
    pub fn window(&self) -> Option<PixelWindow> {
        match self {
            TileWindow::Intersecting(w) => Some(*w),
            TileWindow::NotIntersecting => None,
        }
    }
}

/// Errors from coordinate handling.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoordError {
    #[error("EPSG:{0} is not in the CRS database")]
    UnknownCrs(u32),

    #[error("invalid projection definition for EPSG:{code}: {reason}")]
    InvalidProjection { code: u32, reason: String },

    #[error("transform from EPSG:{from} to EPSG:{to} failed: {reason}")]
    TransformFailed { from: u32, to: u32, reason: String },

    #[error("affine transform is not invertible")]
    SingularTransform,

    #[error("invalid tile identifier: {0}")]
    InvalidTileId(String),

    #[error("coordinate out of range: lon {lon}, lat {lat}")]
    OutOfRange { lon: f64, lat: f64 },
}
