//! Coordinate mapping module
//!
//! Converts geographic regions into pixel windows of a tile's raster grid.
//! A parcel's bounds are reprojected into the tile's native CRS, pushed
//! through the inverse affine transform, rounded outward to whole pixels and
//! clamped to the tile extent.
//!
//! Outward rounding (floor of the origin, ceiling of the far edge) means the
//! window may include a sliver of extra pixels but never misses one the parcel
//! touches.

mod mgrs;
mod projection;
mod types;

pub use mgrs::{
    parse_mgrs_tile_id, utm_crs, utm_crs_for, utm_zone_for, MgrsTile, SENTINEL2_TILE_EXTENT_M,
};
pub use projection::{is_geographic, project_point, proj_string, transform_bounds, Projector};
pub use types::{
    Bounds, CoordError, Crs, GeoTransform, PixelWindow, RasterGrid, TileWindow, DENSIFY_POINTS,
    WGS84_EPSG,
};

/// Fractional pixel-space extent of a region on a grid, before rounding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelExtent {
    pub col_min: f64,
    pub row_min: f64,
    pub col_max: f64,
    pub row_max: f64,
}

/// Maps a region given in `region_crs` to fractional pixel coordinates on
/// `grid`, without clamping.
pub fn pixel_extent(
    grid: &RasterGrid,
    region: &Bounds,
    region_crs: Crs,
) -> Result<PixelExtent, CoordError> {
    let native = transform_bounds(region, region_crs, grid.crs)?;
    let inverse = grid
        .transform
        .inverse()
        .ok_or(CoordError::SingularTransform)?;

    let mut extent = PixelExtent {
        col_min: f64::INFINITY,
        row_min: f64::INFINITY,
        col_max: f64::NEG_INFINITY,
        row_max: f64::NEG_INFINITY,
    };
    for (x, y) in native.corners() {
        let (col, row) = inverse.apply(x, y);
        extent.col_min = extent.col_min.min(col);
        extent.row_min = extent.row_min.min(row);
        extent.col_max = extent.col_max.max(col);
        extent.row_max = extent.row_max.max(row);
    }
    Ok(extent)
}

/// Computes the pixel window of `grid` covering `region`.
///
/// # Arguments
///
/// * `grid` - The tile's raster grid (CRS, transform, dimensions)
/// * `region` - Region bounds expressed in `region_crs`
/// * `region_crs` - CRS of `region`, typically [`Crs::WGS84`]
/// * `padding` - Extra pixels added on every side before clamping
///
/// # Returns
///
/// [`TileWindow::Intersecting`] with a non-empty window inside the tile, or
/// [`TileWindow::NotIntersecting`] if the clamped window has zero area.
pub fn window_for(
    grid: &RasterGrid,
    region: &Bounds,
    region_crs: Crs,
    padding: u32,
) -> Result<TileWindow, CoordError> {
    let extent = pixel_extent(grid, region, region_crs)?;
    Ok(clamp_extent(&extent, grid.width, grid.height, padding))
}

/// Rounds a fractional extent outward, pads it and clamps it to
/// `width` x `height`.
pub fn clamp_extent(extent: &PixelExtent, width: u32, height: u32, padding: u32) -> TileWindow {
    let pad = padding as f64;
    let col0 = (extent.col_min.floor() - pad).max(0.0);
    let row0 = (extent.row_min.floor() - pad).max(0.0);
    let col1 = (extent.col_max.ceil() + pad).min(width as f64);
    let row1 = (extent.row_max.ceil() + pad).min(height as f64);

    if !(col1 > col0 && row1 > row0) {
        return TileWindow::NotIntersecting;
    }

    TileWindow::Intersecting(PixelWindow::new(
        row0 as u32,
        col0 as u32,
        (col1 - col0) as u32,
        (row1 - row0) as u32,
    ))
}
