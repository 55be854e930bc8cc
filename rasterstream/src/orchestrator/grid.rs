//! Output grid construction and placement.
//!
//! The output grid reuses the reference tile's CRS and pixel lattice, so
//! placing a tile on a matching lattice is an integer offset and never a
//! resample.

use geo::{Contains, MultiPolygon, Point};

use crate::coord::{
    pixel_extent, transform_bounds, Bounds, CoordError, Crs, GeoTransform, PixelWindow, Projector,
    RasterGrid,
};

/// Tolerance, in pixels, for grid origin alignment.
const ALIGN_TOLERANCE_PX: f64 = 1e-6;

/// Relative tolerance for comparing pixel size and rotation terms.
const SCALE_TOLERANCE: f64 = 1e-9;

/// The parcel's grid, positioned in reference tile pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct OutputGrid {
    pub grid: RasterGrid,
    /// Reference pixel (row, col) of output pixel (0, 0).
    pub origin: (i64, i64),
    /// Output pixels covering the unpadded parcel bounds.
    pub core: PixelWindow,
}

impl OutputGrid {
    /// Covers `region` (WGS84) on `reference`'s pixel lattice, rounded
    /// outward and grown by `padding` pixels on each side. Not clamped to
    /// the reference tile.
    pub fn covering(
        reference: &RasterGrid,
        region: &Bounds,
        padding: u32,
    ) -> Result<Self, CoordError> {
        let extent = pixel_extent(reference, region, Crs::WGS84)?;
        let pad = i64::from(padding);
        let col0 = extent.col_min.floor() as i64;
        let row0 = extent.row_min.floor() as i64;
        let col1 = (extent.col_max.ceil() as i64).max(col0 + 1);
        let row1 = (extent.row_max.ceil() as i64).max(row0 + 1);

        let (ox, oy) = reference
            .transform
            .apply((col0 - pad) as f64, (row0 - pad) as f64);
        let c = reference.transform.0;
        let transform = GeoTransform([ox, c[1], c[2], oy, c[4], c[5]]);

        let width = (col1 - col0 + 2 * pad) as u32;
        let height = (row1 - row0 + 2 * pad) as u32;
        Ok(Self {
            grid: RasterGrid::new(reference.crs, transform, width, height),
            origin: (row0 - pad, col0 - pad),
            core: PixelWindow::new(
                padding,
                padding,
                (col1 - col0) as u32,
                (row1 - row0) as u32,
            ),
        })
    }

    pub fn pixel_count(&self) -> usize {
        self.grid.width as usize * self.grid.height as usize
    }

    /// Where `tile` lands: the tile window to read and the output pixel
    /// its first sample goes to. `None` if the tile does not overlap.
    pub fn placement(&self, offset: (i64, i64), tile: &RasterGrid) -> Option<Placement> {
        let (tile_row, tile_col) = offset;
        // Output rectangle in tile pixel coordinates
        let row0 = self.origin.0 - tile_row;
        let col0 = self.origin.1 - tile_col;
        let row1 = row0 + i64::from(self.grid.height);
        let col1 = col0 + i64::from(self.grid.width);

        let r0 = row0.max(0);
        let c0 = col0.max(0);
        let r1 = row1.min(i64::from(tile.height));
        let c1 = col1.min(i64::from(tile.width));
        if r1 <= r0 || c1 <= c0 {
            return None;
        }
        Some(Placement {
            window: PixelWindow::new(r0 as u32, c0 as u32, (c1 - c0) as u32, (r1 - r0) as u32),
            out_row: (r0 - row0) as u32,
            out_col: (c0 - col0) as u32,
        })
    }

    /// Pixel centres inside `geometry` (WGS84), row-major.
    pub fn polygon_mask(&self, geometry: &MultiPolygon<f64>) -> Result<Vec<bool>, CoordError> {
        let projector = Projector::new(Crs::WGS84, self.grid.crs)?;
        let native = project_geometry(geometry, &projector)?;

        let mut mask = Vec::with_capacity(self.pixel_count());
        for row in 0..self.grid.height {
            for col in 0..self.grid.width {
                let (x, y) = self
                    .grid
                    .transform
                    .apply(f64::from(col) + 0.5, f64::from(row) + 0.5);
                mask.push(native.contains(&Point::new(x, y)));
            }
        }
        Ok(mask)
    }

    /// Marks pixels whose centre falls inside `footprint` (native bounds in
    /// `crs`). Footprints that cannot be projected mark nothing.
    pub fn mark_footprint(&self, footprint: &Bounds, crs: Crs, covered: &mut [bool]) {
        let Ok(native) = transform_bounds(footprint, crs, self.grid.crs) else {
            return;
        };
        for row in 0..self.grid.height {
            for col in 0..self.grid.width {
                let (x, y) = self
                    .grid
                    .transform
                    .apply(f64::from(col) + 0.5, f64::from(row) + 0.5);
                if x >= native.min_x && x <= native.max_x && y >= native.min_y && y <= native.max_y
                {
                    covered[(row * self.grid.width + col) as usize] = true;
                }
            }
        }
    }

    /// Bounding box, in the output CRS, of the core pixels left unset in
    /// `covered`, with their count.
    pub fn uncovered_core(&self, covered: &[bool]) -> Option<(u64, Bounds)> {
        let mut count = 0u64;
        let mut corners = Vec::new();
        for row in self.core.row..self.core.row_end() {
            for col in self.core.col..self.core.col_end() {
                if covered[(row * self.grid.width + col) as usize] {
                    continue;
                }
                count += 1;
                corners.push(self.grid.transform.apply(f64::from(col), f64::from(row)));
                corners.push(
                    self.grid
                        .transform
                        .apply(f64::from(col) + 1.0, f64::from(row) + 1.0),
                );
            }
        }
        Bounds::from_points(corners).map(|bounds| (count, bounds))
    }
}

/// A tile's share of the output grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Placement {
    /// Window to read, in tile pixel coordinates.
    pub window: PixelWindow,
    pub out_row: u32,
    pub out_col: u32,
}

/// Offset of `tile`'s pixel (0, 0) in `reference` pixel coordinates as
/// (row, col), or why the tile is off the reference lattice.
pub(crate) fn grid_offset(reference: &RasterGrid, tile: &RasterGrid) -> Result<(i64, i64), String> {
    if tile.crs != reference.crs {
        return Err(format!("{} differs from output {}", tile.crs, reference.crs));
    }
    let (a, b) = (reference.transform.0, tile.transform.0);
    for i in [1, 2, 4, 5] {
        let scale = a[i].abs().max(b[i].abs()).max(f64::MIN_POSITIVE);
        if (a[i] - b[i]).abs() > SCALE_TOLERANCE * scale {
            return Err(format!(
                "pixel size or rotation {:?} differs from output {:?}",
                [b[1], b[2], b[4], b[5]],
                [a[1], a[2], a[4], a[5]]
            ));
        }
    }
    let inverse = reference
        .transform
        .inverse()
        .ok_or_else(|| "output transform is not invertible".to_string())?;
    let (col, row) = inverse.apply(b[0], b[3]);
    if (col - col.round()).abs() > ALIGN_TOLERANCE_PX || (row - row.round()).abs() > ALIGN_TOLERANCE_PX
    {
        return Err(format!(
            "origin falls at fractional output pixel ({row:.3}, {col:.3})"
        ));
    }
    Ok((row.round() as i64, col.round() as i64))
}

fn project_geometry(
    geometry: &MultiPolygon<f64>,
    projector: &Projector,
) -> Result<MultiPolygon<f64>, CoordError> {
    use geo::MapCoords;

    geometry.try_map_coords(|c| {
        let (x, y) = projector.project(c.x, c.y)?;
        Ok(geo::coord! { x: x, y: y })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{coord, Rect};

    /// 1/8 degree pixels keep the arithmetic exact.
    fn wgs84_grid(lon: f64, lat: f64) -> RasterGrid {
        RasterGrid::new(
            Crs::WGS84,
            GeoTransform::north_up(lon, lat, 0.125, 0.125),
            100,
            100,
        )
    }

    #[test]
    fn test_output_grid_rounds_outward() {
        let reference = wgs84_grid(10.0, 51.0);
        // Columns 10.5..20 and rows 10..19.5 in reference pixels
        let region = Bounds::new(11.3125, 48.5625, 12.5, 49.75);
        let out = OutputGrid::covering(&reference, &region, 0).unwrap();
        assert_eq!(out.origin, (10, 10));
        assert_eq!((out.grid.width, out.grid.height), (10, 10));
        assert_eq!(out.grid.transform.origin(), (11.25, 49.75));
    }

    #[test]
    fn test_output_grid_padding() {
        let reference = wgs84_grid(10.0, 51.0);
        let region = Bounds::new(11.25, 48.75, 12.5, 49.75);
        let out = OutputGrid::covering(&reference, &region, 2).unwrap();
        assert_eq!(out.origin, (8, 8));
        assert_eq!((out.grid.width, out.grid.height), (14, 14));
        assert_eq!(out.core, PixelWindow::new(2, 2, 10, 10));
    }

    #[test]
    fn test_placement_clips_to_tile() {
        let reference = wgs84_grid(10.0, 51.0);
        // Columns 95..105: straddles the reference tile's east edge
        let region = Bounds::new(21.875, 48.75, 23.125, 49.75);
        let out = OutputGrid::covering(&reference, &region, 0).unwrap();
        let here = out.placement((0, 0), &reference).unwrap();
        assert_eq!(here.window, PixelWindow::new(10, 95, 5, 10));
        assert_eq!((here.out_row, here.out_col), (0, 0));

        let east = wgs84_grid(22.5, 51.0);
        let offset = grid_offset(&reference, &east).unwrap();
        assert_eq!(offset, (0, 100));
        let there = out.placement(offset, &east).unwrap();
        assert_eq!(there.window, PixelWindow::new(10, 0, 5, 10));
        assert_eq!((there.out_row, there.out_col), (0, 5));

        let far = wgs84_grid(40.0, 51.0);
        let offset = grid_offset(&reference, &far).unwrap();
        assert_eq!(out.placement(offset, &far), None);
    }

    #[test]
    fn test_grid_offset_rejects_mismatch() {
        let reference = wgs84_grid(10.0, 51.0);
        let half_pixel = wgs84_grid(22.5625, 51.0);
        assert!(grid_offset(&reference, &half_pixel).is_err());

        let coarser = RasterGrid::new(
            Crs::WGS84,
            GeoTransform::north_up(22.5, 51.0, 0.25, 0.25),
            50,
            50,
        );
        assert!(grid_offset(&reference, &coarser).is_err());

        let utm = RasterGrid::new(Crs::epsg(32632), reference.transform, 100, 100);
        assert!(grid_offset(&reference, &utm).unwrap_err().contains("EPSG:32632"));
    }

    #[test]
    fn test_polygon_mask_uses_pixel_centres() {
        let reference = wgs84_grid(10.0, 51.0);
        let region = Bounds::new(11.25, 49.25, 11.75, 49.75);
        let out = OutputGrid::covering(&reference, &region, 0).unwrap();
        // Left half of the bounding box
        let left: MultiPolygon<f64> = Rect::new(
            coord! { x: 11.25, y: 49.25 },
            coord! { x: 11.5, y: 49.75 },
        )
        .to_polygon()
        .into();
        let mask = out.polygon_mask(&left).unwrap();
        assert_eq!(mask.len(), 16);
        for row in 0..4 {
            assert_eq!(&mask[row * 4..row * 4 + 4], &[true, true, false, false]);
        }
    }

    #[test]
    fn test_uncovered_core() {
        let reference = wgs84_grid(10.0, 51.0);
        let region = Bounds::new(21.875, 48.75, 23.125, 49.75);
        let out = OutputGrid::covering(&reference, &region, 0).unwrap();
        let mut covered = vec![false; out.pixel_count()];
        out.mark_footprint(&reference.bounds(), Crs::WGS84, &mut covered);

        let (count, gap) = out.uncovered_core(&covered).unwrap();
        assert_eq!(count, 50);
        assert_eq!((gap.min_x, gap.max_x), (22.5, 23.125));

        covered.fill(true);
        assert_eq!(out.uncovered_core(&covered), None);
    }
}
