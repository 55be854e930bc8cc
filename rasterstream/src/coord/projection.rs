//! CRS transformations using pure Rust (proj4rs + crs-definitions).

use super::types::{Bounds, CoordError, Crs, DENSIFY_POINTS};
use proj4rs::proj::Proj;
use proj4rs::transform::transform;

/// Get the PROJ4 string for an EPSG code from the crs-definitions database.
#[inline]
pub fn proj_string(crs: Crs) -> Option<&'static str> {
    u16::try_from(crs.code())
        .ok()
        .and_then(crs_definitions::from_code)
        .map(|def| def.proj4)
}

/// True when the CRS uses longitude/latitude axes.
#[inline]
#[must_use]
pub fn is_geographic(crs: Crs) -> bool {
    match proj_string(crs) {
        Some(def) => def.contains("+proj=longlat"),
        None => (4000..5000).contains(&crs.code()),
    }
}

/// A prepared source/target projection pair.
///
/// Building a `Proj` parses the definition string, so callers transforming
/// many points should build one `Projector` and reuse it.
pub struct Projector {
    from: Crs,
    to: Crs,
    pair: Option<(Proj, Proj)>,
    from_geographic: bool,
    to_geographic: bool,
}

impl Projector {
    pub fn new(from: Crs, to: Crs) -> Result<Self, CoordError> {
        if from == to {
            return Ok(Self {
                from,
                to,
                pair: None,
                from_geographic: false,
                to_geographic: false,
            });
        }
        let source = build_proj(from)?;
        let target = build_proj(to)?;
        Ok(Self {
            from,
            to,
            pair: Some((source, target)),
            from_geographic: is_geographic(from),
            to_geographic: is_geographic(to),
        })
    }

    /// Projects one point. Geographic coordinates are in degrees.
    pub fn project(&self, x: f64, y: f64) -> Result<(f64, f64), CoordError> {
        let Some((source, target)) = &self.pair else {
            return Ok((x, y));
        };

        // proj4rs uses radians for geographic coordinates
        let mut point = if self.from_geographic {
            (x.to_radians(), y.to_radians(), 0.0)
        } else {
            (x, y, 0.0)
        };

        transform(source, target, &mut point).map_err(|e| CoordError::TransformFailed {
            from: self.from.code(),
            to: self.to.code(),
            reason: format!("{e:?}"),
        })?;

        let out = if self.to_geographic {
            (point.0.to_degrees(), point.1.to_degrees())
        } else {
            (point.0, point.1)
        };

        if !out.0.is_finite() || !out.1.is_finite() {
            return Err(CoordError::TransformFailed {
                from: self.from.code(),
                to: self.to.code(),
                reason: format!("non-finite result for ({x}, {y})"),
            });
        }
        Ok(out)
    }
}

fn build_proj(crs: Crs) -> Result<Proj, CoordError> {
    let def = proj_string(crs).ok_or(CoordError::UnknownCrs(crs.code()))?;
    Proj::from_proj_string(def).map_err(|e| CoordError::InvalidProjection {
        code: crs.code(),
        reason: format!("{e:?}"),
    })
}

/// Projects a single point between two CRSs.
pub fn project_point(from: Crs, to: Crs, x: f64, y: f64) -> Result<(f64, f64), CoordError> {
    Projector::new(from, to)?.project(x, y)
}

/// Reprojects a bounding box, sampling each edge so curved edges are covered.
///
/// The result is the bounding box of the transformed boundary, so it may be
/// larger than the true footprint but never smaller.
pub fn transform_bounds(bounds: &Bounds, from: Crs, to: Crs) -> Result<Bounds, CoordError> {
    if from == to {
        return Ok(*bounds);
    }
    let projector = Projector::new(from, to)?;
    let projected = bounds
        .densified_boundary(DENSIFY_POINTS)
        .into_iter()
        .map(|(x, y)| projector.project(x, y))
        .collect::<Result<Vec<_>, _>>()?;

    Bounds::from_points(projected).ok_or(CoordError::TransformFailed {
        from: from.code(),
        to: to.code(),
        reason: "empty boundary".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_crs_is_identity() {
        let (x, y) = project_point(Crs::WGS84, Crs::WGS84, 12.5, 41.9).unwrap();
        assert_eq!((x, y), (12.5, 41.9));
    }

    #[test]
    fn test_wgs84_to_utm_central_meridian() {
        // UTM 33N central meridian is 15E; false easting is 500km.
        let (x, y) = project_point(Crs::WGS84, Crs::epsg(32633), 15.0, 0.0).unwrap();
        assert!((x - 500_000.0).abs() < 0.01, "x = {x}");
        assert!(y.abs() < 0.01, "y = {y}");
    }

    #[test]
    fn test_utm_roundtrip() {
        let (x, y) = project_point(Crs::WGS84, Crs::epsg(32632), 9.19, 45.46).unwrap();
        let (lon, lat) = project_point(Crs::epsg(32632), Crs::WGS84, x, y).unwrap();
        assert!((lon - 9.19).abs() < 1e-7);
        assert!((lat - 45.46).abs() < 1e-7);
    }

    #[test]
    fn test_unknown_crs() {
        let result = project_point(Crs::epsg(1), Crs::WGS84, 0.0, 0.0);
        assert!(matches!(result, Err(CoordError::UnknownCrs(1))));
    }

    #[test]
    fn test_transform_bounds_contains_projected_corners() {
        let geo = Bounds::new(14.0, 45.0, 16.0, 46.0);
        let utm = transform_bounds(&geo, Crs::WGS84, Crs::epsg(32633)).unwrap();
        for (lon, lat) in geo.corners() {
            let (x, y) = project_point(Crs::WGS84, Crs::epsg(32633), lon, lat).unwrap();
            assert!(x >= utm.min_x - 1e-6 && x <= utm.max_x + 1e-6);
            assert!(y >= utm.min_y - 1e-6 && y <= utm.max_y + 1e-6);
        }
    }

    #[test]
    fn test_is_geographic() {
        assert!(is_geographic(Crs::WGS84));
        assert!(!is_geographic(Crs::epsg(32633)));
    }
}
