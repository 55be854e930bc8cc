//! MGRS/UTM helpers for Sentinel-2 style tile identifiers.
//!
//! Sentinel-2 granules are named after their MGRS 100km grid square, e.g.
//! `33TUN`: UTM zone 33, latitude band `T`, square `UN`. The zone and band
//! are enough to recover the EPSG code of the tile's native projection.

use super::types::{CoordError, Crs};
use std::sync::OnceLock;

use regex::Regex;

/// Nominal ground extent of one Sentinel-2 tile in metres.
pub const SENTINEL2_TILE_EXTENT_M: f64 = 109_800.0;

/// Parsed components of an MGRS grid-square identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MgrsTile {
    pub zone: u8,
    pub latitude_band: char,
    pub square: String,
}

impl MgrsTile {
    /// True for latitude bands N through X.
    pub fn is_northern(&self) -> bool {
        self.latitude_band >= 'N'
    }

    /// WGS84 / UTM EPSG code for this tile (326zz north, 327zz south).
    pub fn utm_crs(&self) -> Crs {
        utm_crs(self.zone, self.is_northern())
    }
}

fn mgrs_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // Bands I and O are not used by MGRS.
        Regex::new(r"^(\d{1,2})([C-HJ-NP-X])([A-Z]{2})$").expect("valid MGRS pattern")
    })
}

/// Parses an MGRS tile id such as `33TUN` (an optional leading `T` as used
/// in Sentinel-2 product names, `T33TUN`, is accepted).
pub fn parse_mgrs_tile_id(id: &str) -> Result<MgrsTile, CoordError> {
    let trimmed = id.trim();
    let candidate = match trimmed.strip_prefix('T') {
        Some(rest) if rest.len() == 5 => rest,
        _ => trimmed,
    };
    let caps = mgrs_pattern()
        .captures(candidate)
        .ok_or_else(|| CoordError::InvalidTileId(id.to_string()))?;

    let zone: u8 = caps[1]
        .parse()
        .map_err(|_| CoordError::InvalidTileId(id.to_string()))?;
    if !(1..=60).contains(&zone) {
        return Err(CoordError::InvalidTileId(id.to_string()));
    }
    let latitude_band = caps[2]
        .chars()
        .next()
        .ok_or_else(|| CoordError::InvalidTileId(id.to_string()))?;

    Ok(MgrsTile {
        zone,
        latitude_band,
        square: caps[3].to_string(),
    })
}

/// EPSG code of WGS84 / UTM zone `zone`.
pub fn utm_crs(zone: u8, northern: bool) -> Crs {
    let base = if northern { 32600 } else { 32700 };
    Crs::epsg(base + zone as u32)
}

/// UTM zone and hemisphere containing a WGS84 position.
///
/// Applies the Norway (32V) and Svalbard (31X-37X) zone exceptions.
pub fn utm_zone_for(lon: f64, lat: f64) -> Result<(u8, bool), CoordError> {
    if !(-180.0..=180.0).contains(&lon) || !(-80.0..=84.0).contains(&lat) {
        return Err(CoordError::OutOfRange { lon, lat });
    }

    let mut zone = (((lon + 180.0) / 6.0).floor() as i32 + 1).clamp(1, 60) as u8;

    if (56.0..64.0).contains(&lat) && (3.0..12.0).contains(&lon) {
        zone = 32;
    }
    if (72.0..=84.0).contains(&lat) {
        zone = match lon {
            l if (0.0..9.0).contains(&l) => 31,
            l if (9.0..21.0).contains(&l) => 33,
            l if (21.0..33.0).contains(&l) => 35,
            l if (33.0..42.0).contains(&l) => 37,
            _ => zone,
        };
    }

    Ok((zone, lat >= 0.0))
}

/// UTM CRS containing a WGS84 position.
pub fn utm_crs_for(lon: f64, lat: f64) -> Result<Crs, CoordError> {
    let (zone, northern) = utm_zone_for(lon, lat)?;
    Ok(utm_crs(zone, northern))
}
