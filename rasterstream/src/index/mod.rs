//! Tile index.
//!
//! Answers "which tiles could hold pixels for this region?" from catalog
//! metadata alone. Tile content is never read here beyond the header probe a
//! [`ProbingCatalog`] performs when it first builds its listing.
//!
//! Catalogs may return a superset of the relevant tiles; [`TileIndex`]
//! filters by footprint, removes duplicate identities and orders the result.

mod manifest;
mod probing;
mod types;

pub use manifest::ManifestCatalog;
pub use probing::{ProbingCatalog, DEFAULT_PROBE_CONCURRENCY, DEFAULT_TILE_PATTERN};
pub use types::{BandId, BandSource, TileDescriptor, TileId, TileLocation};

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::coord::Bounds;
use crate::fetch::{BoxFuture, FetchError};

/// Errors raised by catalog implementations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CatalogError {
    #[error("invalid manifest: {0}")]
    Manifest(String),

    #[error("failed to read {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("object store request failed: {0}")]
    Store(#[from] FetchError),

    #[error("invalid tile name pattern: {0}")]
    Pattern(String),

    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}

/// Errors from [`TileIndex::tiles_for`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IndexError {
    #[error("tile catalog unavailable: {0}")]
    CatalogUnavailable(#[from] CatalogError),

    #[error("invalid query region {0}")]
    InvalidRegion(Bounds),
}

/// Source of tile metadata.
pub trait Catalog: Send + Sync {
    /// Tiles that may intersect `region` (WGS84 longitude/latitude).
    ///
    /// Returning tiles outside the region is allowed.
    fn list_tiles<'a>(
        &'a self,
        region: &'a Bounds,
    ) -> BoxFuture<'a, Result<Vec<TileDescriptor>, CatalogError>>;

    /// Short name used in logs.
    fn name(&self) -> &str;
}

/// Footprint query over a [`Catalog`].
#[derive(Clone)]
pub struct TileIndex {
    catalog: Arc<dyn Catalog>,
}

impl TileIndex {
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }

    /// Tiles whose WGS84 footprint intersects `region`.
    ///
    /// The result has no duplicate identities (the first listed wins) and is
    /// sorted by tile id. An empty result means no tile covers the region.
    #[instrument(level = "debug", skip(self), fields(catalog = self.catalog.name()))]
    pub async fn tiles_for(&self, region: &Bounds) -> Result<Vec<TileDescriptor>, IndexError> {
        let finite = [region.min_x, region.min_y, region.max_x, region.max_y]
            .iter()
            .all(|v| v.is_finite());
        if !finite || region.width() <= 0.0 || region.height() <= 0.0 {
            return Err(IndexError::InvalidRegion(*region));
        }

        let candidates = self.catalog.list_tiles(region).await?;
        let listed = candidates.len();

        let mut seen = HashSet::new();
        let mut tiles: Vec<TileDescriptor> = candidates
            .into_iter()
            .filter(|tile| seen.insert(tile.id.clone()))
            .filter(|tile| match tile.wgs84_bounds() {
                Ok(footprint) => footprint.intersects(region),
                Err(err) => {
                    warn!(tile = %tile.id, error = %err, "Skipping tile with unusable footprint");
                    false
                }
            })
            .collect();
        tiles.sort_by(|a, b| a.id.cmp(&b.id));

        debug!(listed, matched = tiles.len(), "Tile lookup complete");
        Ok(tiles)
    }
}
