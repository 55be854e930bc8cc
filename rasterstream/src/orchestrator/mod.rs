//! Parcel streaming orchestration
//!
//! Looks up the tiles under a parcel, reads the covering window of each
//! requested band through the shared tile cache, and places the windows on
//! one grid aligned to the tile with the largest overlap. Tiles are
//! non-overlapping by construction, so merging is placement, never blending.

mod grid;
mod streaming;
mod types;

pub use streaming::StreamingOrchestrator;
pub use types::{
    BandRaster, ContributionOutcome, CoverageGap, Parcel, ParcelOutcome, ParcelReport,
    ParcelWindowResult, ResolveError, TileContribution, TileFailure,
};
