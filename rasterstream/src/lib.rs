//! rasterstream - Windowed access to remote tiled GeoTIFF imagery
//!
//! This library supplies, for each small geographic parcel, only the pixel
//! window of each band that intersects it, reading the covering blocks of
//! remote tiles by byte range instead of downloading whole tiles.
//!
//! # Overview
//!
//! ```text
//! Parcel ──► TileIndex ──► coord::window_for ──► TileCache ──► ParcelWindowResult
//!                                                   │
//!                            DirectoryCache ◄───────┤ (header probe, once per band)
//!                            RangeFetcher  ◄────────┘ (covering block ranges)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use rasterstream::{ManifestCatalog, Parcel, StreamingConfig, StreamingOrchestrator};
//! use rasterstream::fetch::HttpObjectStore;
//!
//! let catalog = Arc::new(ManifestCatalog::load("tiles.json")?);
//! let store = Arc::new(HttpObjectStore::new("https://imagery.example.com/s2/")?);
//! let orchestrator = StreamingOrchestrator::new(StreamingConfig::default(), catalog, store)?;
//!
//! let outcome = orchestrator.resolve(&parcel, &["B04".into(), "B08".into()]).await?;
//! ```

pub mod cache;
pub mod config;
pub mod coord;
pub mod decode;
pub mod directory;
pub mod fetch;
pub mod index;
pub mod logging;
pub mod orchestrator;
pub mod telemetry;
#[doc(hidden)]
pub mod testing;

pub use cache::{CacheError, PixelView, TileCache};
pub use config::{ConfigError, StreamingConfig};
pub use coord::{Bounds, Crs, PixelWindow};
pub use index::{BandId, Catalog, ManifestCatalog, ProbingCatalog, TileDescriptor, TileId};
pub use orchestrator::{
    Parcel, ParcelOutcome, ParcelReport, ParcelWindowResult, ResolveError, StreamingOrchestrator,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
