//! Elevation: global heightfield ownership, per-tile region sampling, baked
//! tilesets, and optional fine detail.
//!
//! # Invariants
//! - Region sampling never fails a build: missing data yields a flat grid at
//!   sea level flagged as degraded.
//! - Detail overlays are deterministic per tile coordinate and bounded by
//!   their amplitude.

mod detail;
mod error;
mod grid;
mod heightfield;
mod source;
pub mod tileset;

pub use detail::{DetailConfig, DetailSynthesizer};
pub use error::ElevationError;
pub use grid::ElevationGrid;
pub use heightfield::{EVEREST_HEIGHT_M, Heightfield, MARIANA_DEPTH_M, VerticalScale};
pub use source::{DEFAULT_PIXELS_PER_TILE, ElevationSource, RegionSource};

pub fn crate_info() -> &'static str {
    "terrastream-elevation v0.1.0"
}
