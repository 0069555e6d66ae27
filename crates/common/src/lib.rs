//! Common types for terrain streaming: tile coordinates and world/tile mapping.
//!
//! # Invariants
//! - World → tile mapping is deterministic, many-to-one, and floors at
//!   boundaries.
//! - Tile center is the inverse used for distance ranking.

mod mapper;
mod types;

pub use mapper::CoordinateMapper;
pub use types::TileCoord;

pub fn crate_info() -> &'static str {
    "terrastream-common v0.1.0"
}
