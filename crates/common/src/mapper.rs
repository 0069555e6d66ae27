use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::types::TileCoord;

/// Converts between world positions and tile coordinates.
///
/// Tiles are axis-aligned squares of `tile_size` world units on the XZ plane.
/// Tile `(0, 0)` spans `[0, tile_size)` on both axes; the Y axis is ignored
/// for partitioning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoordinateMapper {
    tile_size: f64,
}

impl CoordinateMapper {
    /// Create a mapper for the given tile edge length.
    pub fn new(tile_size: f64) -> Self {
        assert!(
            tile_size.is_finite() && tile_size > 0.0,
            "tile_size must be positive"
        );
        Self { tile_size }
    }

    /// Tile edge length in world units.
    pub fn tile_size(&self) -> f64 {
        self.tile_size
    }

    /// Tile containing a world position. Positions exactly on a boundary
    /// belong to the tile whose lower edge they sit on.
    pub fn to_tile(&self, pos: DVec3) -> TileCoord {
        self.tile_at(pos.x, pos.z)
    }

    /// Tile containing the horizontal point `(x, z)`.
    pub fn tile_at(&self, x: f64, z: f64) -> TileCoord {
        TileCoord {
            x: (x / self.tile_size).floor() as i32,
            z: (z / self.tile_size).floor() as i32,
        }
    }

    /// World-space center of a tile at height zero.
    pub fn tile_center(&self, coord: TileCoord) -> DVec3 {
        let half = self.tile_size * 0.5;
        DVec3::new(
            coord.x as f64 * self.tile_size + half,
            0.0,
            coord.z as f64 * self.tile_size + half,
        )
    }

    /// World-space minimum corner of a tile.
    pub fn tile_origin(&self, coord: TileCoord) -> DVec3 {
        DVec3::new(
            coord.x as f64 * self.tile_size,
            0.0,
            coord.z as f64 * self.tile_size,
        )
    }

    /// Horizontal bounds `(min, max)` of a tile; `max` is exclusive.
    pub fn tile_bounds(&self, coord: TileCoord) -> (DVec3, DVec3) {
        let min = self.tile_origin(coord);
        (
            min,
            min + DVec3::new(self.tile_size, 0.0, self.tile_size),
        )
    }

    /// Euclidean distance from a world position to a tile's center.
    pub fn distance(&self, pos: DVec3, coord: TileCoord) -> f64 {
        pos.distance(self.tile_center(coord))
    }

    /// All tiles whose center lies strictly within `radius` of `pos`,
    /// sorted closest first (ties by coordinate).
    pub fn tiles_within(&self, pos: DVec3, radius: f64) -> Vec<(TileCoord, f64)> {
        let center = self.to_tile(pos);
        let reach = ((radius / self.tile_size).ceil() as i32).saturating_add(1);
        let mut result = Vec::new();
        for dx in -reach..=reach {
            for dz in -reach..=reach {
                let Some(coord) = center.checked_offset(dx, dz) else {
                    continue;
                };
                let d = self.distance(pos, coord);
                if d < radius {
                    result.push((coord, d));
                }
            }
        }
        result.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        result
    }
}

impl Default for CoordinateMapper {
    fn default() -> Self {
        Self::new(512.0)
    }
}
