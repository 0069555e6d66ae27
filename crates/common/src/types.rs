use serde::{Deserialize, Serialize};

/// Integer coordinate of a square terrain tile on the horizontal plane.
///
/// `x` follows world X and `z` follows world Z; the vertical axis never
/// participates in tiling.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct TileCoord {
    pub x: i32,
    pub z: i32,
}

impl TileCoord {
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Coordinate shifted by the given number of tiles, saturating at the
    /// edge of the coordinate range.
    pub const fn offset(self, dx: i32, dz: i32) -> Self {
        Self {
            x: self.x.saturating_add(dx),
            z: self.z.saturating_add(dz),
        }
    }

    /// Coordinate shifted by the given number of tiles, or `None` past the
    /// edge of the coordinate range.
    pub const fn checked_offset(self, dx: i32, dz: i32) -> Option<Self> {
        match (self.x.checked_add(dx), self.z.checked_add(dz)) {
            (Some(x), Some(z)) => Some(Self { x, z }),
            _ => None,
        }
    }

    /// Chebyshev distance in tiles, useful for square scan radii.
    pub fn ring_distance(self, other: TileCoord) -> u32 {
        self.x.abs_diff(other.x).max(self.z.abs_diff(other.z))
    }
}

impl std::fmt::Display for TileCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.z)
    }
}
