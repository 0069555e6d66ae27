use glam::DVec3;
use serde::Serialize;
use terrastream_common::CoordinateMapper;

use crate::cache::TileCache;

/// Outcome of a sphere probe against resident terrain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum CollisionResult {
    /// No resident tile covers any probe point.
    NoData,
    Clear {
        ground_height: f64,
        /// Gap between the bottom of the sphere and the ground.
        clearance: f64,
        below_sea_level: bool,
    },
    Contact {
        ground_height: f64,
        /// How far the sphere reaches below the ground.
        penetration: f64,
        normal: DVec3,
        below_sea_level: bool,
    },
}

impl CollisionResult {
    pub fn is_contact(&self) -> bool {
        matches!(self, CollisionResult::Contact { .. })
    }

    pub fn ground_height(&self) -> Option<f64> {
        match self {
            CollisionResult::NoData => None,
            CollisionResult::Clear { ground_height, .. }
            | CollisionResult::Contact { ground_height, .. } => Some(*ground_height),
        }
    }
}

/// Number of probe points on the rim of a collision footprint.
const RIM_PROBES: usize = 8;

/// Read-only height and collision queries over resident tiles.
///
/// Borrows the cache for the duration of a query; nothing is retained.
pub struct SpatialQueryIndex<'a> {
    cache: &'a TileCache,
    mapper: &'a CoordinateMapper,
    sea_level_m: f64,
}

impl<'a> SpatialQueryIndex<'a> {
    pub fn new(cache: &'a TileCache, mapper: &'a CoordinateMapper, sea_level_m: f64) -> Self {
        Self {
            cache,
            mapper,
            sea_level_m,
        }
    }

    /// Surface height at a world point, `None` over unmapped space.
    pub fn height_at(&self, x: f64, z: f64) -> Option<f64> {
        let tile = self.cache.get(self.mapper.tile_at(x, z))?;
        let grid = tile.collision()?;
        Some(grid.height_at(x, z))
    }

    /// Surface normal by central differences over one vertex spacing.
    /// Missing neighbours fall back to the center height.
    pub fn normal_at(&self, x: f64, z: f64) -> Option<DVec3> {
        let tile = self.cache.get(self.mapper.tile_at(x, z))?;
        let eps = tile.collision()?.spacing();
        let h = self.height_at(x, z)?;
        let sample = |sx: f64, sz: f64| self.height_at(sx, sz).unwrap_or(h);
        let dx = (sample(x + eps, z) - sample(x - eps, z)) / (2.0 * eps);
        let dz = (sample(x, z + eps) - sample(x, z - eps)) / (2.0 * eps);
        Some(DVec3::new(-dx, 1.0, -dz).normalize())
    }

    /// Probe a sphere at `pos` against the ground under its footprint.
    ///
    /// The ground height is the highest of the center and rim samples that
    /// land on resident tiles.
    pub fn collision_at(&self, pos: DVec3, radius: f64) -> CollisionResult {
        let radius = radius.max(0.0);
        let probes = std::iter::once((pos.x, pos.z)).chain((0..RIM_PROBES).map(|i| {
            let angle = i as f64 * std::f64::consts::TAU / RIM_PROBES as f64;
            (pos.x + radius * angle.cos(), pos.z + radius * angle.sin())
        }));

        let mut highest: Option<(f64, f64, f64)> = None;
        for (x, z) in probes {
            if let Some(h) = self.height_at(x, z) {
                if highest.is_none_or(|(best, _, _)| h > best) {
                    highest = Some((h, x, z));
                }
            }
        }
        let Some((ground_height, gx, gz)) = highest else {
            return CollisionResult::NoData;
        };

        let below_sea_level = ground_height < self.sea_level_m;
        let clearance = (pos.y - radius) - ground_height;
        if clearance >= 0.0 {
            return CollisionResult::Clear {
                ground_height,
                clearance,
                below_sea_level,
            };
        }
        let normal = self.normal_at(gx, gz).unwrap_or(DVec3::Y);
        CollisionResult::Contact {
            ground_height,
            penetration: -clearance,
            normal,
            below_sea_level,
        }
    }
}
