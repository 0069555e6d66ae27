use std::path::Path;

use glam::DVec2;
use terrastream_common::TileCoord;

use crate::error::ElevationError;
use crate::grid::ElevationGrid;
use crate::heightfield::{Heightfield, VerticalScale};
use crate::tileset;

/// Source of per-tile elevation regions.
///
/// Implementations never fail a request outright: missing data comes back as
/// a degraded flat grid at the supplied sea level.
pub trait RegionSource {
    /// Extract the region for `coord`, resampled to `resolution²` vertices,
    /// in meters.
    fn sample_region(&self, coord: TileCoord, resolution: usize, sea_level_m: f64)
    -> ElevationGrid;

    /// Vertical datum used to express normalized values in meters.
    fn vertical_scale(&self) -> VerticalScale;

    /// Whether any real data backs this source.
    fn is_available(&self) -> bool {
        true
    }
}

/// Default number of heightfield pixels covered by one tile edge.
pub const DEFAULT_PIXELS_PER_TILE: f64 = 8.0;

/// Global heightfield loaded once at startup.
///
/// World tile `(0, 0)` starts at `origin_px` in heightfield pixel space,
/// which defaults to the center of the field so negative tile coordinates
/// are covered too.
#[derive(Debug, Clone)]
pub struct ElevationSource {
    field: Option<Heightfield>,
    scale: VerticalScale,
    pixels_per_tile: f64,
    origin_px: DVec2,
}

impl ElevationSource {
    pub fn new(field: Heightfield, scale: VerticalScale) -> Self {
        let origin_px = DVec2::new(
            (field.width() / 2) as f64,
            (field.height() / 2) as f64,
        );
        Self {
            field: Some(field),
            scale,
            pixels_per_tile: DEFAULT_PIXELS_PER_TILE,
            origin_px,
        }
    }

    /// Source with no data. Every region is flat at sea level.
    pub fn unavailable(scale: VerticalScale) -> Self {
        Self {
            field: None,
            scale,
            pixels_per_tile: DEFAULT_PIXELS_PER_TILE,
            origin_px: DVec2::ZERO,
        }
    }

    /// Load a baked tileset directory.
    pub fn from_tileset(dir: impl AsRef<Path>) -> Result<Self, ElevationError> {
        let (meta, field) = tileset::load_tileset(dir)?;
        tracing::info!(
            width = field.width(),
            height = field.height(),
            tiles = meta.tiles.len(),
            "loaded elevation tileset"
        );
        Ok(Self::new(field, meta.vertical_scale()))
    }

    /// Load a tileset, degrading to an unavailable source on any error.
    pub fn open_or_unavailable(dir: impl AsRef<Path>) -> Self {
        match Self::from_tileset(dir.as_ref()) {
            Ok(source) => source,
            Err(e) => {
                tracing::error!(path = %dir.as_ref().display(), "elevation tileset unreadable: {e}");
                Self::unavailable(VerticalScale::default())
            }
        }
    }

    pub fn with_pixels_per_tile(mut self, pixels_per_tile: f64) -> Self {
        assert!(pixels_per_tile > 0.0, "pixels_per_tile must be positive");
        self.pixels_per_tile = pixels_per_tile;
        self
    }

    pub fn with_origin(mut self, origin_px: DVec2) -> Self {
        self.origin_px = origin_px;
        self
    }

    pub fn field(&self) -> Option<&Heightfield> {
        self.field.as_ref()
    }

    pub fn pixels_per_tile(&self) -> f64 {
        self.pixels_per_tile
    }

    /// Pixel-space rectangle `(min, max)` covered by a tile.
    pub fn region_px(&self, coord: TileCoord) -> (DVec2, DVec2) {
        let min = self.origin_px
            + DVec2::new(coord.x as f64, coord.z as f64) * self.pixels_per_tile;
        (min, min + DVec2::splat(self.pixels_per_tile))
    }

    fn region_in_bounds(&self, field: &Heightfield, coord: TileCoord) -> bool {
        let (min, max) = self.region_px(coord);
        min.x >= 0.0
            && min.y >= 0.0
            && max.x <= (field.width() - 1) as f64
            && max.y <= (field.height() - 1) as f64
    }
}

impl RegionSource for ElevationSource {
    fn sample_region(
        &self,
        coord: TileCoord,
        resolution: usize,
        sea_level_m: f64,
    ) -> ElevationGrid {
        let Some(field) = self.field.as_ref() else {
            return ElevationGrid::flat(resolution, sea_level_m);
        };
        if resolution < 2 || !self.region_in_bounds(field, coord) {
            tracing::debug!(%coord, "region outside heightfield, using flat fallback");
            return ElevationGrid::flat(resolution.max(1), sea_level_m);
        }

        let (min, _) = self.region_px(coord);
        let step = self.pixels_per_tile / (resolution - 1) as f64;
        let mut heights = Vec::with_capacity(resolution * resolution);
        for iz in 0..resolution {
            let py = min.y + iz as f64 * step;
            for ix in 0..resolution {
                let px = min.x + ix as f64 * step;
                let n = field.sample_bilinear(px, py) as f64;
                heights.push(self.scale.to_meters(n) as f32);
            }
        }
        ElevationGrid::new(resolution, heights)
    }

    fn vertical_scale(&self) -> VerticalScale {
        self.scale
    }

    fn is_available(&self) -> bool {
        self.field.is_some()
    }
}
