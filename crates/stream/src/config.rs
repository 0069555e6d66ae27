use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use terrastream_elevation::DetailConfig;

use crate::biome::BiomeConfig;
use crate::governor::GovernorConfig;
use crate::tile::LodPolicy;

/// Configuration problems detected at load or construction time.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("failed to parse JSON config: {0}")]
    Json(#[from] serde_json::Error),
}

/// Largest accepted per-tick terrain budget.
pub const MAX_TICK_BUDGET_MS: f64 = 60_000.0;

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Streaming configuration, fixed once the orchestrator is constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Edge length of a tile in world units.
    pub tile_size: f64,
    /// Vertices per tile edge at the finest LOD.
    pub tile_resolution: usize,
    /// Tiles whose centers are strictly closer than this are desired.
    pub load_distance: f64,
    /// Resident tiles farther than this are unloaded. Must exceed `load_distance`.
    pub unload_distance: f64,
    pub max_resident_memory_bytes: usize,
    /// Wall-clock budget for build work in one tick.
    pub max_tick_budget_ms: f64,
    /// Optional hard cap on build steps per tick, for deterministic stepping.
    pub max_build_steps_per_tick: Option<usize>,
    pub lod_levels: usize,
    pub base_lod_distance: f64,
    pub lod_distance_multiplier: f64,
    /// Failed builds before a coordinate is skipped for good.
    pub max_build_retries: u32,
    /// Ticks to wait before retrying a failed build.
    pub retry_delay_ticks: u64,
    /// Initial normalized sea level.
    pub sea_level: f64,
    pub detail: DetailConfig,
    pub biome: BiomeConfig,
    pub governor: GovernorConfig,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            tile_size: 512.0,
            tile_resolution: 65,
            load_distance: 2048.0,
            unload_distance: 2560.0,
            max_resident_memory_bytes: 256 * 1024 * 1024,
            max_tick_budget_ms: 4.0,
            max_build_steps_per_tick: None,
            lod_levels: 4,
            base_lod_distance: 512.0,
            lod_distance_multiplier: 2.0,
            max_build_retries: 3,
            retry_delay_ticks: 1,
            sea_level: 0.554,
            detail: DetailConfig::default(),
            biome: BiomeConfig::default(),
            governor: GovernorConfig::default(),
        }
    }
}

impl StreamConfig {
    /// Read a config file. `.json` files parse as JSON, anything else as YAML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&text)?,
            _ => serde_yaml::from_str(&text)?,
        };
        config.validate()?;
        tracing::info!(path = %path.display(), "loaded stream config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.tile_size.is_finite() && self.tile_size > 0.0) {
            return Err(invalid("tile_size", "must be positive"));
        }
        if self.tile_resolution < 2 {
            return Err(invalid("tile_resolution", "needs at least 2 vertices per edge"));
        }
        if !(self.load_distance.is_finite() && self.load_distance > 0.0) {
            return Err(invalid("load_distance", "must be positive"));
        }
        if self.unload_distance.is_nan() || self.unload_distance <= self.load_distance {
            return Err(invalid(
                "unload_distance",
                format!(
                    "{} must exceed load_distance {}",
                    self.unload_distance, self.load_distance
                ),
            ));
        }
        if self.max_resident_memory_bytes == 0 {
            return Err(invalid("max_resident_memory_bytes", "must be non-zero"));
        }
        if !(self.max_tick_budget_ms > 0.0 && self.max_tick_budget_ms <= MAX_TICK_BUDGET_MS) {
            return Err(invalid(
                "max_tick_budget_ms",
                format!("must be in (0, {MAX_TICK_BUDGET_MS}]"),
            ));
        }
        if self.max_build_steps_per_tick == Some(0) {
            return Err(invalid("max_build_steps_per_tick", "must be at least 1"));
        }
        if self.lod_levels == 0 || self.lod_levels > 16 {
            return Err(invalid("lod_levels", "must be between 1 and 16"));
        }
        let coarsest_stride = 1usize << (self.lod_levels - 1);
        if (self.tile_resolution - 1) % coarsest_stride != 0 {
            return Err(invalid(
                "tile_resolution",
                format!(
                    "{} - 1 is not divisible by the coarsest LOD stride {coarsest_stride}",
                    self.tile_resolution
                ),
            ));
        }
        if !(self.base_lod_distance.is_finite() && self.base_lod_distance > 0.0) {
            return Err(invalid("base_lod_distance", "must be positive"));
        }
        if self.lod_distance_multiplier.is_nan() || self.lod_distance_multiplier <= 1.0 {
            return Err(invalid("lod_distance_multiplier", "must be greater than 1"));
        }
        if !(0.0..=1.0).contains(&self.sea_level) {
            return Err(invalid("sea_level", "must be a normalized value in [0, 1]"));
        }
        let d = &self.detail;
        if !(d.amplitude_m.is_finite() && d.amplitude_m >= 0.0)
            || !(d.wavelength.is_finite() && d.wavelength > 0.0)
        {
            return Err(invalid(
                "detail",
                "amplitude must be finite and >= 0, wavelength finite and > 0",
            ));
        }
        self.validate_governor()
    }

    fn validate_governor(&self) -> Result<(), ConfigError> {
        let g = &self.governor;
        if g.window == 0 {
            return Err(invalid("governor.window", "must be at least 1"));
        }
        if !(g.detail_recover_ratio < g.detail_enter_ratio
            && g.detail_enter_ratio < g.emergency_enter_ratio)
        {
            return Err(invalid(
                "governor",
                "expected detail_recover_ratio < detail_enter_ratio < emergency_enter_ratio",
            ));
        }
        if g.emergency_recover_ratio >= g.emergency_enter_ratio {
            return Err(invalid(
                "governor.emergency_recover_ratio",
                "must be below emergency_enter_ratio",
            ));
        }
        if !(g.emergency_shed_fraction > 0.0 && g.emergency_shed_fraction <= 1.0) {
            return Err(invalid("governor.emergency_shed_fraction", "must be in (0, 1]"));
        }
        Ok(())
    }

    pub fn tick_budget(&self) -> Duration {
        Duration::from_secs_f64(self.max_tick_budget_ms / 1000.0)
    }

    pub fn lod_policy(&self) -> LodPolicy {
        LodPolicy {
            levels: self.lod_levels,
            base_distance: self.base_lod_distance,
            multiplier: self.lod_distance_multiplier,
        }
    }

    /// World distance between adjacent vertices at the finest LOD.
    pub fn vertex_spacing(&self) -> f64 {
        self.tile_size / (self.tile_resolution - 1) as f64
    }
}
