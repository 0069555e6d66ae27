//! Streaming: tile lifecycle, budgeted builds, memory-bounded cache, LOD,
//! spatial queries, and a performance governor.
//!
//! # Invariants
//! - A tile is desired when its center is strictly within the load distance
//!   and unloaded only beyond the larger unload distance.
//! - After eviction the cache stays within its memory ceiling unless a single
//!   tile alone exceeds it.
//! - Sea-level changes reclassify biomes in place; elevation arrays are never
//!   rebuilt for them.
//! - Governor transitions move one level at a time and respect cooldowns.
//!
//! # Scheduling
//! Everything runs on the caller's thread. Each tick steps at most one build
//! at a time, closest tile first, until the time budget or step cap is spent.

mod biome;
mod builder;
mod cache;
mod config;
mod consumer;
mod governor;
mod orchestrator;
mod query;
mod tile;

pub use biome::{Biome, BiomeClassifier, BiomeConfig, BiomeGrid};
pub use builder::{BuildError, BuildParams, BuildSources, BuildStatus, TileBuilder};
pub use cache::{CacheError, TileCache};
pub use config::{ConfigError, MAX_TICK_BUDGET_MS, StreamConfig};
pub use consumer::{CollisionProbe, Consumer, MetricsRecorder};
pub use governor::{
    FrameTimer, GovernorConfig, GovernorMetrics, GovernorState, GovernorTransition,
    PerformanceGovernor,
};
pub use orchestrator::{StreamMetrics, StreamingOrchestrator, TickReport};
pub use query::{CollisionResult, SpatialQueryIndex};
pub use tile::{CollisionGrid, LodMesh, LodPolicy, Tile, TileState};

pub fn crate_info() -> &'static str {
    "terrastream-stream v0.1.0"
}
