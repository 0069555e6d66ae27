use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use glam::DVec3;
use serde::Serialize;
use terrastream_common::{CoordinateMapper, TileCoord};
use terrastream_elevation::{DetailSynthesizer, RegionSource, VerticalScale};

use crate::biome::BiomeClassifier;
use crate::builder::{BuildError, BuildParams, BuildSources, BuildStatus, TileBuilder};
use crate::cache::TileCache;
use crate::config::{ConfigError, StreamConfig};
use crate::governor::{GovernorState, GovernorTransition, PerformanceGovernor};
use crate::query::{CollisionResult, SpatialQueryIndex};
use crate::tile::{LodPolicy, Tile, TileState};

/// What happened during one [`StreamingOrchestrator::tick`].
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub tick: u64,
    /// Size of the desired set.
    pub desired: usize,
    pub enqueued: usize,
    /// Queued coordinates dropped because they left the desired set.
    pub dropped_from_queue: usize,
    pub build_steps: usize,
    /// Tiles that became resident, in completion order.
    pub built: Vec<TileCoord>,
    /// Finished builds thrown away because the coordinate was no longer desired.
    pub discarded: Vec<TileCoord>,
    pub failed: Vec<TileCoord>,
    /// Resident tiles beyond the unload distance.
    pub unloaded: Vec<TileCoord>,
    pub evicted_for_memory: Vec<TileCoord>,
    /// Tiles evicted on entering emergency shedding.
    pub shed: Vec<TileCoord>,
    pub lod_changes: usize,
    pub work_time: Duration,
    pub transition: Option<GovernorTransition>,
}

/// Published streaming metrics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamMetrics {
    pub tick: u64,
    pub resident_tile_count: usize,
    pub memory_used_bytes: usize,
    pub max_resident_memory_bytes: usize,
    pub governor_state: GovernorState,
    pub rolling_fps: f64,
    pub rolling_frame_time_ms: f64,
    pub rolling_terrain_time_ms: f64,
    pub budget_usage_ratio: f64,
    /// Resident share of the desired set, 1.0 when nothing is desired.
    pub load_progress_ratio: f64,
    pub desired_tile_count: usize,
    pub queued_tile_count: usize,
    pub building: Option<TileCoord>,
    pub degraded_tile_count: usize,
    pub unavailable_tile_count: usize,
    /// Desired tiles evicted for memory and held back until the observer
    /// moves to another tile.
    pub memory_held_tile_count: usize,
    pub tiles_built: u64,
    pub tiles_evicted: u64,
    pub build_failures: u64,
    pub governor_transitions: u64,
    pub sea_level: f64,
    pub sea_level_m: f64,
    pub detail_enabled: bool,
    pub lod_bias: usize,
}

#[derive(Debug, Default)]
struct Totals {
    built: u64,
    evicted: u64,
    failures: u64,
}

/// Per-tick driver for terrain streaming.
///
/// Owns the tile cache, the build queue with its single in-flight build, the
/// governor, and the current sea level. Nothing here aborts: failed builds
/// are retried a bounded number of times and missing elevation degrades to
/// flat tiles.
pub struct StreamingOrchestrator {
    config: StreamConfig,
    mapper: CoordinateMapper,
    lod_policy: LodPolicy,
    source: Box<dyn RegionSource>,
    scale: VerticalScale,
    detail: DetailSynthesizer,
    classifier: BiomeClassifier,
    cache: TileCache,
    governor: PerformanceGovernor,
    /// Pending builds sorted farthest first so the closest pops off the end.
    queue: Vec<(TileCoord, f64)>,
    queued: HashSet<TileCoord>,
    build: Option<TileBuilder>,
    desired: HashSet<TileCoord>,
    failures: HashMap<TileCoord, u32>,
    retry_at: HashMap<TileCoord, u64>,
    unavailable: HashSet<TileCoord>,
    /// Desired tiles evicted for memory; not rebuilt until `observer_tile` changes.
    memory_held: HashSet<TileCoord>,
    observer_tile: Option<TileCoord>,
    sea_level: f64,
    detail_enabled: bool,
    lod_bias: usize,
    tick: u64,
    last_tick: Option<Instant>,
    totals: Totals,
}

impl StreamingOrchestrator {
    pub fn new(config: StreamConfig, source: impl RegionSource + 'static) -> Result<Self, ConfigError> {
        config.validate()?;
        if !source.is_available() {
            tracing::error!("elevation source unavailable, streaming flat sea-level tiles");
        }
        let scale = source.vertical_scale();
        Ok(Self {
            mapper: CoordinateMapper::new(config.tile_size),
            lod_policy: config.lod_policy(),
            source: Box::new(source),
            scale,
            detail: DetailSynthesizer::new(&config.detail),
            classifier: BiomeClassifier::new(config.biome.clone()),
            cache: TileCache::new(),
            governor: PerformanceGovernor::new(config.governor.clone(), config.tick_budget()),
            queue: Vec::new(),
            queued: HashSet::new(),
            build: None,
            desired: HashSet::new(),
            failures: HashMap::new(),
            retry_at: HashMap::new(),
            unavailable: HashSet::new(),
            memory_held: HashSet::new(),
            observer_tile: None,
            sea_level: config.sea_level,
            detail_enabled: config.detail.enabled,
            lod_bias: 0,
            tick: 0,
            last_tick: None,
            totals: Totals::default(),
            config,
        })
    }

    /// Advance streaming by one tick around `observer`.
    pub fn tick(&mut self, observer: DVec3) -> TickReport {
        self.tick += 1;
        let _span = tracing::info_span!("stream_tick", tick = self.tick).entered();
        let start = Instant::now();
        let mut report = TickReport {
            tick: self.tick,
            ..TickReport::default()
        };

        let desired = self.mapper.tiles_within(observer, self.config.load_distance);
        self.desired = desired.iter().map(|(c, _)| *c).collect();
        report.desired = desired.len();

        let observer_tile = self.mapper.to_tile(observer);
        if self.observer_tile != Some(observer_tile) {
            self.observer_tile = Some(observer_tile);
            self.memory_held.clear();
        }

        let marked: Vec<TileCoord> = self
            .cache
            .coords()
            .filter(|c| self.mapper.distance(observer, *c) > self.config.unload_distance)
            .collect();

        self.update_queue(observer, &desired, &mut report);
        self.run_builds(start, &mut report);

        for (coord, _) in &desired {
            self.cache.touch(*coord);
        }
        for coord in marked {
            if self.cache.remove(coord).is_some() {
                tracing::debug!(%coord, "unloaded tile beyond unload distance");
                report.unloaded.push(coord);
            }
        }
        if self.cache.memory_used() > self.config.max_resident_memory_bytes {
            report.evicted_for_memory = self.cache.evict_to_budget(
                self.config.max_resident_memory_bytes,
                observer,
                &self.mapper,
            );
            self.memory_held.extend(
                report
                    .evicted_for_memory
                    .iter()
                    .filter(|c| self.desired.contains(*c)),
            );
        }
        report.lod_changes = self.refresh_lods(observer);

        report.work_time = start.elapsed();
        let frame = self
            .last_tick
            .map_or(report.work_time, |last| start.duration_since(last));
        self.last_tick = Some(start);
        if let Some(transition) = self.governor.record(frame, report.work_time) {
            report.shed = self.apply_transition(transition, observer);
            report.lod_changes += self.refresh_lods(observer);
            report.transition = Some(transition);
        }

        self.totals.built += report.built.len() as u64;
        self.totals.evicted += (report.unloaded.len()
            + report.evicted_for_memory.len()
            + report.shed.len()) as u64;
        self.totals.failures += report.failed.len() as u64;

        tracing::trace!(
            desired = report.desired,
            resident = self.cache.len(),
            queued = self.queue.len(),
            steps = report.build_steps,
            built = report.built.len(),
            memory = self.cache.memory_used(),
            "stream tick complete"
        );
        report
    }

    fn update_queue(
        &mut self,
        observer: DVec3,
        desired: &[(TileCoord, f64)],
        report: &mut TickReport,
    ) {
        let before = self.queue.len();
        self.queue.retain(|(c, _)| self.desired.contains(c));
        self.queued.retain(|c| self.desired.contains(c));
        self.retry_at.retain(|c, _| self.desired.contains(c));
        self.failures.retain(|c, _| self.desired.contains(c));
        self.memory_held.retain(|c| self.desired.contains(c));
        report.dropped_from_queue = before - self.queue.len();

        let building = self.build.as_ref().map(TileBuilder::coord);
        for (coord, distance) in desired {
            let coord = *coord;
            let deferred = self.retry_at.get(&coord).is_some_and(|t| *t > self.tick);
            if self.cache.contains(coord)
                || self.queued.contains(&coord)
                || building == Some(coord)
                || deferred
                || self.unavailable.contains(&coord)
                || self.memory_held.contains(&coord)
            {
                continue;
            }
            self.queue.push((coord, *distance));
            self.queued.insert(coord);
            report.enqueued += 1;
        }

        for entry in &mut self.queue {
            entry.1 = self.mapper.distance(observer, entry.0);
        }
        self.queue
            .sort_by(|a, b| b.1.total_cmp(&a.1).then(b.0.cmp(&a.0)));
    }

    fn build_params(&self) -> BuildParams {
        BuildParams {
            resolution: self.config.tile_resolution,
            lod_levels: self.config.lod_levels,
            detail_enabled: self.detail_enabled,
            sea_level_m: self.sea_level_m(),
        }
    }

    /// Step builds closest first until the queue drains, the time budget runs
    /// out, or the step cap is hit. At least one step runs per tick.
    fn run_builds(&mut self, start: Instant, report: &mut TickReport) {
        let budget = self.config.tick_budget();
        loop {
            if self
                .config
                .max_build_steps_per_tick
                .is_some_and(|cap| report.build_steps >= cap)
            {
                break;
            }
            if report.build_steps > 0 && start.elapsed() >= budget {
                break;
            }
            if self.build.is_none() {
                let Some((coord, _)) = self.queue.pop() else {
                    break;
                };
                self.queued.remove(&coord);
                tracing::debug!(%coord, "tile build started");
                self.build = Some(TileBuilder::begin_build(coord, self.build_params()));
            }
            let Some(builder) = self.build.as_mut() else {
                break;
            };
            let sources = BuildSources {
                region: self.source.as_ref(),
                detail: &self.detail,
                classifier: &self.classifier,
                mapper: &self.mapper,
            };
            let status = builder.step(&sources);
            report.build_steps += 1;
            match status {
                BuildStatus::InProgress => {}
                BuildStatus::Done => {
                    let coord = builder.coord();
                    let tile = builder.take_tile();
                    self.build = None;
                    self.finish_build(coord, tile, report);
                }
                BuildStatus::Failed(err) => {
                    let coord = builder.coord();
                    self.build = None;
                    self.record_failure(coord, err, report);
                }
            }
        }
    }

    fn finish_build(&mut self, coord: TileCoord, tile: Option<Tile>, report: &mut TickReport) {
        let Some(tile) = tile else {
            return;
        };
        if !self.desired.contains(&coord) {
            tracing::debug!(%coord, "discarding finished build outside desired set");
            report.discarded.push(coord);
            return;
        }
        let bytes = tile.memory_bytes();
        let degraded = tile.is_degraded();
        match self.cache.insert(tile) {
            Ok(()) => {
                self.failures.remove(&coord);
                self.retry_at.remove(&coord);
                tracing::debug!(%coord, bytes, degraded, "tile resident");
                report.built.push(coord);
            }
            Err(e) => tracing::warn!("dropping finished build: {e}"),
        }
    }

    fn record_failure(&mut self, coord: TileCoord, err: BuildError, report: &mut TickReport) {
        report.failed.push(coord);
        let count = self.failures.entry(coord).or_insert(0);
        *count += 1;
        let count = *count;
        if count >= self.config.max_build_retries {
            self.retry_at.remove(&coord);
            self.unavailable.insert(coord);
            tracing::warn!(%coord, failures = count, "tile build failed, giving up: {err}");
        } else {
            self.retry_at
                .insert(coord, self.tick + self.config.retry_delay_ticks.max(1));
            tracing::warn!(%coord, failures = count, "tile build failed, will retry: {err}");
        }
    }

    /// Select the LOD of every resident tile. Returns how many changed.
    fn refresh_lods(&mut self, observer: DVec3) -> usize {
        let mapper = &self.mapper;
        let policy = self.lod_policy;
        let bias = self.lod_bias;
        let mut changed = 0;
        self.cache.for_each_mut(|tile| {
            let level = policy.select(mapper.distance(observer, tile.coord()), bias);
            if tile.set_active_lod(level) {
                tracing::debug!(coord = %tile.coord(), level, "lod changed");
                changed += 1;
            }
        });
        changed
    }

    fn apply_transition(
        &mut self,
        transition: GovernorTransition,
        observer: DVec3,
    ) -> Vec<TileCoord> {
        let normal = transition.to == GovernorState::Normal;
        self.lod_bias = usize::from(!normal);
        self.detail_enabled = normal && self.config.detail.enabled;
        if transition.to != GovernorState::EmergencyShedding {
            return Vec::new();
        }
        let shed = self.cache.evict_farthest_fraction(
            self.config.governor.emergency_shed_fraction,
            observer,
            &self.mapper,
        );
        tracing::warn!(
            evicted = shed.len(),
            resident = self.cache.len(),
            "emergency shedding"
        );
        shed
    }

    /// Set the normalized sea level. Every resident tile and the in-flight
    /// build are reclassified; elevation is left untouched.
    pub fn set_sea_level(&mut self, normalized: f64) {
        if !normalized.is_finite() {
            tracing::warn!(normalized, "ignoring non-finite sea level");
            return;
        }
        self.sea_level = normalized;
        let sea_m = self.sea_level_m();
        let classifier = &self.classifier;
        self.cache
            .for_each_mut(|tile| tile.reclassify(classifier, sea_m));
        if let Some(builder) = self.build.as_mut() {
            builder.set_sea_level(sea_m, classifier);
        }
        tracing::info!(
            normalized,
            meters = sea_m,
            resident = self.cache.len(),
            "sea level changed"
        );
    }

    /// Current sea level, normalized.
    pub fn sea_level(&self) -> f64 {
        self.sea_level
    }

    pub fn sea_level_m(&self) -> f64 {
        self.scale.to_meters(self.sea_level)
    }

    /// Drop every resident tile and all pending work.
    pub fn force_unload_all(&mut self) {
        let removed = self.cache.clear();
        self.totals.evicted += removed as u64;
        self.queue.clear();
        self.queued.clear();
        self.build = None;
        self.desired.clear();
        self.failures.clear();
        self.retry_at.clear();
        self.unavailable.clear();
        self.memory_held.clear();
        tracing::info!(removed, "forced unload of all tiles");
    }

    pub fn tile_state(&self, coord: TileCoord) -> TileState {
        if let Some(tile) = self.cache.get(coord) {
            return tile.state();
        }
        if self.build.as_ref().is_some_and(|b| b.coord() == coord) {
            return TileState::Building;
        }
        if self.queued.contains(&coord) {
            return TileState::Queued;
        }
        TileState::Absent
    }

    pub fn is_unavailable(&self, coord: TileCoord) -> bool {
        self.unavailable.contains(&coord)
    }

    pub fn query_index(&self) -> SpatialQueryIndex<'_> {
        SpatialQueryIndex::new(&self.cache, &self.mapper, self.sea_level_m())
    }

    pub fn height_at(&self, x: f64, z: f64) -> Option<f64> {
        self.query_index().height_at(x, z)
    }

    pub fn collision_at(&self, pos: DVec3, radius: f64) -> CollisionResult {
        self.query_index().collision_at(pos, radius)
    }

    pub fn get_metrics(&self) -> StreamMetrics {
        let g = self.governor.metrics();
        let resident_desired = self
            .desired
            .iter()
            .filter(|c| self.cache.contains(**c))
            .count();
        let load_progress_ratio = if self.desired.is_empty() {
            1.0
        } else {
            resident_desired as f64 / self.desired.len() as f64
        };
        StreamMetrics {
            tick: self.tick,
            resident_tile_count: self.cache.len(),
            memory_used_bytes: self.cache.memory_used(),
            max_resident_memory_bytes: self.config.max_resident_memory_bytes,
            governor_state: g.state,
            rolling_fps: g.rolling_fps,
            rolling_frame_time_ms: g.rolling_frame_ms,
            rolling_terrain_time_ms: g.rolling_work_ms,
            budget_usage_ratio: g.usage_ratio,
            load_progress_ratio,
            desired_tile_count: self.desired.len(),
            queued_tile_count: self.queue.len(),
            building: self.build.as_ref().map(TileBuilder::coord),
            degraded_tile_count: self.cache.iter().filter(|t| t.is_degraded()).count(),
            unavailable_tile_count: self.unavailable.len(),
            memory_held_tile_count: self.memory_held.len(),
            tiles_built: self.totals.built,
            tiles_evicted: self.totals.evicted,
            build_failures: self.totals.failures,
            governor_transitions: g.transitions,
            sea_level: self.sea_level,
            sea_level_m: self.sea_level_m(),
            detail_enabled: self.detail_enabled,
            lod_bias: self.lod_bias,
        }
    }

    pub fn governor_state(&self) -> GovernorState {
        self.governor.state()
    }

    /// True once every desired tile is resident or unavailable and no build
    /// is in flight.
    pub fn is_settled(&self) -> bool {
        self.build.is_none() && self.queue.is_empty() && self.retry_at.is_empty()
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn mapper(&self) -> &CoordinateMapper {
        &self.mapper
    }

    pub fn cache(&self) -> &TileCache {
        &self.cache
    }

    pub fn tile(&self, coord: TileCoord) -> Option<&Tile> {
        self.cache.get(coord)
    }
}
