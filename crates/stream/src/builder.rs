use std::sync::Arc;

use terrastream_common::{CoordinateMapper, TileCoord};
use terrastream_elevation::{DetailSynthesizer, ElevationGrid, RegionSource};

use crate::biome::{BiomeClassifier, BiomeGrid};
use crate::tile::{CollisionGrid, LodMesh, Tile};

/// Why a tile build could not complete.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BuildError {
    #[error("region for tile {coord} has a non-finite height at sample {index}")]
    MalformedRegion { coord: TileCoord, index: usize },
    #[error("tile {coord} build resumed out of order")]
    OutOfOrder { coord: TileCoord },
}

/// Result of one build step.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildStatus {
    InProgress,
    Done,
    Failed(BuildError),
}

/// Fixed inputs for a build, captured when it begins.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuildParams {
    /// Vertices per tile edge.
    pub resolution: usize,
    pub lod_levels: usize,
    pub detail_enabled: bool,
    pub sea_level_m: f64,
}

/// Collaborators a build step reads from.
pub struct BuildSources<'a> {
    pub region: &'a dyn RegionSource,
    pub detail: &'a DetailSynthesizer,
    pub classifier: &'a BiomeClassifier,
    pub mapper: &'a CoordinateMapper,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Sample,
    Detail,
    Classify,
    Lod(usize),
    Collision,
    Finished,
}

/// Resumable build of a single tile.
///
/// Each [`TileBuilder::step`] performs one stage: sample elevation,
/// synthesize detail, classify biomes, one mesh per LOD level, then the
/// collision grid. The finished tile is handed over with
/// [`TileBuilder::take_tile`].
#[derive(Debug)]
pub struct TileBuilder {
    coord: TileCoord,
    params: BuildParams,
    stage: Stage,
    elevation: Option<ElevationGrid>,
    detail: Option<Arc<[f32]>>,
    surface: Option<Arc<[f32]>>,
    biomes: Option<BiomeGrid>,
    lods: Vec<LodMesh>,
    finished: Option<Tile>,
    spacing: f64,
    steps: usize,
}

impl TileBuilder {
    pub fn begin_build(coord: TileCoord, params: BuildParams) -> Self {
        Self {
            coord,
            params,
            stage: Stage::Sample,
            elevation: None,
            detail: None,
            surface: None,
            biomes: None,
            lods: Vec::with_capacity(params.lod_levels),
            finished: None,
            spacing: 0.0,
            steps: 0,
        }
    }

    /// Number of `step` calls a successful build of these params takes.
    /// Degraded ground skips the detail stage and needs one fewer.
    pub fn steps_required(params: &BuildParams) -> usize {
        let detail = usize::from(params.detail_enabled);
        3 + detail + params.lod_levels.max(1)
    }

    pub fn coord(&self) -> TileCoord {
        self.coord
    }

    pub fn steps_taken(&self) -> usize {
        self.steps
    }

    pub fn is_finished(&self) -> bool {
        self.stage == Stage::Finished
    }

    /// Apply a new sea level to the in-progress build.
    pub fn set_sea_level(&mut self, sea_level_m: f64, classifier: &BiomeClassifier) {
        self.params.sea_level_m = sea_level_m;
        if let (Some(surface), Some(biomes)) = (&self.surface, &mut self.biomes) {
            *biomes = classifier.classify(
                surface,
                self.params.resolution,
                self.spacing,
                sea_level_m,
            );
        }
        if let Some(tile) = &mut self.finished {
            tile.reclassify(classifier, sea_level_m);
        }
    }

    /// Run the next stage.
    pub fn step(&mut self, sources: &BuildSources<'_>) -> BuildStatus {
        let res = self.params.resolution;
        let spacing = sources.mapper.tile_size() / (res.max(2) - 1) as f64;
        self.spacing = spacing;
        match self.stage {
            Stage::Sample => {
                let grid = sources
                    .region
                    .sample_region(self.coord, res, self.params.sea_level_m);
                if let Some(index) = grid.first_non_finite() {
                    return BuildStatus::Failed(BuildError::MalformedRegion {
                        coord: self.coord,
                        index,
                    });
                }
                // Degraded ground stays flat.
                let detail = self.params.detail_enabled && !grid.is_degraded();
                self.elevation = Some(grid);
                self.stage = if detail {
                    Stage::Detail
                } else {
                    Stage::Classify
                };
            }
            Stage::Detail => {
                let Some(elevation) = &self.elevation else {
                    return self.out_of_order();
                };
                let offsets = sources.detail.synthesize(self.coord, sources.mapper, res);
                let surface: Arc<[f32]> = elevation
                    .heights()
                    .iter()
                    .zip(offsets.iter())
                    .map(|(h, o)| h + o)
                    .collect();
                self.detail = Some(offsets);
                self.surface = Some(surface);
                self.stage = Stage::Classify;
            }
            Stage::Classify => {
                let Some(elevation) = &self.elevation else {
                    return self.out_of_order();
                };
                let surface = self
                    .surface
                    .get_or_insert_with(|| elevation.heights().clone());
                self.biomes = Some(sources.classifier.classify(
                    surface,
                    res,
                    spacing,
                    self.params.sea_level_m,
                ));
                self.stage = Stage::Lod(0);
            }
            Stage::Lod(level) => {
                let Some(surface) = &self.surface else {
                    return self.out_of_order();
                };
                self.lods.push(LodMesh::build(level, surface, res, spacing));
                self.stage = if level + 1 < self.params.lod_levels {
                    Stage::Lod(level + 1)
                } else {
                    Stage::Collision
                };
            }
            Stage::Collision => {
                let (Some(elevation), Some(surface), Some(biomes)) = (
                    self.elevation.take(),
                    self.surface.take(),
                    self.biomes.take(),
                ) else {
                    return self.out_of_order();
                };
                let origin = sources.mapper.tile_origin(self.coord);
                let collision = CollisionGrid::new(res, spacing, origin, surface.clone());
                self.finished = Some(Tile::assemble(
                    self.coord,
                    elevation,
                    self.detail.take(),
                    surface,
                    spacing,
                    biomes,
                    std::mem::take(&mut self.lods),
                    collision,
                ));
                self.stage = Stage::Finished;
                self.steps += 1;
                return BuildStatus::Done;
            }
            Stage::Finished => return BuildStatus::Done,
        }
        self.steps += 1;
        BuildStatus::InProgress
    }

    /// Take the finished tile. `None` until the build reports `Done`.
    pub fn take_tile(&mut self) -> Option<Tile> {
        self.finished.take()
    }

    fn out_of_order(&self) -> BuildStatus {
        // Stages only advance after their inputs exist; reaching this means the
        // builder was resumed after handing its data over.
        tracing::error!(coord = %self.coord, stage = ?self.stage, "tile build resumed out of order");
        BuildStatus::Failed(BuildError::OutOfOrder { coord: self.coord })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use terrastream_elevation::{DetailConfig, ElevationSource, Heightfield, VerticalScale};

    struct Fixture {
        source: ElevationSource,
        detail: DetailSynthesizer,
        classifier: BiomeClassifier,
        mapper: CoordinateMapper,
    }

    impl Fixture {
        fn new(field: Heightfield) -> Self {
            Self {
                source: ElevationSource::new(field, VerticalScale::new(0.0, 1000.0)),
                detail: DetailSynthesizer::new(&DetailConfig::default()),
                classifier: BiomeClassifier::default(),
                mapper: CoordinateMapper::new(256.0),
            }
        }

        fn sources(&self) -> BuildSources<'_> {
            BuildSources {
                region: &self.source,
                detail: &self.detail,
                classifier: &self.classifier,
                mapper: &self.mapper,
            }
        }
    }

    fn params(detail_enabled: bool) -> BuildParams {
        BuildParams {
            resolution: 9,
            lod_levels: 3,
            detail_enabled,
            sea_level_m: 100.0,
        }
    }

    fn run(builder: &mut TileBuilder, sources: &BuildSources<'_>) -> (usize, BuildStatus) {
        let mut calls = 0;
        loop {
            calls += 1;
            match builder.step(sources) {
                BuildStatus::InProgress => continue,
                other => return (calls, other),
            }
        }
    }

    #[test]
    fn builds_in_discrete_steps() {
        let fx = Fixture::new(Heightfield::flat(65, 65, 0.5).unwrap());
        let p = params(true);
        let mut b = TileBuilder::begin_build(TileCoord::new(0, 0), p);
        let (calls, status) = run(&mut b, &fx.sources());
        assert_eq!(status, BuildStatus::Done);
        assert_eq!(calls, TileBuilder::steps_required(&p));
        assert!(b.is_finished());

        let tile = b.take_tile().unwrap();
        assert_eq!(tile.coord(), TileCoord::new(0, 0));
        assert_eq!(tile.lods().len(), 3);
        assert_eq!(tile.lods()[2].stride, 4);
        assert!(tile.detail().is_some());
        assert!(tile.collision().is_some());
        assert!(tile.memory_bytes() > 0);
        assert!(b.take_tile().is_none());
        // Further steps are harmless.
        assert_eq!(b.step(&fx.sources()), BuildStatus::Done);
    }

    #[test]
    fn skipping_detail_shares_elevation() {
        let fx = Fixture::new(Heightfield::flat(65, 65, 0.5).unwrap());
        let p = params(false);
        let mut b = TileBuilder::begin_build(TileCoord::new(1, 1), p);
        let (calls, _) = run(&mut b, &fx.sources());
        assert_eq!(calls, TileBuilder::steps_required(&p));
        let tile = b.take_tile().unwrap();
        assert!(tile.detail().is_none());
        assert!(Arc::ptr_eq(tile.surface(), tile.elevation().heights()));
    }

    #[test]
    fn identical_builds_are_identical() {
        let fx = Fixture::new(Heightfield::synthetic(65, 65, 3).unwrap());
        let build = || {
            let mut b = TileBuilder::begin_build(TileCoord::new(-2, 1), params(true));
            run(&mut b, &fx.sources());
            b.take_tile().unwrap()
        };
        let a = build();
        let b = build();
        assert_eq!(a.surface(), b.surface());
        assert_eq!(a.biomes(), b.biomes());
        assert_eq!(a.lods(), b.lods());
    }

    #[test]
    fn malformed_region_fails() {
        let field = Heightfield::from_fn(65, 65, |x, y| {
            if x == 36 && y == 36 { f32::NAN } else { 0.5 }
        })
        .unwrap();
        let fx = Fixture::new(field);
        let mut b = TileBuilder::begin_build(TileCoord::new(0, 0), params(false));
        let status = b.step(&fx.sources());
        assert!(matches!(
            status,
            BuildStatus::Failed(BuildError::MalformedRegion { .. })
        ));
        // A neighbouring tile does not touch the bad pixel.
        let mut ok = TileBuilder::begin_build(TileCoord::new(1, 0), params(false));
        assert_eq!(run(&mut ok, &fx.sources()).1, BuildStatus::Done);
    }

    #[test]
    fn sea_level_propagates_to_in_progress_build() {
        let fx = Fixture::new(Heightfield::flat(65, 65, 0.5).unwrap());
        let mut b = TileBuilder::begin_build(TileCoord::new(0, 0), params(false));
        // Sample + classify at sea level 100 m: 500 m ground is land.
        b.step(&fx.sources());
        b.step(&fx.sources());
        b.set_sea_level(900.0, &fx.classifier);
        run(&mut b, &fx.sources());
        let tile = b.take_tile().unwrap();
        assert!(tile.biomes().cells().iter().all(|c| c.is_water()));
    }

    #[test]
    fn degraded_region_skips_detail() {
        let fx = Fixture {
            source: ElevationSource::unavailable(VerticalScale::new(0.0, 1000.0)),
            ..Fixture::new(Heightfield::flat(65, 65, 0.5).unwrap())
        };
        let p = params(true);
        let mut b = TileBuilder::begin_build(TileCoord::new(0, 0), p);
        let (calls, status) = run(&mut b, &fx.sources());
        assert_eq!(status, BuildStatus::Done);
        assert_eq!(calls, TileBuilder::steps_required(&p) - 1);
        let tile = b.take_tile().unwrap();
        assert!(tile.elevation().is_degraded());
        assert!(tile.detail().is_none());
        assert!(tile.surface().iter().all(|h| *h == 100.0));
    }

    #[test]
    fn missing_stage_input_fails_the_build() {
        let fx = Fixture::new(Heightfield::flat(65, 65, 0.5).unwrap());
        let mut b = TileBuilder::begin_build(TileCoord::new(3, -1), params(true));
        b.stage = Stage::Lod(0);
        assert_eq!(
            b.step(&fx.sources()),
            BuildStatus::Failed(BuildError::OutOfOrder {
                coord: TileCoord::new(3, -1)
            })
        );
        assert!(b.take_tile().is_none());
    }
}
