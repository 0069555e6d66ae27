use std::hint::black_box;
use std::time::Instant;

use glam::DVec3;
use terrastream_common::CoordinateMapper;
use terrastream_elevation::{ElevationSource, Heightfield, VerticalScale};
use terrastream_stream::{MAX_TICK_BUDGET_MS, StreamConfig, StreamingOrchestrator};

fn source() -> ElevationSource {
    let field = Heightfield::synthetic(256, 256, 7).expect("synthetic heightfield");
    ElevationSource::new(field, VerticalScale::default())
}

fn bench_tiles_within(radius: f64, iterations: usize) {
    let mapper = CoordinateMapper::new(512.0);
    let start = Instant::now();
    for i in 0..iterations {
        let pos = DVec3::new(i as f64 * 3.0, 0.0, 256.0);
        let _ = black_box(mapper.tiles_within(black_box(pos), black_box(radius)));
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!("  tiles_within (r={radius}, {iterations} iters): {per_iter:?}/iter, total {elapsed:?}");
}

fn bench_cold_load(resolution: usize, lod_levels: usize) {
    let config = StreamConfig {
        tile_resolution: resolution,
        lod_levels,
        max_tick_budget_ms: MAX_TICK_BUDGET_MS,
        ..StreamConfig::default()
    };
    let mut orch = StreamingOrchestrator::new(config, source()).expect("valid config");
    let start = Instant::now();
    let report = orch.tick(black_box(DVec3::new(256.0, 0.0, 256.0)));
    let elapsed = start.elapsed();
    println!(
        "  cold load (res {resolution}, {lod_levels} lods): {} tiles in {elapsed:?}, {} bytes",
        report.built.len(),
        orch.cache().memory_used()
    );
}

fn bench_walk(ticks: usize, speed: f64) {
    let mut orch =
        StreamingOrchestrator::new(StreamConfig::default(), source()).expect("valid config");
    let start = Instant::now();
    let mut built = 0;
    for i in 0..ticks {
        let observer = DVec3::new(i as f64 * speed, 0.0, 256.0);
        built += black_box(orch.tick(black_box(observer))).built.len();
    }
    let elapsed = start.elapsed();
    let per_tick = elapsed / ticks as u32;
    let m = orch.get_metrics();
    println!(
        "  walk ({ticks} ticks, {speed} m/tick): {per_tick:?}/tick, {built} built, {} resident, governor {:?}",
        m.resident_tile_count, m.governor_state
    );
}

fn bench_height_queries(iterations: usize) {
    let config = StreamConfig {
        max_tick_budget_ms: MAX_TICK_BUDGET_MS,
        ..StreamConfig::default()
    };
    let mut orch = StreamingOrchestrator::new(config, source()).expect("valid config");
    orch.tick(DVec3::new(256.0, 0.0, 256.0));
    let start = Instant::now();
    for i in 0..iterations {
        let x = (i % 1024) as f64;
        let _ = black_box(orch.height_at(black_box(x), black_box(300.0)));
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!("  height_at ({iterations} iters): {per_iter:?}/iter, total {elapsed:?}");
}

fn main() {
    println!("=== Stream Tile Benchmarks ===\n");

    println!("Desired set:");
    bench_tiles_within(1024.0, 10000);
    bench_tiles_within(4096.0, 1000);

    println!("\nCold load (unbounded budget):");
    bench_cold_load(33, 3);
    bench_cold_load(65, 4);
    bench_cold_load(129, 4);

    println!("\nBudgeted walk:");
    bench_walk(600, 8.0);
    bench_walk(600, 64.0);

    println!("\nQueries:");
    bench_height_queries(100000);

    println!("\n=== Done ===");
}
