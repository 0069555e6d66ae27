use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use glam::DVec3;
use terrastream_elevation::{ElevationSource, Heightfield, VerticalScale, tileset};
use terrastream_stream::{
    CollisionProbe, Consumer, MetricsRecorder, StreamConfig, StreamMetrics, StreamingOrchestrator,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "terrastream-cli", about = "CLI tool for terrain tile streaming")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and crate info
    Info,
    /// Bake a heightfield into a tileset directory
    Bake {
        /// Output directory
        output: PathBuf,
        /// Grayscale heightmap image; a synthetic field is generated when omitted
        #[arg(long)]
        image: Option<PathBuf>,
        /// Synthetic field width in pixels
        #[arg(long, default_value = "1024")]
        width: usize,
        /// Synthetic field height in pixels
        #[arg(long, default_value = "512")]
        height: usize,
        /// Synthetic field seed
        #[arg(short, long, default_value = "42")]
        seed: u32,
        /// Tile edge in pixels
        #[arg(long, default_value_t = tileset::DEFAULT_TILE_PX)]
        tile_px: usize,
    },
    /// Move an observer through the world and report streaming metrics
    Drive {
        /// Tileset directory; a synthetic field is used when omitted
        #[arg(long)]
        tileset: Option<PathBuf>,
        /// Stream config file (YAML, or JSON by extension)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Number of ticks to simulate
        #[arg(short, long, default_value = "600")]
        ticks: u64,
        /// World units travelled per tick
        #[arg(long, default_value = "16.0")]
        speed: f64,
        /// Heading in degrees, 0 is +X, 90 is +Z
        #[arg(long, default_value = "0.0")]
        heading: f64,
        /// Observer height above the ground
        #[arg(long, default_value = "2.0")]
        altitude: f64,
        /// Heightfield pixels per tile edge
        #[arg(long)]
        pixels_per_tile: Option<f64>,
        /// Normalized sea level to switch to mid-run
        #[arg(long)]
        sea_level: Option<f64>,
        /// Tick at which the sea level change applies
        #[arg(long, default_value = "1")]
        sea_level_at: u64,
        /// Tick at which every tile is force-unloaded
        #[arg(long)]
        reload_at: Option<u64>,
        /// Print metrics as JSON lines
        #[arg(long)]
        json: bool,
        /// Ticks between reports
        #[arg(long, default_value = "60")]
        report_every: u64,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Info => {
            println!("terrastream-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("common: {}", terrastream_common::crate_info());
            println!("elevation: {}", terrastream_elevation::crate_info());
            println!("stream: {}", terrastream_stream::crate_info());
            let scale = VerticalScale::default();
            println!(
                "datum: {} m .. {} m, sea level 0 m at {:.4}",
                scale.min_m,
                scale.max_m,
                scale.zero_datum()
            );
        }
        Commands::Bake {
            output,
            image,
            width,
            height,
            seed,
            tile_px,
        } => {
            let field = match image {
                Some(path) => load_image(&path)?,
                None => {
                    println!("Generating synthetic field {width}x{height}, seed={seed}");
                    Heightfield::synthetic(width, height, seed)?
                }
            };
            let meta = tileset::write_tileset(&output, &field, tile_px)
                .with_context(|| format!("writing tileset to {}", output.display()))?;
            println!(
                "Baked {}x{} px into {} tiles ({}x{}) at {}",
                meta.source_width,
                meta.source_height,
                meta.tiles.len(),
                meta.tiles_x,
                meta.tiles_y,
                output.display()
            );
        }
        Commands::Drive {
            tileset,
            config,
            ticks,
            speed,
            heading,
            altitude,
            pixels_per_tile,
            sea_level,
            sea_level_at,
            reload_at,
            json,
            report_every,
        } => {
            let config = match config {
                Some(path) => StreamConfig::load(&path)
                    .with_context(|| format!("loading config {}", path.display()))?,
                None => StreamConfig::default(),
            };
            let mut source = match tileset {
                Some(dir) => ElevationSource::open_or_unavailable(dir),
                None => ElevationSource::new(
                    Heightfield::synthetic(512, 512, 42)?,
                    VerticalScale::default(),
                ),
            };
            if let Some(ppt) = pixels_per_tile {
                anyhow::ensure!(ppt > 0.0, "--pixels-per-tile must be positive");
                source = source.with_pixels_per_tile(ppt);
            }
            let mut orch = StreamingOrchestrator::new(config, source)?;
            let mut consumers = vec![
                Consumer::Metrics(MetricsRecorder::new(ticks.max(1) as usize)),
                Consumer::Collision(CollisionProbe::new(1.0)),
            ];

            tracing::info!(ticks, speed, heading, "driving observer");
            let dir = DVec3::new(heading.to_radians().cos(), 0.0, heading.to_radians().sin());
            let mut ground = orch.sea_level_m();
            let mut observer = DVec3::new(0.0, ground + altitude, 0.0);
            for tick in 1..=ticks {
                if tick == sea_level_at {
                    if let Some(level) = sea_level {
                        orch.set_sea_level(level);
                    }
                }
                if reload_at == Some(tick) {
                    orch.force_unload_all();
                }
                orch.tick(observer);
                for consumer in &mut consumers {
                    consumer.observe(&orch, observer);
                }
                if report_every > 0 && tick % report_every == 0 {
                    report(&orch.get_metrics(), json)?;
                }

                observer += dir * speed;
                // Keep the last known ground over unstreamed terrain.
                if let Some(h) = orch.height_at(observer.x, observer.z) {
                    ground = h;
                }
                observer.y = ground + altitude;
            }

            summarize(&consumers, json)?;
        }
    }

    Ok(())
}

fn load_image(path: &Path) -> anyhow::Result<Heightfield> {
    let img = image::open(path)
        .with_context(|| format!("opening heightmap {}", path.display()))?
        .into_luma16();
    let (width, height) = img.dimensions();
    println!("Loaded heightmap {}: {width}x{height}", path.display());
    let mut field = Heightfield::from_u16(width as usize, height as usize, img.as_raw())?;
    field.normalize();
    Ok(field)
}

fn report(m: &StreamMetrics, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(m)?);
    } else {
        println!(
            "tick {:>5}: resident={:>3} queued={:>3} mem={:>8} KiB progress={:>5.1}% fps={:>6.1} terrain={:.3}ms governor={:?}",
            m.tick,
            m.resident_tile_count,
            m.queued_tile_count,
            m.memory_used_bytes / 1024,
            m.load_progress_ratio * 100.0,
            m.rolling_fps,
            m.rolling_terrain_time_ms,
            m.governor_state
        );
    }
    Ok(())
}

fn summarize(consumers: &[Consumer], json: bool) -> anyhow::Result<()> {
    for consumer in consumers {
        match consumer {
            Consumer::Metrics(recorder) => {
                let Some(last) = recorder.latest() else {
                    continue;
                };
                if json {
                    println!("{}", serde_json::to_string(last)?);
                } else {
                    println!(
                        "Done: {} ticks, {} built, {} evicted, {} failures, peak memory {} KiB",
                        last.tick,
                        last.tiles_built,
                        last.tiles_evicted,
                        last.build_failures,
                        recorder.peak_memory_bytes() / 1024
                    );
                }
            }
            Consumer::Collision(probe) if !json => {
                println!(
                    "Collision probe: {} contacts, {} misses, last {:?}",
                    probe.contacts(),
                    probe.misses(),
                    probe.last()
                );
            }
            Consumer::Collision(_) => {}
        }
    }
    Ok(())
}
