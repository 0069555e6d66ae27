//! Baked heightmap tilesets.
//!
//! Layout inside a tileset directory:
//! ```text
//! tileset.json        - metadata, vertical datum, per-tile entries
//! tile_{tx}_{ty}.bin  - u16 width, u16 height, then width*height u16 samples
//! ```
//! All integers are little-endian. Samples are stretched over the global
//! min/max of the source so `0` is the lowest and `65535` the highest point.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::ElevationError;
use crate::heightfield::{EVEREST_HEIGHT_M, Heightfield, MARIANA_DEPTH_M, VerticalScale};

/// Current tileset schema version.
pub const TILESET_VERSION: u32 = 1;
/// Name of the metadata file inside a tileset directory.
pub const METADATA_FILE: &str = "tileset.json";
/// Default tile edge in source pixels.
pub const DEFAULT_TILE_PX: usize = 512;

const HEADER_LEN: usize = 4;

/// Contents of `tileset.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TilesetMeta {
    pub version: u32,
    pub source_width: usize,
    pub source_height: usize,
    pub tile_size: usize,
    pub tiles_x: usize,
    pub tiles_y: usize,
    pub min_value: f32,
    pub max_value: f32,
    pub mariana_depth: f64,
    pub everest_height: f64,
    pub tiles: BTreeMap<String, TileEntry>,
}

/// One tile file in the set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileEntry {
    pub file: String,
    pub width: usize,
    pub height: usize,
    pub src_x: usize,
    pub src_y: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl TilesetMeta {
    /// Vertical datum recorded in the metadata.
    pub fn vertical_scale(&self) -> VerticalScale {
        VerticalScale::new(self.mariana_depth, self.everest_height)
    }
}

pub fn tile_key(tx: usize, ty: usize) -> String {
    format!("{tx}_{ty}")
}

/// Split a heightfield into tile files and write `tileset.json`.
pub fn write_tileset(
    dir: impl AsRef<Path>,
    field: &Heightfield,
    tile_px: usize,
) -> Result<TilesetMeta, ElevationError> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;
    let tile_px = tile_px.clamp(1, u16::MAX as usize);

    let width = field.width();
    let height = field.height();
    let (min_value, max_value) = field.min_max();
    let range = if max_value > min_value {
        max_value - min_value
    } else {
        1.0
    };
    let tiles_x = width.div_ceil(tile_px);
    let tiles_y = height.div_ceil(tile_px);

    let mut tiles = BTreeMap::new();
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let src_x = tx * tile_px;
            let src_y = ty * tile_px;
            let tile_w = tile_px.min(width - src_x);
            let tile_h = tile_px.min(height - src_y);

            let mut bytes = Vec::with_capacity(HEADER_LEN + tile_w * tile_h * 2);
            bytes.extend_from_slice(&(tile_w as u16).to_le_bytes());
            bytes.extend_from_slice(&(tile_h as u16).to_le_bytes());
            for y in src_y..src_y + tile_h {
                for x in src_x..src_x + tile_w {
                    let normalized = ((field.get(x, y) - min_value) / range).clamp(0.0, 1.0);
                    let v = (normalized * u16::MAX as f32) as u16;
                    bytes.extend_from_slice(&v.to_le_bytes());
                }
            }

            let key = tile_key(tx, ty);
            let file = format!("tile_{key}.bin");
            std::fs::write(dir.join(&file), &bytes)?;
            tiles.insert(
                key,
                TileEntry {
                    file,
                    width: tile_w,
                    height: tile_h,
                    src_x,
                    src_y,
                    sha256: Some(sha256_hex(&bytes)),
                },
            );
        }
    }

    let meta = TilesetMeta {
        version: TILESET_VERSION,
        source_width: width,
        source_height: height,
        tile_size: tile_px,
        tiles_x,
        tiles_y,
        min_value,
        max_value,
        mariana_depth: MARIANA_DEPTH_M,
        everest_height: EVEREST_HEIGHT_M,
        tiles,
    };
    let file = std::fs::File::create(dir.join(METADATA_FILE))?;
    serde_json::to_writer_pretty(file, &meta)?;
    tracing::info!(
        tiles = meta.tiles.len(),
        tiles_x,
        tiles_y,
        "wrote tileset to {}",
        dir.display()
    );
    Ok(meta)
}

/// Read `tileset.json` only.
pub fn read_meta(dir: impl AsRef<Path>) -> Result<TilesetMeta, ElevationError> {
    let file = std::fs::File::open(dir.as_ref().join(METADATA_FILE))?;
    let meta: TilesetMeta = serde_json::from_reader(file)?;
    if meta.version != TILESET_VERSION {
        return Err(ElevationError::SchemaMismatch {
            file_version: meta.version,
            expected_version: TILESET_VERSION,
        });
    }
    Ok(meta)
}

/// Reassemble the global heightfield from a tileset directory.
///
/// Every tile listed by the grid must be present; checksums are verified when
/// the metadata carries them.
pub fn load_tileset(dir: impl AsRef<Path>) -> Result<(TilesetMeta, Heightfield), ElevationError> {
    let dir = dir.as_ref();
    let meta = read_meta(dir)?;
    let mut field = Heightfield::flat(meta.source_width, meta.source_height, 0.0)?;

    for ty in 0..meta.tiles_y {
        for tx in 0..meta.tiles_x {
            let key = tile_key(tx, ty);
            let entry = meta
                .tiles
                .get(&key)
                .ok_or_else(|| ElevationError::MissingTile(key.clone()))?;
            let bytes = std::fs::read(dir.join(&entry.file))?;
            if let Some(expected) = &entry.sha256 {
                let actual = sha256_hex(&bytes);
                if &actual != expected {
                    return Err(ElevationError::IntegrityMismatch {
                        file: entry.file.clone(),
                        expected: expected.clone(),
                        actual,
                    });
                }
            }
            let block = decode_tile(&entry.file, &bytes, entry)?;
            if entry.src_x + entry.width > meta.source_width
                || entry.src_y + entry.height > meta.source_height
            {
                return Err(ElevationError::MalformedTile {
                    file: entry.file.clone(),
                    reason: "tile extends past the source bounds".into(),
                });
            }
            field.blit(entry.src_x, entry.src_y, entry.width, &block);
        }
    }
    Ok((meta, field))
}

fn decode_tile(file: &str, bytes: &[u8], entry: &TileEntry) -> Result<Vec<f32>, ElevationError> {
    let malformed = |reason: String| ElevationError::MalformedTile {
        file: file.to_string(),
        reason,
    };
    if bytes.len() < HEADER_LEN {
        return Err(malformed(format!("{} bytes is shorter than the header", bytes.len())));
    }
    let w = u16::from_le_bytes([bytes[0], bytes[1]]) as usize;
    let h = u16::from_le_bytes([bytes[2], bytes[3]]) as usize;
    if w == 0 || h == 0 {
        return Err(malformed(format!("empty {w}x{h} tile")));
    }
    if w != entry.width || h != entry.height {
        return Err(malformed(format!(
            "header says {w}x{h}, metadata says {}x{}",
            entry.width, entry.height
        )));
    }
    let body = &bytes[HEADER_LEN..];
    if body.len() != w * h * 2 {
        return Err(malformed(format!(
            "expected {} sample bytes, found {}",
            w * h * 2,
            body.len()
        )));
    }
    Ok(body
        .chunks_exact(2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]) as f32 / u16::MAX as f32)
        .collect())
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
