/// Errors from heightfield construction and tileset I/O.
#[derive(Debug, thiserror::Error)]
pub enum ElevationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("schema version mismatch: file has v{file_version}, expected v{expected_version}")]
    SchemaMismatch {
        file_version: u32,
        expected_version: u32,
    },
    #[error("integrity check failed for {file}: expected {expected}, got {actual}")]
    IntegrityMismatch {
        file: String,
        expected: String,
        actual: String,
    },
    #[error("malformed tile {file}: {reason}")]
    MalformedTile { file: String, reason: String },
    #[error("tile {0} missing from tileset")]
    MissingTile(String),
    #[error("heightfield is {width}x{height} but {actual} samples were supplied")]
    DimensionMismatch {
        width: usize,
        height: usize,
        actual: usize,
    },
    #[error("heightfield must be at least 2x2, got {width}x{height}")]
    TooSmall { width: usize, height: usize },
}
