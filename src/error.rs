use std::path::PathBuf;

use thiserror::Error;

use crate::tile::TileId;

/// Errors raised by the on-disk tile store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Filesystem read/write failure
    #[error("I/O error at {}: {message}", path.display())]
    Io { path: PathBuf, message: String },

    /// A metadata key needed to resolve a path is not recorded
    #[error("Missing metadata '{key}' for media {media_id}")]
    MissingMetadata { media_id: String, key: String },

    /// A line in a metadata file could not be parsed
    #[error("Invalid metadata line: {line:?}")]
    InvalidMetadata { line: String },

    /// Tile image could not be encoded or decoded
    #[error("Image error at {}: {message}", path.display())]
    Image { path: PathBuf, message: String },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

/// Errors raised while resolving a single tile inside a provider.
///
/// These never reach the caller of `request`: the worker converts them into
/// an unavailable marker in the cache.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Local file access failed
    #[error("I/O error: {0}")]
    Io(String),

    /// Remote tile server request failed
    #[error("HTTP error: {0}")]
    Http(String),

    /// Tile bytes could not be decoded as an image
    #[error("Decode error: {0}")]
    Decode(String),

    /// Procedural generator failed
    #[error("Render error: {0}")]
    Render(String),

    /// The blocking task running the load panicked or was cancelled
    #[error("Load task failed: {0}")]
    TaskFailed(String),
}

impl From<StoreError> for ProviderError {
    fn from(err: StoreError) -> Self {
        ProviderError::Io(err.to_string())
    }
}

/// Errors raised by a tile cache lookup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// No entry for the requested tile
    #[error("Tile not cached: {0}")]
    NotFound(TileId),
}

/// Errors raised while reading a raw pixel stream.
#[derive(Debug, Clone, Error)]
pub enum PixelSourceError {
    /// Underlying reader failed
    #[error("I/O error: {0}")]
    Io(String),

    /// Stream ended before all rows announced by the header were read
    #[error("Less data in image than reported by the header (row {row} of {height})")]
    Truncated { row: u32, height: u32 },

    /// Header is malformed or describes an unsupported image
    #[error("Invalid header: {0}")]
    InvalidHeader(String),
}

impl From<std::io::Error> for PixelSourceError {
    fn from(err: std::io::Error) -> Self {
        PixelSourceError::Io(err.to_string())
    }
}

/// Errors raised while reading or writing a scene file.
#[derive(Debug, Clone, Error)]
pub enum SceneError {
    /// Scene file could not be read or written
    #[error("I/O error at {}: {message}", path.display())]
    Io { path: PathBuf, message: String },

    /// A line does not match the scene format
    #[error("Invalid scene line {line}: {message}")]
    Parse { line: usize, message: String },
}

/// Errors surfaced by the tile manager and pyramid builder.
///
/// `NotLoaded` is transient and retryable; `NotAvailable` is terminal for the
/// tile until its media is purged.
#[derive(Debug, Clone, Error)]
pub enum TileError {
    /// Requested a negative pyramid level
    #[error("Invalid tile level: {level}")]
    InvalidLevel { level: i32 },

    /// Media has never been tiled and is not dynamic
    #[error("Media not tiled: {media_id}")]
    MediaNotTiled { media_id: String },

    /// Tile is not cached yet; a load has been requested
    #[error("Tile not loaded: {tile}")]
    NotLoaded { tile: TileId },

    /// A previous load confirmed the tile does not exist
    #[error("Tile not available: {tile}")]
    NotAvailable { tile: TileId },

    /// Pyramid construction aborted; partial output was removed
    #[error("Pyramid build failed for {media_id}: {message}")]
    PyramidBuildFailed { media_id: String, message: String },

    /// Tile store failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
