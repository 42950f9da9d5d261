//! Pyramid construction from a forward-only pixel source.
//!
//! The pyramid is built depth-first from level 0. Building a level-`L` row
//! first builds the two level-`L+1` rows beneath it, so the recursion reaches
//! `max_level` in strictly increasing row order and the source is read
//! exactly once, top to bottom:
//!
//! ```text
//! tiles(0, 0)
//! ├── tiles(1, 0)
//! │   ├── tiles(2, 0)   <- source rows 0..S
//! │   └── tiles(2, 1)   <- source rows S..2S
//! └── tiles(1, 1)
//!     ├── tiles(2, 2)
//!     └── tiles(2, 3)
//! ```
//!
//! Each tile is written to the store as soon as it exists, then halved and
//! handed up for merging into its parent.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::source::PixelSource;
use crate::error::{PixelSourceError, StoreError, TileError};
use crate::store::{total_tile_count, PyramidMetadata, TileStore};
use crate::tile::{Tile, TileId};

/// Default tile side length in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 256;

/// Default codec for stored tiles.
pub const DEFAULT_FILE_EXT: &str = "jpg";

// =============================================================================
// Progress
// =============================================================================

/// Shared, monotonic view of a build's progress.
#[derive(Debug, Clone, Default)]
pub struct TilingProgress {
    inner: Arc<ProgressState>,
}

#[derive(Debug, Default)]
struct ProgressState {
    saved: AtomicU64,
    total: AtomicU64,
    finished: AtomicBool,
}

impl TilingProgress {
    /// Fraction of tiles written, in `[0, 1]`; exactly 1.0 once the build
    /// has finished, successfully or not.
    pub fn fraction(&self) -> f64 {
        if self.is_finished() {
            return 1.0;
        }
        let total = self.inner.total.load(Ordering::Acquire);
        if total == 0 {
            return 0.0;
        }
        let saved = self.inner.saved.load(Ordering::Acquire).min(total);
        saved as f64 / total as f64
    }

    pub fn tiles_saved(&self) -> u64 {
        self.inner.saved.load(Ordering::Acquire)
    }

    pub fn total_tiles(&self) -> u64 {
        self.inner.total.load(Ordering::Acquire)
    }

    pub fn is_finished(&self) -> bool {
        self.inner.finished.load(Ordering::Acquire)
    }

    fn start(&self, total: u64) {
        self.inner.total.store(total, Ordering::Release);
    }

    /// Record one saved tile; returns the new count.
    fn advance(&self) -> u64 {
        self.inner.saved.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn finish(&self) {
        self.inner.finished.store(true, Ordering::Release);
    }
}

// =============================================================================
// Tiler
// =============================================================================

/// Builds and persists the tile pyramid of one image.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use tile_pyramid::pyramid::{PpmSource, Tiler};
/// use tile_pyramid::store::TileStore;
///
/// let store = Arc::new(TileStore::new("/tmp/tilestore"));
/// let source = PpmSource::open("photo.ppm").unwrap();
/// let meta = Tiler::new(store, source, "photo.ppm")
///     .with_file_ext("png")
///     .run()
///     .unwrap();
/// println!("built {} levels", meta.max_level.unwrap_or(0) + 1);
/// ```
pub struct Tiler<S> {
    source: S,
    store: Arc<TileStore>,
    media_id: String,
    file_ext: String,
    tile_size: u32,
    progress: TilingProgress,
}

impl<S: PixelSource> Tiler<S> {
    pub fn new(store: Arc<TileStore>, source: S, media_id: impl Into<String>) -> Self {
        Self {
            source,
            store,
            media_id: media_id.into(),
            file_ext: DEFAULT_FILE_EXT.to_string(),
            tile_size: DEFAULT_TILE_SIZE,
            progress: TilingProgress::default(),
        }
    }

    /// Set the stored tile codec (`jpg` or `png`).
    pub fn with_file_ext(mut self, file_ext: impl Into<String>) -> Self {
        self.file_ext = file_ext.into();
        self
    }

    pub fn with_tile_size(mut self, tile_size: u32) -> Self {
        self.tile_size = tile_size;
        self
    }

    pub fn media_id(&self) -> &str {
        &self.media_id
    }

    /// Handle for observing progress from another thread.
    pub fn progress(&self) -> TilingProgress {
        self.progress.clone()
    }

    /// Build the pyramid, blocking the current thread.
    ///
    /// Holds the store's disk lock for the duration of the build. On success
    /// the metadata record is written last, so a media only reports as tiled
    /// once every tile exists.
    ///
    /// # Errors
    ///
    /// Returns `PyramidBuildFailed` if the source is invalid or truncated or
    /// a tile cannot be written. The media directory is removed in that case.
    pub fn run(mut self) -> Result<PyramidMetadata, TileError> {
        let result = self.build();
        self.progress.finish();
        result
    }

    fn build(&mut self) -> Result<PyramidMetadata, TileError> {
        let width = self.source.width();
        let height = self.source.height();

        if let Err(message) = self.check_parameters(width, height) {
            return Err(TileError::PyramidBuildFailed {
                media_id: self.media_id.clone(),
                message,
            });
        }

        let meta = PyramidMetadata::for_image(
            self.tile_size,
            self.file_ext.as_str(),
            u64::from(width),
            u64::from(height),
        );
        let max_level = meta.max_level.unwrap_or(0);
        let total = total_tile_count(self.tile_size, u64::from(width), u64::from(height));
        self.progress.start(total);

        info!(
            media_id = %self.media_id,
            width,
            height,
            max_level,
            total_tiles = total,
            "Tiling image"
        );

        let store = Arc::clone(&self.store);
        let result = {
            let _guard = store.disk_lock();
            let built = Build::new(self, max_level, width, height).tiles(0, 0);
            built.and_then(|_| {
                store
                    .write_metadata(&self.media_id, &meta.to_values())
                    .map_err(BuildError::from)
            })
        };

        match result {
            Ok(()) => {
                info!(media_id = %self.media_id, tiles = self.progress.tiles_saved(), "Tiling complete");
                Ok(meta)
            }
            Err(e) => {
                warn!(media_id = %self.media_id, error = %e, "Tiling failed, removing partial pyramid");
                if let Err(cleanup) = store.purge_media(&self.media_id) {
                    warn!(media_id = %self.media_id, error = %cleanup, "Failed to remove partial pyramid");
                }
                Err(TileError::PyramidBuildFailed {
                    media_id: self.media_id.clone(),
                    message: e.to_string(),
                })
            }
        }
    }

    fn check_parameters(&self, width: u32, height: u32) -> Result<(), String> {
        if width == 0 || height == 0 {
            return Err(format!("empty image ({}x{})", width, height));
        }
        if self.tile_size == 0 {
            return Err("tile size must be greater than 0".to_string());
        }
        if !matches!(self.source.bytes_per_pixel(), 1 | 3 | 4) {
            return Err(format!(
                "unsupported pixel size: {} bytes",
                self.source.bytes_per_pixel()
            ));
        }
        if self.file_ext.is_empty() {
            return Err("file extension must not be empty".to_string());
        }
        Ok(())
    }
}

impl<S: PixelSource + 'static> Tiler<S> {
    /// Run the build on tokio's blocking thread pool.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(self) -> JoinHandle<Result<PyramidMetadata, TileError>> {
        tokio::task::spawn_blocking(move || self.run())
    }
}

// =============================================================================
// Build State
// =============================================================================

#[derive(Debug, Error)]
enum BuildError {
    #[error(transparent)]
    Source(#[from] PixelSourceError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("tile buffer does not match {width}x{height}")]
    BufferSize { width: u32, height: u32 },
}

/// Geometry and scratch buffers of one running build.
struct Build<'a, S> {
    tiler: &'a mut Tiler<S>,
    media_dir: PathBuf,
    max_level: u32,

    /// Tile grid at `max_level`
    tiles_across: u32,
    tiles_down: u32,

    /// Width of the last column and height of the last row at `max_level`
    right_width: u32,
    bottom_height: u32,

    scanline: Vec<u8>,
    rgb: Vec<u8>,

    /// Last logged progress, in tenths
    logged_tenths: u64,
}

impl<'a, S: PixelSource> Build<'a, S> {
    fn new(tiler: &'a mut Tiler<S>, max_level: u32, width: u32, height: u32) -> Self {
        let tile_size = tiler.tile_size;
        let media_dir = tiler.store.media_path(&tiler.media_id);
        let row_len = tiler.source.row_len();

        Self {
            media_dir,
            max_level,
            tiles_across: width.div_ceil(tile_size),
            tiles_down: height.div_ceil(tile_size),
            right_width: (width - 1) % tile_size + 1,
            bottom_height: (height - 1) % tile_size + 1,
            scanline: vec![0; row_len],
            rgb: Vec::with_capacity(width as usize * 3),
            logged_tenths: 0,
            tiler,
        }
    }

    /// Build, save and return (halved) the tiles of `row` at `level`.
    ///
    /// Returns `None` for rows below the bottom of the image.
    fn tiles(&mut self, level: u32, row: u32) -> Result<Option<Vec<Tile>>, BuildError> {
        let tiles = if level == self.max_level {
            self.load_row(row)?
        } else {
            let upper = self.tiles(level + 1, row * 2)?;
            let lower = self.tiles(level + 1, row * 2 + 1)?;
            upper.map(|upper| merge_rows(&upper, lower.as_deref()))
        };

        let Some(tiles) = tiles else {
            return Ok(None);
        };

        let mut halved = Vec::with_capacity(tiles.len());
        for (col, tile) in tiles.iter().enumerate() {
            self.save(tile, level, row, col as u32)?;
            if level > 0 {
                halved.push(tile.halved());
            }
        }
        Ok(Some(halved))
    }

    /// Read one row of tiles at `max_level` from the source.
    fn load_row(&mut self, row: u32) -> Result<Option<Vec<Tile>>, BuildError> {
        if row >= self.tiles_down {
            return Ok(None);
        }

        let tile_size = self.tiler.tile_size as usize;
        let tile_height = if row == self.tiles_down - 1 {
            self.bottom_height
        } else {
            self.tiler.tile_size
        };
        let across = self.tiles_across as usize;

        let mut buffers: Vec<Vec<u8>> = (0..across)
            .map(|i| {
                let w = if i == across - 1 {
                    self.right_width as usize
                } else {
                    tile_size
                };
                Vec::with_capacity(w * tile_height as usize * 3)
            })
            .collect();

        for _ in 0..tile_height {
            self.tiler.source.read_row(&mut self.scanline)?;
            to_rgb(&self.scanline, self.tiler.source.bytes_per_pixel(), &mut self.rgb);

            for (i, buffer) in buffers.iter_mut().enumerate() {
                let start = i * tile_size * 3;
                let end = if i == across - 1 {
                    self.rgb.len()
                } else {
                    start + tile_size * 3
                };
                buffer.extend_from_slice(&self.rgb[start..end]);
            }
        }

        buffers
            .into_iter()
            .enumerate()
            .map(|(i, pixels)| {
                let width = if i == across - 1 {
                    self.right_width
                } else {
                    self.tiler.tile_size
                };
                Tile::from_raw(width, tile_height, pixels).ok_or(BuildError::BufferSize {
                    width,
                    height: tile_height,
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }

    fn save(&mut self, tile: &Tile, level: u32, row: u32, col: u32) -> Result<(), BuildError> {
        let id = TileId::new(self.tiler.media_id.as_str(), level as i32, row, col);
        let path = self.tiler.store.tile_path(
            &id,
            true,
            Some(self.media_dir.as_path()),
            Some(self.tiler.file_ext.as_str()),
        )?;
        tile.save(&path)?;

        let progress = &self.tiler.progress;
        let saved = progress.advance();
        debug!(tile = %id, saved, "Saved tile");

        let total = progress.total_tiles().max(1);
        let tenths = saved * 10 / total;
        if tenths > self.logged_tenths {
            self.logged_tenths = tenths;
            info!(media_id = %self.tiler.media_id, "{:3}% tiled", tenths * 10);
        }
        Ok(())
    }
}

/// Merge blocks of four tiles from two adjacent rows into one row of tiles.
///
/// `lower` is absent below the last row of the image; odd-length rows leave
/// the right half of their last block empty.
fn merge_rows(upper: &[Tile], lower: Option<&[Tile]>) -> Vec<Tile> {
    let lower = lower.unwrap_or(&[]);
    upper
        .chunks(2)
        .enumerate()
        .map(|(i, pair)| {
            Tile::merged(
                &pair[0],
                pair.get(1),
                lower.get(i * 2),
                lower.get(i * 2 + 1),
            )
        })
        .collect()
}

/// Expand a row of grey, RGB or RGBA pixels into packed RGB.
fn to_rgb(row: &[u8], bytes_per_pixel: usize, out: &mut Vec<u8>) {
    out.clear();
    match bytes_per_pixel {
        1 => out.extend(row.iter().flat_map(|&v| [v, v, v])),
        4 => out.extend(row.chunks_exact(4).flat_map(|p| [p[0], p[1], p[2]])),
        _ => out.extend_from_slice(row),
    }
}
