//! Test utilities for integration tests.
//!
//! This module provides helpers for writing test images, building pyramids
//! in temporary stores and waiting for background tile loads.

use async_trait::async_trait;
use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

use tile_pyramid::error::{ProviderError, TileError};
use tile_pyramid::{
    DynamicSource, PpmSource, PyramidMetadata, Tile, TileId, TileManager, TileStore, Tiler,
};

/// Upper bound for a background load in tests.
pub const LOAD_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Images
// =============================================================================

/// An image whose every pixel encodes its own position.
pub fn gradient_image(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x / 256 + y / 256) * 40) as u8])
    })
}

/// Encode `image` as a binary PPM file.
pub fn create_ppm(image: &RgbImage) -> Vec<u8> {
    let mut data = format!("P6\n# test image\n{} {}\n255\n", image.width(), image.height())
        .into_bytes();
    data.extend_from_slice(image.as_raw());
    data
}

/// Write `image` as `name` inside `dir` and return its path.
pub fn write_ppm(dir: &Path, name: &str, image: &RgbImage) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, create_ppm(image)).unwrap();
    path
}

// =============================================================================
// Stores and Pyramids
// =============================================================================

/// A tile store in a temporary directory that lives as long as this value.
pub struct TestStore {
    pub dir: TempDir,
    pub store: Arc<TileStore>,
}

impl TestStore {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TileStore::new(dir.path().join("tilestore")));
        Self { dir, store }
    }

    /// Write `image` as a PPM and build a png pyramid for it.
    pub fn tile_image(&self, media_id: &str, image: &RgbImage, tile_size: u32) -> PyramidMetadata {
        let path = write_ppm(self.dir.path(), "input.ppm", image);
        let source = PpmSource::open(&path).unwrap();
        Tiler::new(Arc::clone(&self.store), source, media_id)
            .with_tile_size(tile_size)
            .with_file_ext("png")
            .run()
            .unwrap()
    }
}

/// Poll `manager` until tile `id` is no longer pending.
pub async fn wait_for_tile(manager: &TileManager, id: &TileId) -> Result<Tile, TileError> {
    let deadline = Instant::now() + LOAD_TIMEOUT;
    loop {
        match manager.get_tile(id) {
            Err(TileError::NotLoaded { .. }) if Instant::now() < deadline => {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            other => return other,
        }
    }
}

// =============================================================================
// Dynamic Sources
// =============================================================================

/// A dynamic source producing solid tiles and counting how often it runs.
pub struct CountingSource {
    prefix: String,
    color: Rgb<u8>,
    produced: AtomicUsize,
}

impl CountingSource {
    pub fn new(prefix: impl Into<String>, color: Rgb<u8>) -> Self {
        Self {
            prefix: prefix.into(),
            color,
            produced: AtomicUsize::new(0),
        }
    }

    pub fn produced(&self) -> usize {
        self.produced.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DynamicSource for CountingSource {
    fn media_prefix(&self) -> &str {
        &self.prefix
    }

    fn metadata(&self) -> PyramidMetadata {
        PyramidMetadata::procedural(64, "png", 2.0)
    }

    async fn produce(&self, _id: &TileId) -> Result<Option<Tile>, ProviderError> {
        self.produced.fetch_add(1, Ordering::SeqCst);
        Ok(Some(Tile::from_image(RgbImage::from_pixel(64, 64, self.color))))
    }
}

/// Pixel-exact comparison of a tile against a region of `image`.
pub fn matches_region(tile: &Tile, image: &RgbImage, x: u32, y: u32) -> bool {
    let (width, height) = tile.size();
    let expected = image::imageops::crop_imm(image, x, y, width, height).to_image();
    tile.as_image() == &expected
}
