//! Escape-time rendering of the Mandelbrot set.
//!
//! The set is drawn over the square `[-3, 1] x [-2, 2]` of the complex
//! plane, top row first. Points that have not escaped after
//! `MAX_ITERATIONS` are painted black; the rest are shaded by how quickly
//! they escape.

use async_trait::async_trait;
use image::{Rgb, RgbImage};

use super::DynamicSource;
use crate::error::ProviderError;
use crate::store::PyramidMetadata;
use crate::tile::{Tile, TileId};

const TILE_SIZE: u32 = 256;
const MAX_ITERATIONS: u32 = 512;

/// Dynamic source for `dynamic:mandel`.
#[derive(Debug, Default)]
pub struct MandelSource;

impl MandelSource {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DynamicSource for MandelSource {
    fn media_prefix(&self) -> &str {
        "dynamic:mandel"
    }

    fn metadata(&self) -> PyramidMetadata {
        PyramidMetadata::procedural(TILE_SIZE, "png", 1.0)
    }

    async fn produce(&self, id: &TileId) -> Result<Option<Tile>, ProviderError> {
        let id = id.clone();
        tokio::task::spawn_blocking(move || render(&id))
            .await
            .map(Some)
            .map_err(|e| ProviderError::Render(e.to_string()))
    }
}

fn render(id: &TileId) -> Tile {
    let units = 4.0 * 2f64.powi(-id.level);
    let x1 = f64::from(id.col) * units - 3.0;
    let y1 = 2.0 - f64::from(id.row) * units;
    let step = units / f64::from(TILE_SIZE);

    let image = RgbImage::from_fn(TILE_SIZE, TILE_SIZE, |px, py| {
        let cx = x1 + (f64::from(px) + 0.5) * step;
        let cy = y1 - (f64::from(py) + 0.5) * step;
        shade(escape_time(cx, cy))
    });
    Tile::from_image(image)
}

/// Iterations before `z -> z^2 + c` leaves the radius-2 disc, or `None` if
/// it never does within `MAX_ITERATIONS`.
fn escape_time(cx: f64, cy: f64) -> Option<u32> {
    let (mut zx, mut zy) = (0.0f64, 0.0f64);
    for i in 0..MAX_ITERATIONS {
        let (zx2, zy2) = (zx * zx, zy * zy);
        if zx2 + zy2 > 4.0 {
            return Some(i);
        }
        zy = 2.0 * zx * zy + cy;
        zx = zx2 - zy2 + cx;
    }
    None
}

fn shade(escape: Option<u32>) -> Rgb<u8> {
    match escape {
        None => Rgb([0, 0, 0]),
        Some(i) => {
            let v = (f64::from(i) / f64::from(MAX_ITERATIONS)).sqrt();
            let v = (v * 255.0) as u8;
            Rgb([v, v, v])
        }
    }
}
