//! Barnsley's fern, rendered by iterating its function system.
//!
//! The fern occupies the square `x in [-5, 5]`, `y in [0, 10]`. A tile at
//! level `L` covers a `10 / 2^L` sided square of it. Every tile replays the
//! chaos game from the origin and plots only the points that land inside
//! its square, so deep tiles show a sparse scattering.

use async_trait::async_trait;
use image::{Rgb, RgbImage};

use super::DynamicSource;
use crate::error::ProviderError;
use crate::store::PyramidMetadata;
use crate::tile::{Tile, TileId};

const TILE_SIZE: u32 = 256;
const MAX_ITERATIONS: usize = 50_000;
const MAX_POINTS: usize = 10_000;
const COLOR: Rgb<u8> = Rgb([100, 170, 0]);

/// `(probability, [a, b, c, d, e, f])` with
/// `x' = a*x + b*y + c` and `y' = d*x + e*y + f`.
const TRANSFORMATIONS: [(f64, [f64; 6]); 4] = [
    // rachis
    (0.01, [0.00, 0.00, 0.00, 0.00, 0.16, 0.00]),
    // left hand first pinna
    (0.07, [0.20, -0.26, 0.00, 0.23, 0.22, 1.60]),
    // right hand first pinna
    (0.07, [-0.15, 0.28, 0.00, 0.26, 0.24, 0.44]),
    // body
    (0.85, [0.85, 0.04, 0.00, -0.04, 0.85, 1.60]),
];

/// Dynamic source for `dynamic:fern`.
#[derive(Debug, Default)]
pub struct FernSource;

impl FernSource {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DynamicSource for FernSource {
    fn media_prefix(&self) -> &str {
        "dynamic:fern"
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
    let units = 10.0 * 2f64.powi(-id.level);
    let x1 = f64::from(id.col) * units - 5.0;
    let y2 = 10.0 - f64::from(id.row) * units;
    let x2 = x1 + units;
    let y1 = y2 - units;

    let size = f64::from(TILE_SIZE);
    let mut image = RgbImage::new(TILE_SIZE, TILE_SIZE);
    let mut rng = XorShift::seeded(id);
    let (mut x, mut y) = (0.0f64, 0.0f64);
    let mut points = 0;

    for _ in 0..MAX_ITERATIONS {
        if (x1..=x2).contains(&x) && (y1..=y2).contains(&y) {
            let px = (((x - x1) * size / units) as u32).min(TILE_SIZE - 1);
            let py = ((size - (y - y1) * size / units) as u32).min(TILE_SIZE - 1);
            image.put_pixel(px, py, COLOR);
            points += 1;
            if points > MAX_POINTS {
                break;
            }
        }
        let t = choose(rng.next_f64());
        (x, y) = (t[0] * x + t[1] * y + t[2], t[3] * x + t[4] * y + t[5]);
    }

    Tile::from_image(image)
}

/// Pick a transformation for a uniform sample `n` in `[0, 1)`.
fn choose(mut n: f64) -> &'static [f64; 6] {
    for (probability, transformation) in &TRANSFORMATIONS {
        if n <= *probability {
            return transformation;
        }
        n -= probability;
    }
    &TRANSFORMATIONS[TRANSFORMATIONS.len() - 1].1
}

/// xorshift64* generator, seeded from the tile position so every render of
/// a tile is identical.
struct XorShift(u64);

impl XorShift {
    fn seeded(id: &TileId) -> Self {
        // splitmix64 finalizer over the packed position
        let mut z = (id.level as u64)
            .wrapping_mul(0x9E37_79B9_7F4A_7C15)
            ^ (u64::from(id.row) << 32 | u64::from(id.col));
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^= z >> 31;
        Self(if z == 0 { 0x2545_F491_4F6C_DD1D } else { z })
    }

    fn next_u64(&mut self) -> u64 {
        self.0 ^= self.0 >> 12;
        self.0 ^= self.0 << 25;
        self.0 ^= self.0 >> 27;
        self.0.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    /// Uniform in `[0, 1)`.
    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }
}
