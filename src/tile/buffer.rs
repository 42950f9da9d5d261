//! Pixel buffer for a single tile.
//!
//! Tiles are value-like: every operation returns a new tile and the pixels of
//! an existing tile are never modified. The buffer is reference counted so a
//! cached tile can be handed out to many readers without copying.

use std::fmt;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use image::imageops::{self, FilterType};
use image::{ImageReader, RgbImage};

use crate::error::StoreError;

/// Filter used for all rescaling (bilinear).
const RESIZE_FILTER: FilterType = FilterType::Triangle;

/// Immutable RGB tile.
#[derive(Clone, PartialEq, Eq)]
pub struct Tile {
    image: Arc<RgbImage>,
}

impl Tile {
    /// Create a black tile of the given size.
    pub fn new(width: u32, height: u32) -> Self {
        Self::from_image(RgbImage::new(width, height))
    }

    pub fn from_image(image: RgbImage) -> Self {
        Self {
            image: Arc::new(image),
        }
    }

    /// Create a tile from packed RGB bytes.
    ///
    /// Returns `None` if `pixels` is not exactly `width * height * 3` bytes.
    pub fn from_raw(width: u32, height: u32, pixels: Vec<u8>) -> Option<Self> {
        RgbImage::from_raw(width, height, pixels).map(Self::from_image)
    }

    /// Decode an encoded image (PNG or JPEG) into a tile.
    pub fn decode(data: &[u8]) -> Result<Self, image::ImageError> {
        let reader = ImageReader::new(Cursor::new(data)).with_guessed_format()?;
        Ok(Self::from_image(reader.decode()?.to_rgb8()))
    }

    /// Load a tile from disk, detecting the codec from the file contents.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let image = image::open(path).map_err(|e| StoreError::Image {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(Self::from_image(image.to_rgb8()))
    }

    /// Write the tile to `path`; the codec is chosen from the file extension.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        self.image.save(path).map_err(|e| StoreError::Image {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// `(width, height)` in pixels.
    pub fn size(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn as_image(&self) -> &RgbImage {
        &self.image
    }

    /// Packed RGB bytes, row-major.
    pub fn as_raw(&self) -> &[u8] {
        self.image.as_raw()
    }

    /// True if both handles share the same pixel buffer.
    pub fn ptr_eq(&self, other: &Tile) -> bool {
        Arc::ptr_eq(&self.image, &other.image)
    }

    /// Return the region inside the bounding box `(x1, y1, x2, y2)`.
    ///
    /// The box is clamped to the tile; a degenerate box yields a 1x1 region
    /// at the nearest valid corner.
    pub fn crop(&self, x1: u32, y1: u32, x2: u32, y2: u32) -> Tile {
        let (width, height) = self.size();
        let x1 = x1.min(width.saturating_sub(1));
        let y1 = y1.min(height.saturating_sub(1));
        let x2 = x2.min(width).max(x1 + 1);
        let y2 = y2.min(height).max(y1 + 1);

        let region = imageops::crop_imm(self.as_image(), x1, y1, x2 - x1, y2 - y1).to_image();
        Tile::from_image(region)
    }

    /// Return a copy rescaled to `width` x `height`, ignoring aspect ratio.
    ///
    /// Dimensions are clamped to at least one pixel.
    pub fn resize(&self, width: u32, height: u32) -> Tile {
        let width = width.max(1);
        let height = height.max(1);
        if (width, height) == self.size() {
            return self.clone();
        }
        Tile::from_image(imageops::resize(self.as_image(), width, height, RESIZE_FILTER))
    }

    /// Return a copy at half the resolution in each dimension.
    pub fn halved(&self) -> Tile {
        self.resize(self.width() / 2, self.height() / 2)
    }

    /// Merge up to four tiles laid out as:
    ///
    /// ```text
    /// +---------+
    /// | t1 | t2 |
    /// |----+----|
    /// | t3 | t4 |
    /// +---------+
    /// ```
    ///
    /// Absent quadrants are left black. The result is as wide as `t1` plus
    /// `t2` and as tall as `t1` plus `t3`.
    pub fn merged(t1: &Tile, t2: Option<&Tile>, t3: Option<&Tile>, t4: Option<&Tile>) -> Tile {
        let (w1, h1) = t1.size();
        let width = w1 + t2.map_or(0, Tile::width);
        let height = h1 + t3.map_or(0, Tile::height);

        let mut canvas = RgbImage::new(width, height);
        imageops::replace(&mut canvas, t1.as_image(), 0, 0);
        if let Some(t) = t2 {
            imageops::replace(&mut canvas, t.as_image(), i64::from(w1), 0);
        }
        if let Some(t) = t3 {
            imageops::replace(&mut canvas, t.as_image(), 0, i64::from(h1));
        }
        if let Some(t) = t4 {
            imageops::replace(&mut canvas, t.as_image(), i64::from(w1), i64::from(h1));
        }

        Tile::from_image(canvas)
    }
}

impl fmt::Debug for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tile")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}
