//! Forward-only pixel row sources consumed by the tiler.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use image::RgbImage;

use crate::error::PixelSourceError;

/// A stream of exactly `height()` rows, each `width() * bytes_per_pixel()`
/// bytes long, read top to bottom.
///
/// Sources are read once; the tiler never seeks back.
pub trait PixelSource: Send {
    /// Image width in pixels
    fn width(&self) -> u32;

    /// Image height in pixels
    fn height(&self) -> u32;

    /// Bytes per pixel: 1 (grey), 3 (RGB) or 4 (RGBA, alpha discarded)
    fn bytes_per_pixel(&self) -> usize;

    /// Fill `buf` with the next row.
    ///
    /// # Errors
    ///
    /// Returns `Truncated` if the stream ends before `height()` rows were
    /// read.
    fn read_row(&mut self, buf: &mut [u8]) -> Result<(), PixelSourceError>;

    /// Length in bytes of one row.
    fn row_len(&self) -> usize {
        self.width() as usize * self.bytes_per_pixel()
    }
}

impl<P: PixelSource + ?Sized> PixelSource for Box<P> {
    fn width(&self) -> u32 {
        (**self).width()
    }

    fn height(&self) -> u32 {
        (**self).height()
    }

    fn bytes_per_pixel(&self) -> usize {
        (**self).bytes_per_pixel()
    }

    fn read_row(&mut self, buf: &mut [u8]) -> Result<(), PixelSourceError> {
        (**self).read_row(buf)
    }
}

// =============================================================================
// PPM
// =============================================================================

/// Binary PPM (`P6`, maxval 255) reader.
pub struct PpmSource<R> {
    reader: R,
    width: u32,
    height: u32,
    rows_read: u32,
}

impl PpmSource<BufReader<File>> {
    /// Open a PPM file and parse its header.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PixelSourceError> {
        let file = File::open(path.as_ref())?;
        Self::new(BufReader::new(file))
    }
}

impl<R: BufRead + Send> PpmSource<R> {
    /// Parse the header from `reader`, leaving it positioned at the first
    /// pixel row.
    pub fn new(mut reader: R) -> Result<Self, PixelSourceError> {
        let (width, height) = read_ppm_header(&mut reader)?;
        Ok(Self {
            reader,
            width,
            height,
            rows_read: 0,
        })
    }
}

impl<R: BufRead + Send> PixelSource for PpmSource<R> {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn bytes_per_pixel(&self) -> usize {
        3
    }

    fn read_row(&mut self, buf: &mut [u8]) -> Result<(), PixelSourceError> {
        let truncated = PixelSourceError::Truncated {
            row: self.rows_read,
            height: self.height,
        };
        if self.rows_read >= self.height {
            return Err(truncated);
        }

        match self.reader.read_exact(buf) {
            Ok(()) => {
                self.rows_read += 1;
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(truncated),
            Err(e) => Err(e.into()),
        }
    }
}

/// Read header lines until the four entries `P6 width height maxval` are
/// collected, skipping `#` comments.
fn read_ppm_header<R: BufRead>(reader: &mut R) -> Result<(u32, u32), PixelSourceError> {
    let mut header: Vec<String> = Vec::with_capacity(4);
    let mut line = Vec::new();

    while header.len() < 4 {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            return Err(PixelSourceError::InvalidHeader(
                "not enough entries in PPM header".to_string(),
            ));
        }
        let text = String::from_utf8_lossy(&line);
        // comments run from '#' to the end of the line
        let content = text.split('#').next().unwrap_or_default();
        header.extend(content.split_whitespace().map(str::to_string));
    }

    if header[0] != "P6" {
        return Err(PixelSourceError::InvalidHeader(
            "can only load binary PPM (P6 format)".to_string(),
        ));
    }

    let invalid = |_| PixelSourceError::InvalidHeader("invalid PPM header".to_string());
    let width: u32 = header[1].parse().map_err(invalid)?;
    let height: u32 = header[2].parse().map_err(invalid)?;
    let maxval: u32 = header[3].parse().map_err(invalid)?;

    if maxval != 255 {
        return Err(PixelSourceError::InvalidHeader(
            "PPM maxval must equal 255".to_string(),
        ));
    }
    if width == 0 || height == 0 {
        return Err(PixelSourceError::InvalidHeader(format!(
            "empty image ({}x{})",
            width, height
        )));
    }

    Ok((width, height))
}

// =============================================================================
// In-memory
// =============================================================================

/// Pixel source over a buffer already held in memory.
#[derive(Debug, Clone)]
pub struct RawSource {
    pixels: Vec<u8>,
    width: u32,
    height: u32,
    bytes_per_pixel: usize,
    offset: usize,
    rows_read: u32,
}

impl RawSource {
    /// Wrap packed rows of `width * bytes_per_pixel` bytes.
    ///
    /// A buffer shorter than `height` rows yields a `Truncated` error once
    /// the missing rows are reached.
    pub fn new(width: u32, height: u32, bytes_per_pixel: usize, pixels: Vec<u8>) -> Self {
        Self {
            pixels,
            width,
            height,
            bytes_per_pixel,
            offset: 0,
            rows_read: 0,
        }
    }

    pub fn from_image(image: &RgbImage) -> Self {
        Self::new(image.width(), image.height(), 3, image.as_raw().clone())
    }
}

impl PixelSource for RawSource {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn bytes_per_pixel(&self) -> usize {
        self.bytes_per_pixel
    }

    fn read_row(&mut self, buf: &mut [u8]) -> Result<(), PixelSourceError> {
        let end = self.offset + buf.len();
        if self.rows_read >= self.height || end > self.pixels.len() {
            return Err(PixelSourceError::Truncated {
                row: self.rows_read,
                height: self.height,
            });
        }
        buf.copy_from_slice(&self.pixels[self.offset..end]);
        self.offset = end;
        self.rows_read += 1;
        Ok(())
    }
}
