//! Pyramid construction.
//!
//! A [`Tiler`] reads a [`PixelSource`] once, top to bottom, and writes every
//! level of the tile pyramid into a [`TileStore`](crate::store::TileStore).

mod source;
mod tiler;

pub use source::{PixelSource, PpmSource, RawSource};
pub use tiler::{Tiler, TilingProgress, DEFAULT_FILE_EXT, DEFAULT_TILE_SIZE};
