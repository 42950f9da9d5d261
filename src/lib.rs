//! # Tile Pyramid
//!
//! A tile pyramid engine for zoomable user interfaces.
//!
//! Large images are cut into a pyramid of fixed-size tiles: level 0 is the
//! whole image in a single tile, and every further level doubles the
//! resolution. A viewer asks for the tiles covering its viewport at the
//! current zoom; this crate builds the pyramids, stores them on disk, loads
//! them in the background and, while a load is pending, synthesizes an
//! approximation from the nearest loaded ancestor.
//!
//! ## Features
//!
//! - **Streaming pyramid construction**: Tiles an image row by row, never
//!   holding more than two tile rows per level in memory
//! - **Content-addressed store**: One directory per media, named by the
//!   SHA-256 of the media id, with a typed metadata record
//! - **Bounded caches**: LRU caches with capacity, max-age and access-count
//!   eviction
//! - **Asynchronous providers**: LIFO worker queues loading tiles from disk
//!   or generating them on demand
//! - **Dynamic media**: Barnsley fern, Mandelbrot set and OpenStreetMap
//!   sources, with generated tiles written through to the store
//!
//! ## Architecture
//!
//! - [`tile`] - Tile ids, pixel buffers and the tile cache
//! - [`store`] - On-disk tile store and pyramid metadata
//! - [`pyramid`] - Pixel sources and the pyramid builder
//! - [`provider`] - Background tile loaders, static and dynamic
//! - [`manager`] - Tile requests, routing and tile synthesis
//! - [`scene`] - Scene files arranging media on the canvas
//! - [`config`] - CLI configuration
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tile_pyramid::{ManagerConfig, PpmSource, TileId, TileManager, TileStore, Tiler};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(TileStore::new("/tmp/tilestore"));
//!
//!     // Build the pyramid once
//!     let source = PpmSource::open("page.ppm")?;
//!     Tiler::new(Arc::clone(&store), source, "page.ppm").spawn().await??;
//!
//!     // Then serve tiles from it
//!     let manager = TileManager::new(store, ManagerConfig::default(), &tokio::runtime::Handle::current());
//!     let (tile, is_final) = manager.cut_tile(&TileId::new("page.ppm", 2, 1, 3), 0)?;
//!     println!("{:?} final={}", tile, is_final);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod manager;
pub mod provider;
pub mod pyramid;
pub mod scene;
pub mod store;
pub mod tile;

// Re-export commonly used types
pub use error::{CacheError, PixelSourceError, ProviderError, SceneError, StoreError, TileError};
pub use manager::{ManagerConfig, TileManager, DEFAULT_TOTAL_CACHE_SIZE};
pub use provider::{
    DynamicLoader, DynamicSource, FernSource, MandelSource, OsmSource, StaticLoader, TileLoader,
    TileProvider, DEFAULT_OSM_URL, DEFAULT_USER_AGENT, DYNAMIC_PREFIX,
};
pub use pyramid::{
    PixelSource, PpmSource, RawSource, Tiler, TilingProgress, DEFAULT_FILE_EXT, DEFAULT_TILE_SIZE,
};
pub use scene::{ObjectKind, ResolvedObject, Scene, SceneObject};
pub use store::{MetadataValue, PyramidMetadata, TileStore};
pub use tile::{
    CachedTile, Tile, TileCache, TileId, DEFAULT_TILE_CACHE_CAPACITY, DEFAULT_TILE_CACHE_MAX_AGE,
};
