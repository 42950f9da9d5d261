//! Tile value types and the in-memory tile cache.
//!
//! # Components
//!
//! - [`TileId`]: `(media, level, row, col)` key identifying one tile
//! - [`Tile`]: immutable RGB pixel buffer with crop/resize/merge operations
//! - [`TileCache`]: bounded, thread-safe cache with LRU, age and access-count eviction
//! - [`CachedTile`]: cached value, a tile or a confirmed-unavailable marker
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use tile_pyramid::tile::{CachedTile, Tile, TileCache, TileId};
//!
//! let cache = TileCache::new(64, Duration::ZERO);
//! let id = TileId::new("scans/page1.ppm", 1, 0, 1);
//!
//! match cache.get(&id) {
//!     Ok(CachedTile::Available(tile)) => println!("hit: {:?}", tile.size()),
//!     Ok(CachedTile::Unavailable) => println!("known to be missing"),
//!     Err(_) => cache.set(id, CachedTile::Available(Tile::new(256, 256))),
//! }
//! ```

mod buffer;
mod cache;
mod id;

pub use buffer::Tile;
pub use cache::{CachedTile, TileCache, DEFAULT_TILE_CACHE_CAPACITY, DEFAULT_TILE_CACHE_MAX_AGE};
pub use id::TileId;
