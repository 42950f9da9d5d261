//! Configuration for the `tilepyramid` command line tool.
//!
//! Every option can be given on the command line or through an environment
//! variable with the `TILES_` prefix:
//!
//! - `TILES_STORE_DIR` - Tile store root (default: `~/.tilepyramid/tilestore`)
//! - `TILES_CACHE_SIZE` - Tiles held in memory across both caches (default: 192)
//! - `TILES_CACHE_MAX_AGE` - Seconds before unused tiles are evicted (default: 60)
//! - `TILES_OSM_URL` - OpenStreetMap tile server (default: https://tile.openstreetmap.org)
//! - `TILES_USER_AGENT` - User agent for remote tile requests
//! - `TILES_TILE_SIZE` - Tile edge length for new pyramids (default: 256)
//! - `TILES_FILE_EXT` - Image format for new pyramids (default: jpg)
//!
//! # Example
//!
//! ```ignore
//! use clap::Parser;
//! use tile_pyramid::config::Config;
//!
//! let config = Config::parse();
//! config.validate()?;
//! let manager_config = config.manager_config();
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::manager::{ManagerConfig, DEFAULT_TOTAL_CACHE_SIZE};
use crate::provider::{DEFAULT_OSM_URL, DEFAULT_USER_AGENT};
use crate::pyramid::{DEFAULT_FILE_EXT, DEFAULT_TILE_SIZE};
use crate::tile::DEFAULT_TILE_CACHE_MAX_AGE;

// =============================================================================
// Default Values
// =============================================================================

/// Store directory below the home directory.
pub const DEFAULT_STORE_SUBDIR: &str = ".tilepyramid/tilestore";

/// Default cache max age in seconds.
pub const DEFAULT_CACHE_MAX_AGE_SECS: u64 = DEFAULT_TILE_CACHE_MAX_AGE.as_secs();

/// Largest accepted tile edge length.
pub const MAX_TILE_SIZE: u32 = 4096;

/// Image formats a pyramid can be written in.
pub const SUPPORTED_FILE_EXTS: &[&str] = &["jpg", "png"];

/// Default tile store root: `$HOME/.tilepyramid/tilestore`, or a relative
/// `.tilepyramid/tilestore` when no home directory is known.
pub fn default_store_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_default()
        .join(DEFAULT_STORE_SUBDIR)
}

// =============================================================================
// CLI Arguments
// =============================================================================

/// Tile Pyramid - build and inspect tile pyramids for zoomable canvases.
#[derive(Parser, Debug, Clone)]
#[command(name = "tilepyramid")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    #[command(flatten)]
    pub store: StoreConfig,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every command.
#[derive(Args, Debug, Clone)]
pub struct StoreConfig {
    /// Root directory of the tile store.
    #[arg(long, global = true, env = "TILES_STORE_DIR")]
    pub store_dir: Option<PathBuf>,

    /// Tiles held in memory across the primary and temporary caches.
    #[arg(long, global = true, default_value_t = DEFAULT_TOTAL_CACHE_SIZE, env = "TILES_CACHE_SIZE")]
    pub cache_size: usize,

    /// Seconds before an unused tile is evicted (0 keeps tiles forever).
    #[arg(long, global = true, default_value_t = DEFAULT_CACHE_MAX_AGE_SECS, env = "TILES_CACHE_MAX_AGE")]
    pub cache_max_age: u64,

    /// Base URL of the OpenStreetMap tile server.
    #[arg(long, global = true, default_value = DEFAULT_OSM_URL, env = "TILES_OSM_URL")]
    pub osm_url: String,

    /// User agent sent with remote tile requests.
    #[arg(long, global = true, default_value = DEFAULT_USER_AGENT, env = "TILES_USER_AGENT")]
    pub user_agent: String,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Build a tile pyramid from a binary PPM image.
    Tile(TileConfig),

    /// Print the metadata of a media.
    Info(InfoConfig),

    /// Print the objects of a scene file with their on-screen sizes.
    Scene(SceneConfig),
}

#[derive(Args, Debug, Clone)]
pub struct TileConfig {
    /// PPM (P6) image to tile.
    pub input: PathBuf,

    /// Media id to store the pyramid under (default: the input path).
    #[arg(long)]
    pub media_id: Option<String>,

    /// Tile edge length in pixels.
    #[arg(long, default_value_t = DEFAULT_TILE_SIZE, env = "TILES_TILE_SIZE")]
    pub tile_size: u32,

    /// Image format of the tiles.
    #[arg(long, default_value = DEFAULT_FILE_EXT, env = "TILES_FILE_EXT")]
    pub file_ext: String,
}

#[derive(Args, Debug, Clone)]
pub struct InfoConfig {
    /// Media id, e.g. an image path or `dynamic:fern`.
    pub media_id: String,
}

#[derive(Args, Debug, Clone)]
pub struct SceneConfig {
    /// Scene file to read.
    pub path: PathBuf,
}

impl Config {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        self.store.validate()?;

        if let Command::Tile(tile) = &self.command {
            tile.validate()?;
        }

        Ok(())
    }

    /// Tile store root, falling back to [`default_store_dir`].
    pub fn store_dir(&self) -> PathBuf {
        self.store.store_dir.clone().unwrap_or_else(default_store_dir)
    }

    /// Library-side settings for the tile manager.
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            total_cache_size: self.store.cache_size,
            cache_max_age: Duration::from_secs(self.store.cache_max_age),
            osm_url: self.store.osm_url.clone(),
            user_agent: self.store.user_agent.clone(),
        }
    }
}

impl StoreConfig {
    fn validate(&self) -> Result<(), String> {
        if self.cache_size < 2 {
            return Err("cache_size must be at least 2".to_string());
        }

        if url::Url::parse(&self.osm_url).is_err() {
            return Err(format!("osm_url '{}' is not a valid URL", self.osm_url));
        }

        if self.user_agent.trim().is_empty() {
            return Err("user_agent must not be empty".to_string());
        }

        Ok(())
    }
}

impl TileConfig {
    fn validate(&self) -> Result<(), String> {
        if self.tile_size == 0 || self.tile_size > MAX_TILE_SIZE {
            return Err(format!("tile_size must be between 1 and {}", MAX_TILE_SIZE));
        }

        if !SUPPORTED_FILE_EXTS.contains(&self.file_ext.as_str()) {
            return Err(format!(
                "file_ext must be one of: {}",
                SUPPORTED_FILE_EXTS.join(", ")
            ));
        }

        if matches!(&self.media_id, Some(id) if id.is_empty()) {
            return Err("media_id must not be empty".to_string());
        }

        Ok(())
    }

    /// Media id for the pyramid: `--media-id`, or the input path.
    pub fn media_id(&self) -> String {
        self.media_id
            .clone()
            .unwrap_or_else(|| self.input.to_string_lossy().into_owned())
    }
}

// =============================================================================
// Tests
// =============================================================================
