//! Tile manager: the entry point for consumers of tiles.
//!
//! The manager owns the caches and providers for every media:
//!
//! ```text
//!                   ┌──────────────────────────────┐
//!  get_tile ───────►│ primary cache (final tiles)  │◄──── provider workers
//!     │ miss        └──────────────────────────────┘        ▲
//!     └──► load_tile ──► static provider ── TileStore ───────┤
//!                   └──► dynamic providers (by prefix) ──────┘
//!
//!  cut_tile ──► primary cache, else temporary cache, else
//!               crop + upscale the parent (recursively)
//! ```
//!
//! [`TileManager::get_tile`] never blocks on a provider: a miss queues a
//! load and returns [`TileError::NotLoaded`]. [`TileManager::cut_tile`]
//! synthesizes an approximation from the nearest cached ancestor so there
//! is always something to draw.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{debug, info};

use crate::error::{ProviderError, StoreError, TileError};
use crate::provider::{
    DynamicLoader, DynamicSource, FernSource, MandelSource, OsmSource, StaticLoader, TileProvider,
    DEFAULT_OSM_URL, DEFAULT_USER_AGENT, DYNAMIC_PREFIX,
};
use crate::store::{PyramidMetadata, TileStore, KEY_TILE_SIZE};
use crate::tile::{CachedTile, Tile, TileCache, TileId, DEFAULT_TILE_CACHE_MAX_AGE};

/// Default number of tiles held across both caches.
pub const DEFAULT_TOTAL_CACHE_SIZE: usize = 192;

/// Tuning for a [`TileManager`].
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Tiles held across both caches; 80% go to the primary cache
    pub total_cache_size: usize,

    /// Age after which unused tiles are evicted (zero disables)
    pub cache_max_age: Duration,

    /// Base URL of the OpenStreetMap tile server
    pub osm_url: String,

    /// User agent for remote tile requests
    pub user_agent: String,
}

impl ManagerConfig {
    /// Capacity of the cache holding final tiles.
    ///
    /// At least 1 for any non-zero total, since a capacity of 0 means
    /// unbounded.
    pub fn primary_cache_size(&self) -> usize {
        match self.total_cache_size {
            0 => 0,
            total => (total * 4 / 5).max(1),
        }
    }

    /// Capacity of the cache holding temporary cut tiles.
    ///
    /// At least 1 for any non-zero total.
    pub fn temp_cache_size(&self) -> usize {
        match self.total_cache_size {
            0 => 0,
            total => total.saturating_sub(self.primary_cache_size()).max(1),
        }
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            total_cache_size: DEFAULT_TOTAL_CACHE_SIZE,
            cache_max_age: DEFAULT_TILE_CACHE_MAX_AGE,
            osm_url: DEFAULT_OSM_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// A registered dynamic source and the provider serving it.
struct DynamicEntry {
    source: Arc<dyn DynamicSource>,
    provider: TileProvider,
}

/// Routes tile requests, caches results and synthesizes missing tiles.
///
/// Dropping the manager stops all provider workers.
pub struct TileManager {
    store: Arc<TileStore>,
    config: ManagerConfig,
    runtime: Handle,

    /// Loaded tiles and tiles cut at their best possible resolution
    cache: Arc<TileCache>,

    /// Cut tiles that a provider may still replace with a sharper one
    temp_cache: Arc<TileCache>,

    static_provider: TileProvider,
    dynamic: Vec<DynamicEntry>,
}

impl TileManager {
    /// Create a manager serving pyramids from `store`, with no dynamic
    /// sources. Provider workers run on `runtime`.
    pub fn new(store: Arc<TileStore>, config: ManagerConfig, runtime: &Handle) -> Self {
        let cache = Arc::new(TileCache::new(
            config.primary_cache_size(),
            config.cache_max_age,
        ));
        let temp_cache = Arc::new(TileCache::new(config.temp_cache_size(), config.cache_max_age));

        let static_provider = TileProvider::spawn(
            Arc::new(StaticLoader::new(Arc::clone(&store))),
            Arc::clone(&cache),
            runtime,
        );

        info!(
            store = %store.root().display(),
            primary_cache = config.primary_cache_size(),
            temp_cache = config.temp_cache_size(),
            "Tile manager started"
        );

        Self {
            store,
            config,
            runtime: runtime.clone(),
            cache,
            temp_cache,
            static_provider,
            dynamic: Vec::new(),
        }
    }

    /// Create a manager with the fern, Mandelbrot and OpenStreetMap sources
    /// registered.
    ///
    /// # Errors
    ///
    /// Returns an error if the OpenStreetMap URL is invalid or its HTTP
    /// client cannot be built.
    pub fn with_default_providers(
        store: Arc<TileStore>,
        config: ManagerConfig,
        runtime: &Handle,
    ) -> Result<Self, ProviderError> {
        let osm = OsmSource::new(&config.osm_url, &config.user_agent)?;
        let mut manager = Self::new(store, config, runtime);
        manager.register_dynamic(Arc::new(FernSource::new()));
        manager.register_dynamic(Arc::new(MandelSource::new()));
        manager.register_dynamic(Arc::new(osm));
        Ok(manager)
    }

    /// Serve `source.media_prefix()` and media ids extending it with a
    /// `:`-separated suffix (e.g. `dynamic:osm` and `dynamic:osm:cycle`, but
    /// not `dynamic:osmfoo`) from `source`.
    ///
    /// A source registered for an existing prefix replaces the old one.
    pub fn register_dynamic(&mut self, source: Arc<dyn DynamicSource>) {
        let prefix = source.media_prefix().to_string();
        self.dynamic
            .retain(|entry| entry.source.media_prefix() != prefix);

        let loader = DynamicLoader::new(Arc::clone(&source), Arc::clone(&self.store));
        let provider = TileProvider::spawn(Arc::new(loader), Arc::clone(&self.cache), &self.runtime);
        debug!(prefix = %prefix, "Registered dynamic source");
        self.dynamic.push(DynamicEntry { source, provider });
    }

    pub fn store(&self) -> &Arc<TileStore> {
        &self.store
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Cache of loaded and final cut tiles.
    pub fn cache(&self) -> &Arc<TileCache> {
        &self.cache
    }

    /// Cache of non-final cut tiles.
    pub fn temp_cache(&self) -> &Arc<TileCache> {
        &self.temp_cache
    }

    /// Prefixes of the registered dynamic sources.
    pub fn dynamic_prefixes(&self) -> Vec<&str> {
        self.dynamic
            .iter()
            .map(|entry| entry.source.media_prefix())
            .collect()
    }

    /// Registered dynamic source serving `media_id`, preferring the longest
    /// matching prefix.
    fn dynamic_for(&self, media_id: &str) -> Option<&DynamicEntry> {
        self.dynamic
            .iter()
            .filter(|entry| serves(entry.source.media_prefix(), media_id))
            .max_by_key(|entry| entry.source.media_prefix().len())
    }

    fn provider_for(&self, media_id: &str) -> &TileProvider {
        match self.dynamic_for(media_id) {
            Some(entry) => &entry.provider,
            None => &self.static_provider,
        }
    }

    // =========================================================================
    // Tile Access
    // =========================================================================

    /// Ask the responsible provider to load tile `id` into the cache.
    pub fn load_tile(&self, id: TileId) {
        self.provider_for(id.media_id()).request(id);
    }

    /// Return tile `id` if it is cached.
    ///
    /// # Errors
    ///
    /// - `InvalidLevel` for negative levels
    /// - `MediaNotTiled` if the media has no pyramid and is not dynamic
    /// - `NotLoaded` if the tile is not cached yet; a load is queued
    /// - `NotAvailable` if a previous load found no such tile
    pub fn get_tile(&self, id: &TileId) -> Result<Tile, TileError> {
        if id.level < 0 {
            return Err(TileError::InvalidLevel { level: id.level });
        }

        match self.cache.get(id) {
            Ok(CachedTile::Available(tile)) => Ok(tile),
            Ok(CachedTile::Unavailable) => Err(TileError::NotAvailable { tile: id.clone() }),
            Err(_) if self.is_tiled(id.media_id()) => {
                self.load_tile(id.clone());
                Err(TileError::NotLoaded { tile: id.clone() })
            }
            Err(_) => Err(TileError::MediaNotTiled {
                media_id: id.media_id().to_string(),
            }),
        }
    }

    /// Return tile `id`, synthesizing it from its ancestors if it is not
    /// cached.
    ///
    /// The boolean is `true` if the tile is final: either loaded exactly or
    /// cut from ancestors that are all the best resolution available. Final
    /// tiles are stored in the primary cache. Non-final tiles are stored in
    /// the temporary cache for `temp_cache_limit` reads; a limit of 0 skips
    /// that and clears the temporary cache first.
    ///
    /// # Errors
    ///
    /// `MediaNotTiled` for untiled media, `NotLoaded`/`NotAvailable` if the
    /// level-0 tile itself is missing.
    pub fn cut_tile(&self, id: &TileId, temp_cache_limit: u32) -> Result<(Tile, bool), TileError> {
        if temp_cache_limit == 0 {
            self.temp_cache.purge_all();
        }
        self.cut(id, temp_cache_limit)
    }

    fn cut(&self, id: &TileId, temp_cache_limit: u32) -> Result<(Tile, bool), TileError> {
        let (tile, is_final) = if id.level < 0 {
            let root = self.get_tile(&id.sibling(0, 0, 0))?;
            let scale = 2f64.powi(id.level);
            let width = (f64::from(root.width()) * scale) as u32;
            let height = (f64::from(root.height()) * scale) as u32;
            (root.resize(width, height), true)
        } else {
            match self.get_tile(id) {
                Ok(tile) => return Ok((tile, true)),
                Err(TileError::NotLoaded { .. }) => {
                    if let Ok(CachedTile::Available(tile)) = self.temp_cache.get(id) {
                        return Ok((tile, false));
                    }
                    let (parent, _) = self.cut(&id.parent(), temp_cache_limit)?;
                    (self.zoom_quadrant(id, &parent)?, false)
                }
                Err(TileError::NotAvailable { .. }) => {
                    let (parent, parent_final) = self.cut(&id.parent(), temp_cache_limit)?;
                    (self.zoom_quadrant(id, &parent)?, parent_final)
                }
                Err(e) => return Err(e),
            }
        };

        if is_final {
            self.cache
                .set(id.clone(), CachedTile::Available(tile.clone()));
        } else if temp_cache_limit > 0 {
            self.temp_cache.insert_with_limit(
                id.clone(),
                CachedTile::Available(tile.clone()),
                temp_cache_limit,
            );
        }
        debug!(tile = %id, is_final, "Cut tile");
        Ok((tile, is_final))
    }

    /// Crop the quadrant of `parent` covering `id` and scale it up 2x.
    fn zoom_quadrant(&self, id: &TileId, parent: &Tile) -> Result<Tile, TileError> {
        let half = self.tile_size(id.media_id())? / 2;
        let (width, height) = parent.size();

        let (x1, x2) = if id.col % 2 == 0 {
            (0, half.min(width))
        } else {
            (half, width)
        };
        let (y1, y2) = if id.row % 2 == 0 {
            (0, half.min(height))
        } else {
            (half, height)
        };

        let quadrant = parent.crop(x1, y1, x2, y2);
        Ok(quadrant.resize(quadrant.width() * 2, quadrant.height() * 2))
    }

    /// Return tile `id`, falling back to a cut tile if it is not cached.
    ///
    /// # Errors
    ///
    /// Only fails if the media is not tiled or its level-0 tile is missing.
    pub fn get_tile_robust(&self, id: &TileId) -> Result<Tile, TileError> {
        match self.get_tile(id) {
            Ok(tile) => Ok(tile),
            Err(
                TileError::NotLoaded { .. }
                | TileError::NotAvailable { .. }
                | TileError::InvalidLevel { .. },
            ) => self.cut_tile(id, 0).map(|(tile, _)| tile),
            Err(e) => Err(e),
        }
    }

    // =========================================================================
    // Media
    // =========================================================================

    /// True if tiles of `media_id` can be requested. Dynamic media always
    /// count as tiled.
    pub fn is_tiled(&self, media_id: &str) -> bool {
        media_id.starts_with(DYNAMIC_PREFIX) || self.store.is_tiled(media_id)
    }

    /// Pyramid description of `media_id`: declared by its dynamic source, or
    /// read from the tile store.
    pub fn metadata(&self, media_id: &str) -> Option<PyramidMetadata> {
        match self.dynamic_for(media_id) {
            Some(entry) => Some(entry.source.metadata()),
            None => self.store.pyramid_metadata(media_id),
        }
    }

    fn tile_size(&self, media_id: &str) -> Result<u32, TileError> {
        self.metadata(media_id)
            .map(|meta| meta.tile_size)
            .ok_or_else(|| {
                TileError::Store(StoreError::MissingMetadata {
                    media_id: media_id.to_string(),
                    key: KEY_TILE_SIZE.to_string(),
                })
            })
    }

    /// Drop pending load requests for `media_id` (all media if `None`) from
    /// every provider.
    ///
    /// The caller must ensure nothing is still drawing the media.
    pub fn purge(&self, media_id: Option<&str>) {
        self.static_provider.purge(media_id);
        for entry in &self.dynamic {
            entry.provider.purge(media_id);
        }
    }

    /// Requests waiting across all providers.
    pub fn pending_requests(&self) -> usize {
        self.static_provider.pending()
            + self
                .dynamic
                .iter()
                .map(|entry| entry.provider.pending())
                .sum::<usize>()
    }

    /// Stop all provider workers. Cached tiles stay readable.
    pub fn shutdown(&self) {
        self.static_provider.shutdown();
        for entry in &self.dynamic {
            entry.provider.shutdown();
        }
        info!("Tile manager stopped");
    }
}

impl std::fmt::Debug for TileManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileManager")
            .field("store", &self.store)
            .field("dynamic", &self.dynamic_prefixes())
            .field("cached", &self.cache.len())
            .finish()
    }
}

/// True if `media_id` is `prefix` itself or `prefix:<suffix>`.
fn serves(prefix: &str, media_id: &str) -> bool {
    match media_id.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with(':'),
        None => false,
    }
}
