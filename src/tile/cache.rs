//! Thread-safe tile cache with LRU, age and access-count eviction.
//!
//! # Mortality
//!
//! An entry is *mortal* when it holds a real tile at a level other than 0.
//! Only mortal entries are tracked in the discard queue, count towards
//! `max_size`, and are evicted automatically. Root tiles and unavailable
//! markers stay until they are removed explicitly or the cache is purged.
//!
//! # Eviction
//!
//! - **Size**: inserting a mortal entry evicts least-recently-used mortal
//!   entries until at most `max_size` remain.
//! - **Age**: a background reaper wakes every `max_age / 3` (at least 1 ms)
//!   and evicts mortal entries not accessed for longer than `max_age`, so no
//!   entry outlives `4/3 * max_age` without being read.
//! - **Access count**: entries inserted with [`TileCache::insert_with_limit`]
//!   are evicted right after their last permitted read.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use lru::LruCache;
use tracing::{debug, trace, warn};

use super::{Tile, TileId};
use crate::error::CacheError;

/// Default maximum number of mortal tiles.
pub const DEFAULT_TILE_CACHE_CAPACITY: usize = 256;

/// Default maximum age of a mortal tile.
pub const DEFAULT_TILE_CACHE_MAX_AGE: Duration = Duration::from_secs(60);

// =============================================================================
// Cached Value
// =============================================================================

/// Value stored for a tile: either the pixels or a confirmed failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedTile {
    Available(Tile),
    Unavailable,
}

impl CachedTile {
    pub fn is_available(&self) -> bool {
        matches!(self, CachedTile::Available(_))
    }

    pub fn tile(&self) -> Option<&Tile> {
        match self {
            CachedTile::Available(tile) => Some(tile),
            CachedTile::Unavailable => None,
        }
    }

    pub fn into_tile(self) -> Option<Tile> {
        match self {
            CachedTile::Available(tile) => Some(tile),
            CachedTile::Unavailable => None,
        }
    }
}

impl From<Option<Tile>> for CachedTile {
    fn from(tile: Option<Tile>) -> Self {
        tile.map_or(CachedTile::Unavailable, CachedTile::Available)
    }
}

fn is_mortal(id: &TileId, value: &CachedTile) -> bool {
    value.is_available() && id.level != 0
}

// =============================================================================
// Cache State
// =============================================================================

struct Entry {
    value: CachedTile,
    accesses: u32,
    max_accesses: Option<u32>,
}

struct CacheState {
    entries: HashMap<TileId, Entry>,

    /// Mortal tiles, least recently used first, with their last access time
    discard_queue: LruCache<TileId, Instant>,
}

impl CacheState {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            discard_queue: LruCache::unbounded(),
        }
    }

    fn remove(&mut self, id: &TileId) -> Option<Entry> {
        let entry = self.entries.remove(id)?;
        if is_mortal(id, &entry.value) {
            self.discard_queue.pop(id);
        }
        Some(entry)
    }

    fn insert(&mut self, id: TileId, value: CachedTile, max_accesses: Option<u32>, max_size: usize) {
        if self.entries.contains_key(&id) {
            if !value.is_available() {
                // never replace a tile with a failure marker
                return;
            }
            self.remove(&id);
        }

        let mortal = is_mortal(&id, &value);
        self.entries.insert(
            id.clone(),
            Entry {
                value,
                accesses: 0,
                max_accesses,
            },
        );

        if mortal {
            self.discard_queue.push(id, Instant::now());
            self.evict_over_capacity(max_size);
        }
    }

    fn evict_over_capacity(&mut self, max_size: usize) {
        if max_size == 0 {
            return;
        }
        while self.discard_queue.len() > max_size {
            let Some((id, _)) = self.discard_queue.pop_lru() else {
                break;
            };
            trace!(tile = %id, "evicting least recently used tile");
            self.entries.remove(&id);
        }
    }

    fn evict_older_than(&mut self, max_age: Duration) -> usize {
        let now = Instant::now();
        let mut evicted = 0;
        loop {
            let expired = match self.discard_queue.peek_lru() {
                Some((_, accessed)) => now.duration_since(*accessed) > max_age,
                None => false,
            };
            if !expired {
                break;
            }
            if let Some((id, _)) = self.discard_queue.pop_lru() {
                self.entries.remove(&id);
                evicted += 1;
            }
        }
        evicted
    }
}

fn lock(state: &Mutex<CacheState>) -> MutexGuard<'_, CacheState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Age Reaper
// =============================================================================

/// Background thread evicting entries older than `max_age`.
struct Reaper {
    handle: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

/// Shortest pause between two reaper passes.
const MIN_REAPER_INTERVAL: Duration = Duration::from_millis(1);

fn reaper_interval(max_age: Duration) -> Duration {
    (max_age / 3).max(MIN_REAPER_INTERVAL)
}

impl Reaper {
    fn start(state: Weak<Mutex<CacheState>>, max_age: Duration) -> Option<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_flag = Arc::clone(&shutdown);
        let interval = reaper_interval(max_age);

        let spawned = thread::Builder::new()
            .name("tile-cache-reaper".to_string())
            .spawn(move || loop {
                thread::park_timeout(interval);
                if shutdown_flag.load(Ordering::Relaxed) {
                    break;
                }
                let Some(state) = state.upgrade() else {
                    break;
                };
                let evicted = lock(&state).evict_older_than(max_age);
                if evicted > 0 {
                    debug!(evicted, "evicted expired tiles");
                }
            });

        match spawned {
            Ok(handle) => Some(Self {
                handle: Some(handle),
                shutdown,
            }),
            Err(e) => {
                warn!("Failed to spawn tile cache reaper, age eviction disabled: {}", e);
                None
            }
        }
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                warn!("Tile cache reaper thread panicked");
            }
        }
    }
}

// =============================================================================
// Tile Cache
// =============================================================================

/// Bounded cache from [`TileId`] to [`CachedTile`].
///
/// All operations take a single internal lock, so every structural change is
/// atomic with respect to other cache operations. Share across threads via
/// `Arc`.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use tile_pyramid::tile::{CachedTile, Tile, TileCache, TileId};
///
/// let cache = TileCache::new(100, Duration::ZERO);
/// let id = TileId::new("photo.ppm", 2, 1, 3);
///
/// cache.set(id.clone(), CachedTile::Available(Tile::new(256, 256)));
/// assert!(cache.get(&id).unwrap().is_available());
///
/// // a failure marker never overwrites a real tile
/// cache.set(id.clone(), CachedTile::Unavailable);
/// assert!(cache.get(&id).unwrap().is_available());
/// ```
pub struct TileCache {
    state: Arc<Mutex<CacheState>>,

    /// Maximum number of mortal entries (0 = unbounded)
    max_size: usize,

    /// Maximum age of a mortal entry (`None` = unbounded)
    max_age: Option<Duration>,

    reaper: Option<Reaper>,
}

impl TileCache {
    /// Create a cache holding at most `max_size` mortal tiles, each evicted
    /// once unused for `max_age`.
    ///
    /// A `max_size` of 0 or a zero `max_age` disables that bound. A non-zero
    /// `max_age` starts a background reaper thread which stops when the cache
    /// is dropped.
    pub fn new(max_size: usize, max_age: Duration) -> Self {
        let state = Arc::new(Mutex::new(CacheState::new()));
        let max_age = (!max_age.is_zero()).then_some(max_age);
        let reaper = max_age.and_then(|age| Reaper::start(Arc::downgrade(&state), age));

        Self {
            state,
            max_size,
            max_age,
            reaper,
        }
    }

    /// Create a cache with no size or age bound.
    pub fn unbounded() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Look up a tile.
    ///
    /// A hit on a mortal entry makes it the most recently used one. Each hit
    /// counts against an access limit set by [`insert_with_limit`]; the read
    /// that reaches the limit still returns the value, then evicts it.
    ///
    /// [`insert_with_limit`]: TileCache::insert_with_limit
    pub fn get(&self, id: &TileId) -> Result<CachedTile, CacheError> {
        let mut state = lock(&self.state);

        let (value, expired) = match state.entries.get_mut(id) {
            Some(entry) => {
                entry.accesses += 1;
                let expired = entry
                    .max_accesses
                    .is_some_and(|limit| entry.accesses >= limit);
                (entry.value.clone(), expired)
            }
            None => return Err(CacheError::NotFound(id.clone())),
        };

        if is_mortal(id, &value) {
            if let Some(accessed) = state.discard_queue.get_mut(id) {
                *accessed = Instant::now();
            }
        }

        if expired {
            trace!(tile = %id, "access limit reached, evicting");
            state.remove(id);
        }

        Ok(value)
    }

    /// Check for an entry without touching LRU order or access counts.
    pub fn contains(&self, id: &TileId) -> bool {
        lock(&self.state).entries.contains_key(id)
    }

    /// Insert or replace an entry.
    ///
    /// Setting [`CachedTile::Unavailable`] over an existing entry is a no-op.
    pub fn set(&self, id: TileId, value: CachedTile) {
        lock(&self.state).insert(id, value, None, self.max_size);
    }

    /// Insert an entry that expires after `max_accesses` successful reads.
    ///
    /// A limit of 0 behaves like [`TileCache::set`].
    pub fn insert_with_limit(&self, id: TileId, value: CachedTile, max_accesses: u32) {
        let limit = (max_accesses > 0).then_some(max_accesses);
        lock(&self.state).insert(id, value, limit, self.max_size);
    }

    /// Remove an entry, returning its value if it existed.
    pub fn remove(&self, id: &TileId) -> Option<CachedTile> {
        lock(&self.state).remove(id).map(|entry| entry.value)
    }

    /// Remove every entry.
    pub fn purge_all(&self) {
        let mut state = lock(&self.state);
        state.entries.clear();
        state.discard_queue.clear();
    }

    /// Evict mortal entries not accessed for longer than `max_age`.
    ///
    /// This is what the background reaper runs; returns the number evicted.
    pub fn evict_expired(&self) -> usize {
        match self.max_age {
            Some(max_age) => lock(&self.state).evict_older_than(max_age),
            None => 0,
        }
    }

    /// Total number of entries, mortal or not.
    pub fn len(&self) -> usize {
        lock(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.state).entries.is_empty()
    }

    /// Number of entries eligible for automatic eviction.
    pub fn mortal_count(&self) -> usize {
        lock(&self.state).discard_queue.len()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn max_age(&self) -> Option<Duration> {
        self.max_age
    }

    /// Whether a background age reaper is running.
    pub fn has_reaper(&self) -> bool {
        self.reaper.is_some()
    }
}

impl Default for TileCache {
    fn default() -> Self {
        Self::new(DEFAULT_TILE_CACHE_CAPACITY, DEFAULT_TILE_CACHE_MAX_AGE)
    }
}

// =============================================================================
// Tests
// =============================================================================
