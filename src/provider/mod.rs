//! Asynchronous tile providers.
//!
//! A [`TileProvider`] owns one worker task that resolves requested tile ids
//! into tiles and writes the outcome into a [`TileCache`]. What "resolve"
//! means is delegated to a [`TileLoader`]:
//!
//! - [`StaticLoader`]: reads tiles built by the pyramid builder
//! - [`DynamicLoader`]: renders or downloads tiles on demand through a
//!   [`DynamicSource`] and writes them through to the tile store
//!
//! # Request Ordering
//!
//! Requests are kept on a stack and the most recent one is serviced first,
//! so tiles the viewer asked for last (the ones currently on screen) win
//! over stale requests:
//!
//! ```text
//! request(a) request(b) request(c)    stack: [a, b, c]
//!                                     worker pops c, then b, then a
//! ```
//!
//! A request for a tile that is already cached when the worker pops it is
//! dropped without calling the loader. Duplicates queued before the first
//! result lands are all kept.

mod dynamic;
mod fern;
mod mandel;
mod osm;
mod static_loader;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::ProviderError;
use crate::tile::{CachedTile, Tile, TileCache, TileId};

pub use dynamic::{DynamicLoader, DynamicSource, DYNAMIC_PREFIX};
pub use fern::FernSource;
pub use mandel::MandelSource;
pub use osm::{OsmSource, DEFAULT_OSM_URL, DEFAULT_USER_AGENT};
pub use static_loader::StaticLoader;

/// Resolves one tile id into a tile.
#[async_trait]
pub trait TileLoader: Send + Sync {
    /// Short name for logging.
    fn name(&self) -> &str;

    /// Load tile `id`.
    ///
    /// Returns `Ok(None)` if the tile does not exist. Errors are logged by
    /// the worker and treated the same way.
    async fn load(&self, id: &TileId) -> Result<Option<Tile>, ProviderError>;
}

// =============================================================================
// Tile Provider
// =============================================================================

/// State shared between a provider handle and its worker task.
struct Shared {
    loader: Arc<dyn TileLoader>,
    cache: Arc<TileCache>,

    /// Pending requests; the last element is serviced next
    tasks: Mutex<Vec<TileId>>,
    tasks_available: Notify,
    shutdown: AtomicBool,
}

impl Shared {
    fn tasks(&self) -> MutexGuard<'_, Vec<TileId>> {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Handle to a running provider worker.
///
/// Dropping the handle stops the worker after its current load.
pub struct TileProvider {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TileProvider {
    /// Start a worker on `runtime` that loads tiles with `loader` into `cache`.
    pub fn spawn(loader: Arc<dyn TileLoader>, cache: Arc<TileCache>, runtime: &Handle) -> Self {
        let shared = Arc::new(Shared {
            loader,
            cache,
            tasks: Mutex::new(Vec::new()),
            tasks_available: Notify::new(),
            shutdown: AtomicBool::new(false),
        });

        let worker = runtime.spawn(run_worker(Arc::clone(&shared)));
        debug!(provider = shared.loader.name(), "Started tile provider");

        Self {
            shared,
            worker: Mutex::new(Some(worker)),
        }
    }

    pub fn name(&self) -> &str {
        self.shared.loader.name()
    }

    /// Queue tile `id` for loading. Returns immediately.
    pub fn request(&self, id: TileId) {
        self.shared.tasks().push(id);
        self.shared.tasks_available.notify_one();
    }

    /// Drop pending requests for `media_id`, or all pending requests if
    /// `None`. A load already in progress is not interrupted.
    pub fn purge(&self, media_id: Option<&str>) {
        let mut tasks = self.shared.tasks();
        let before = tasks.len();
        match media_id {
            Some(media_id) => tasks.retain(|id| id.media_id() != media_id),
            None => tasks.clear(),
        }
        debug!(
            provider = self.name(),
            media_id = media_id.unwrap_or("all"),
            purged = before - tasks.len(),
            "Purged pending requests"
        );
    }

    /// Number of requests waiting for the worker.
    pub fn pending(&self) -> usize {
        self.shared.tasks().len()
    }

    /// Stop the worker once its current load finishes. Pending requests are
    /// discarded.
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.tasks().clear();
        self.shared.tasks_available.notify_one();
        debug!(provider = self.name(), "Stopping tile provider");
    }

    /// True until the worker task has exited.
    pub fn is_running(&self) -> bool {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        worker.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Wait for the worker task to exit after [`shutdown`](Self::shutdown).
    pub async fn join(&self) {
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(provider = self.name(), error = %e, "Provider worker ended abnormally");
            }
        }
    }
}

impl Drop for TileProvider {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for TileProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileProvider")
            .field("name", &self.name())
            .field("pending", &self.pending())
            .finish()
    }
}

/// Worker loop: pop the most recent request, load it, cache the outcome.
async fn run_worker(shared: Arc<Shared>) {
    loop {
        let id = loop {
            if shared.shutdown.load(Ordering::Acquire) {
                debug!(provider = shared.loader.name(), "Tile provider stopped");
                return;
            }
            let next = shared.tasks().pop();
            if let Some(id) = next {
                break id;
            }
            shared.tasks_available.notified().await;
        };

        if shared.cache.contains(&id) {
            debug!(provider = shared.loader.name(), tile = %id, "Already cached, skipping");
            continue;
        }

        let value = match load_isolated(&shared.loader, &id).await {
            Ok(Some(tile)) => {
                debug!(provider = shared.loader.name(), tile = %id, "Loaded tile");
                CachedTile::Available(tile)
            }
            Ok(None) => {
                debug!(provider = shared.loader.name(), tile = %id, "Tile unavailable");
                CachedTile::Unavailable
            }
            Err(e) => {
                warn!(
                    provider = shared.loader.name(),
                    tile = %id,
                    error = %e,
                    "Error loading tile, marking unavailable"
                );
                CachedTile::Unavailable
            }
        };
        shared.cache.set(id, value);
    }
}

/// Run one load on its own task so a panicking loader only fails that tile.
async fn load_isolated(
    loader: &Arc<dyn TileLoader>,
    id: &TileId,
) -> Result<Option<Tile>, ProviderError> {
    let loader = Arc::clone(loader);
    let id = id.clone();
    tokio::spawn(async move { loader.load(&id).await })
        .await
        .map_err(|e| ProviderError::TaskFailed(e.to_string()))?
}
