//! On-demand tiles for media without a prebuilt pyramid.
//!
//! A [`DynamicSource`] renders or downloads single tiles. The
//! [`DynamicLoader`] wrapping it checks the requested position against the
//! source's bounds, serves tiles already written to the tile store, and
//! writes newly produced ones through so later sessions can reuse them.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::TileLoader;
use crate::error::ProviderError;
use crate::store::{PyramidMetadata, TileStore};
use crate::tile::{Tile, TileId};

/// Media ids starting with this prefix are served by dynamic sources.
pub const DYNAMIC_PREFIX: &str = "dynamic:";

/// Producer of single tiles for one family of dynamic media.
#[async_trait]
pub trait DynamicSource: Send + Sync {
    /// Media id prefix this source serves, e.g. `dynamic:fern`.
    fn media_prefix(&self) -> &str;

    /// Tile size, codec and aspect ratio of the produced tiles.
    fn metadata(&self) -> PyramidMetadata;

    /// Produce tile `id`, or `None` if the source has nothing there.
    ///
    /// Only called for positions inside the bounds given by
    /// [`metadata`](Self::metadata).
    async fn produce(&self, id: &TileId) -> Result<Option<Tile>, ProviderError>;
}

/// [`TileLoader`] serving a [`DynamicSource`] with write-through to the
/// tile store.
pub struct DynamicLoader {
    source: Arc<dyn DynamicSource>,
    store: Arc<TileStore>,
}

impl DynamicLoader {
    pub fn new(source: Arc<dyn DynamicSource>, store: Arc<TileStore>) -> Self {
        Self { source, store }
    }

    pub fn source(&self) -> &Arc<dyn DynamicSource> {
        &self.source
    }

    fn in_bounds(meta: &PyramidMetadata, id: &TileId) -> bool {
        if id.level < 0 {
            return false;
        }
        let (row_bound, col_bound) = meta.rowcol_bound(id.level);
        id.row <= row_bound && id.col <= col_bound
    }
}

#[async_trait]
impl TileLoader for DynamicLoader {
    fn name(&self) -> &str {
        self.source.media_prefix()
    }

    async fn load(&self, id: &TileId) -> Result<Option<Tile>, ProviderError> {
        let meta = self.source.metadata();
        if !Self::in_bounds(&meta, id) {
            debug!(tile = %id, "Outside dynamic media bounds");
            return Ok(None);
        }

        let path = self
            .store
            .tile_path(id, true, None, Some(meta.file_ext.as_str()))?;

        if let Some(tile) = open_stored(&path).await? {
            return Ok(Some(tile));
        }

        let Some(tile) = self.source.produce(id).await? else {
            return Ok(None);
        };

        let stored = tile.clone();
        let save = tokio::task::spawn_blocking(move || stored.save(&path)).await;
        match save {
            Ok(Ok(())) => debug!(tile = %id, "Stored dynamic tile"),
            Ok(Err(e)) => warn!(tile = %id, error = %e, "Failed to store dynamic tile"),
            Err(e) => warn!(tile = %id, error = %e, "Store task failed"),
        }
        Ok(Some(tile))
    }
}

/// Open a previously stored tile.
///
/// An unreadable file (for example one left half-written) is deleted so the
/// tile gets produced again.
async fn open_stored(path: &Path) -> Result<Option<Tile>, ProviderError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        if !path.is_file() {
            return None;
        }
        match Tile::open(&path) {
            Ok(tile) => Some(tile),
            Err(e) => {
                warn!(error = %e, "Discarding unreadable stored tile");
                let _ = std::fs::remove_file(&path);
                None
            }
        }
    })
    .await
    .map_err(|e| ProviderError::TaskFailed(e.to_string()))
}
