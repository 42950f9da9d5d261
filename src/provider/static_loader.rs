use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::TileLoader;
use crate::error::ProviderError;
use crate::store::{TileStore, KEY_MAX_LEVEL};
use crate::tile::{Tile, TileId};

/// Loads tiles of pyramids built into the tile store.
pub struct StaticLoader {
    store: Arc<TileStore>,
}

impl StaticLoader {
    pub fn new(store: Arc<TileStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TileLoader for StaticLoader {
    fn name(&self) -> &str {
        "static"
    }

    async fn load(&self, id: &TileId) -> Result<Option<Tile>, ProviderError> {
        let store = Arc::clone(&self.store);
        let id = id.clone();
        tokio::task::spawn_blocking(move || load_from_store(&store, &id))
            .await
            .map_err(|e| ProviderError::TaskFailed(e.to_string()))?
    }
}

/// Read tile `id` from disk.
///
/// Levels beyond the recorded maximum and missing or unreadable files are
/// reported as absent.
fn load_from_store(store: &TileStore, id: &TileId) -> Result<Option<Tile>, ProviderError> {
    let max_level = store
        .read_metadata(id.media_id(), KEY_MAX_LEVEL)
        .and_then(|v| v.as_int());
    match max_level {
        Some(max_level) if id.level >= 0 && i64::from(id.level) <= max_level => {}
        _ => return Ok(None),
    }

    let path = store.tile_path(id, false, None, None)?;
    if !path.is_file() {
        return Ok(None);
    }

    match Tile::open(&path) {
        Ok(tile) => Ok(Some(tile)),
        Err(e) => {
            debug!(tile = %id, error = %e, "Unreadable tile file");
            Ok(None)
        }
    }
}
