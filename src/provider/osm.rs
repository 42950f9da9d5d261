//! OpenStreetMap raster tiles.
//!
//! OSM serves the Web Mercator world as a standard XYZ pyramid: zoom `z`
//! holds `2^z x 2^z` tiles of 256 pixels, which maps one-to-one onto pyramid
//! levels, rows and columns.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use tracing::{debug, info};
use url::Url;

use super::DynamicSource;
use crate::error::ProviderError;
use crate::store::PyramidMetadata;
use crate::tile::{Tile, TileId};

/// Default tile server.
pub const DEFAULT_OSM_URL: &str = "https://tile.openstreetmap.org";

/// User agent sent with tile requests; OSM rejects anonymous clients.
pub const DEFAULT_USER_AGENT: &str = concat!("tilepyramid/", env!("CARGO_PKG_VERSION"));

const TILE_SIZE: u32 = 256;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Dynamic source for `dynamic:osm`.
pub struct OsmSource {
    client: reqwest::Client,
    base_url: Url,
}

impl OsmSource {
    /// Create a source downloading from `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `Http` if `base_url` is not a valid URL or the HTTP client
    /// cannot be built.
    pub fn new(base_url: &str, user_agent: &str) -> Result<Self, ProviderError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ProviderError::Http(format!("Invalid tile server URL {}: {}", base_url, e)))?;
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(user_agent)
            .build()
            .map_err(|e| ProviderError::Http(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, base_url })
    }

    /// URL of tile `id`: `{base}/{level}/{col}/{row}.png`.
    pub fn tile_url(&self, id: &TileId) -> String {
        format!(
            "{}/{}/{}/{}.png",
            self.base_url.as_str().trim_end_matches('/'),
            id.level,
            id.col,
            id.row
        )
    }

    async fn download(&self, url: &str) -> Result<Option<Bytes>, ProviderError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ProviderError::Http(format!("Request failed: {}", e)))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if !status.is_success() => Err(ProviderError::Http(format!(
                "HTTP {} from {}",
                status, url
            ))),
            _ => response
                .bytes()
                .await
                .map(Some)
                .map_err(|e| ProviderError::Http(format!("Failed to read response: {}", e))),
        }
    }
}

#[async_trait]
impl DynamicSource for OsmSource {
    fn media_prefix(&self) -> &str {
        "dynamic:osm"
    }

    fn metadata(&self) -> PyramidMetadata {
        PyramidMetadata::procedural(TILE_SIZE, "png", 1.0)
    }

    async fn produce(&self, id: &TileId) -> Result<Option<Tile>, ProviderError> {
        let url = self.tile_url(id);
        info!(url = %url, "Downloading tile");

        let Some(data) = self.download(&url).await? else {
            debug!(url = %url, "Tile not found on server");
            return Ok(None);
        };

        let tile = tokio::task::spawn_blocking(move || Tile::decode(&data))
            .await
            .map_err(|e| ProviderError::TaskFailed(e.to_string()))?
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        Ok(Some(tile))
    }
}

impl std::fmt::Debug for OsmSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OsmSource")
            .field("base_url", &self.base_url.as_str())
            .finish()
    }
}
