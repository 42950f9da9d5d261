//! Dynamic media integration tests.
//!
//! Tests verify:
//! - Built-in sources are routed by media id prefix
//! - Generated tiles are written through to the store and reused
//! - Out-of-bounds dynamic tiles are not available
//! - OpenStreetMap tiles are downloaded, with 404s treated as absent tiles

use std::sync::{Arc, Mutex};

use image::{ImageFormat, Rgb, RgbImage};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::runtime::Handle;

use tile_pyramid::error::TileError;
use tile_pyramid::{DynamicSource, ManagerConfig, TileId, TileManager};

use super::test_utils::{wait_for_tile, CountingSource, TestStore};

fn default_manager(store: &TestStore) -> TileManager {
    TileManager::with_default_providers(
        Arc::clone(&store.store),
        ManagerConfig::default(),
        &Handle::current(),
    )
    .unwrap()
}

// =============================================================================
// Built-in Sources
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_fern_tiles_are_generated_and_stored() {
    let store = TestStore::new();
    let manager = default_manager(&store);
    let id = TileId::new("dynamic:fern", 1, 0, 0);

    assert!(manager.is_tiled(id.media_id()));
    let tile = wait_for_tile(&manager, &id).await.unwrap();
    assert_eq!(tile.size(), (256, 256));

    let path = store.store.tile_path(&id, false, None, Some("png")).unwrap();
    assert!(path.is_file());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_mandel_root_and_bounds() {
    let store = TestStore::new();
    let manager = default_manager(&store);

    let root = wait_for_tile(&manager, &TileId::root("dynamic:mandel"))
        .await
        .unwrap();
    assert_eq!(root.size(), (256, 256));

    let outside = TileId::new("dynamic:mandel", 1, 2, 0);
    assert!(matches!(
        wait_for_tile(&manager, &outside).await,
        Err(TileError::NotAvailable { .. })
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_dynamic_media_metadata() {
    let store = TestStore::new();
    let manager = default_manager(&store);

    let meta = manager.metadata("dynamic:fern").unwrap();
    assert_eq!(meta.tile_size, 256);
    assert_eq!(meta.file_ext, "png");
    assert_eq!(meta.aspect_ratio, Some(1.0));

    assert!(manager.metadata("dynamic:unknown").is_none());
    assert!(manager.is_tiled("dynamic:unknown"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_deep_cut_from_generated_root() {
    let store = TestStore::new();
    let manager = default_manager(&store);
    wait_for_tile(&manager, &TileId::root("dynamic:fern"))
        .await
        .unwrap();

    let (tile, is_final) = manager
        .cut_tile(&TileId::new("dynamic:fern", 4, 3, 9), 3)
        .unwrap();
    assert!(!is_final);
    assert_eq!(tile.size(), (256, 256));
    assert!(!manager.temp_cache().is_empty());
}

// =============================================================================
// Write-through
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_stored_tiles_are_not_regenerated() {
    let store = TestStore::new();
    let source = Arc::new(CountingSource::new("dynamic:solid", Rgb([10, 20, 30])));
    let id = TileId::new("dynamic:solid", 1, 0, 1);

    {
        let mut manager = TileManager::new(
            Arc::clone(&store.store),
            ManagerConfig::default(),
            &Handle::current(),
        );
        manager.register_dynamic(Arc::clone(&source) as Arc<dyn DynamicSource>);
        wait_for_tile(&manager, &id).await.unwrap();
        manager.shutdown();
    }
    assert_eq!(source.produced(), 1);

    let mut manager = TileManager::new(
        Arc::clone(&store.store),
        ManagerConfig::default(),
        &Handle::current(),
    );
    manager.register_dynamic(Arc::clone(&source) as Arc<dyn DynamicSource>);
    let tile = wait_for_tile(&manager, &id).await.unwrap();

    assert_eq!(source.produced(), 1);
    assert_eq!(tile.as_image().get_pixel(0, 0), &Rgb([10, 20, 30]));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_longest_prefix_wins() {
    let store = TestStore::new();
    let general = Arc::new(CountingSource::new("dynamic:solid", Rgb([255, 0, 0])));
    let specific = Arc::new(CountingSource::new("dynamic:solid:blue", Rgb([0, 0, 255])));

    let mut manager = TileManager::new(
        Arc::clone(&store.store),
        ManagerConfig::default(),
        &Handle::current(),
    );
    manager.register_dynamic(Arc::clone(&specific) as Arc<dyn DynamicSource>);
    manager.register_dynamic(Arc::clone(&general) as Arc<dyn DynamicSource>);

    let tile = wait_for_tile(&manager, &TileId::root("dynamic:solid:blue"))
        .await
        .unwrap();
    assert_eq!(tile.as_image().get_pixel(0, 0), &Rgb([0, 0, 255]));
    assert_eq!(general.produced(), 0);
    assert_eq!(specific.produced(), 1);
}

// =============================================================================
// OpenStreetMap
// =============================================================================

/// Minimal tile server: `/0/0/0.png` is a blue tile, `/1/1/0.png` fails,
/// everything else is 404. Records the user agent of every request.
async fn spawn_tile_server() -> (String, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let agents = Arc::new(Mutex::new(Vec::new()));

    let mut png = Vec::new();
    RgbImage::from_pixel(256, 256, Rgb([0, 0, 200]))
        .write_to(&mut std::io::Cursor::new(&mut png), ImageFormat::Png)
        .unwrap();

    let seen = Arc::clone(&agents);
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let png = png.clone();
            let seen = Arc::clone(&seen);
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let request = String::from_utf8_lossy(&request).to_string();
                let path = request.split_whitespace().nth(1).unwrap_or("").to_string();
                if let Some(agent) = request
                    .lines()
                    .find_map(|l| l.strip_prefix("user-agent: ").or(l.strip_prefix("User-Agent: ")))
                {
                    seen.lock().unwrap().push(agent.trim().to_string());
                }

                let (status, body) = match path.as_str() {
                    "/0/0/0.png" => ("200 OK", png),
                    "/1/1/0.png" => ("500 Internal Server Error", Vec::new()),
                    _ => ("404 Not Found", Vec::new()),
                };
                let header = format!(
                    "HTTP/1.1 {}\r\nContent-Type: image/png\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    status,
                    body.len()
                );
                let _ = socket.write_all(header.as_bytes()).await;
                let _ = socket.write_all(&body).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (format!("http://{}", addr), agents)
}

#[tokio::test(flavor = "multi_thread")]
async fn test_osm_tiles_from_local_server() {
    let (url, agents) = spawn_tile_server().await;
    let store = TestStore::new();
    let config = ManagerConfig {
        osm_url: url,
        user_agent: "tilepyramid-tests".to_string(),
        ..ManagerConfig::default()
    };
    let manager =
        TileManager::with_default_providers(Arc::clone(&store.store), config, &Handle::current())
            .unwrap();

    let root = wait_for_tile(&manager, &TileId::root("dynamic:osm"))
        .await
        .unwrap();
    assert_eq!(root.as_image().get_pixel(10, 10), &Rgb([0, 0, 200]));
    assert_eq!(agents.lock().unwrap().first().map(String::as_str), Some("tilepyramid-tests"));

    // 404
    assert!(matches!(
        wait_for_tile(&manager, &TileId::new("dynamic:osm", 1, 0, 0)).await,
        Err(TileError::NotAvailable { .. })
    ));

    // server error: logged and treated as unavailable
    assert!(matches!(
        wait_for_tile(&manager, &TileId::new("dynamic:osm", 1, 0, 1)).await,
        Err(TileError::NotAvailable { .. })
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_invalid_osm_url_is_rejected() {
    let store = TestStore::new();
    let config = ManagerConfig {
        osm_url: "not a url".to_string(),
        ..ManagerConfig::default()
    };
    assert!(
        TileManager::with_default_providers(Arc::clone(&store.store), config, &Handle::current())
            .is_err()
    );
}
