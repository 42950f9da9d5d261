//! End-to-end tests from a PPM image to tiles on screen.
//!
//! Tests verify:
//! - Pyramids built from PPM files are served exactly by the manager
//! - Tiles beyond the deepest level are synthesized as final tiles
//! - Cut tiles stand in for pending loads until the real tile arrives
//! - Failed builds leave nothing behind

use std::sync::Arc;

use tile_pyramid::error::TileError;
use tile_pyramid::{ManagerConfig, PpmSource, TileId, TileManager, TileStore, Tiler};
use tokio::runtime::Handle;

use super::test_utils::{gradient_image, matches_region, wait_for_tile, write_ppm, TestStore};

const MEDIA: &str = "/scans/page 1.ppm";

fn manager(store: &TestStore) -> TileManager {
    TileManager::new(
        Arc::clone(&store.store),
        ManagerConfig::default(),
        &Handle::current(),
    )
}

// =============================================================================
// Building and Serving
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_full_resolution_tiles_match_source() {
    let image = gradient_image(600, 400);
    let store = TestStore::new();
    let meta = store.tile_image(MEDIA, &image, 256);
    assert_eq!(meta.max_level, Some(2));
    assert_eq!((meta.width, meta.height), (Some(600), Some(400)));

    let manager = manager(&store);
    assert!(manager.is_tiled(MEDIA));

    for (row, col) in [(0, 0), (0, 2), (1, 1), (1, 2)] {
        let id = TileId::new(MEDIA, 2, row, col);
        let tile = wait_for_tile(&manager, &id).await.unwrap();
        assert!(
            matches_region(&tile, &image, col * 256, row * 256),
            "tile {} differs from the source",
            id
        );
    }

    // right and bottom edge tiles are cropped
    let corner = manager.get_tile(&TileId::new(MEDIA, 2, 1, 2)).unwrap();
    assert_eq!(corner.size(), (88, 144));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_lower_levels_are_downsampled() {
    let store = TestStore::new();
    store.tile_image(MEDIA, &gradient_image(600, 400), 256);
    let manager = manager(&store);

    let root = wait_for_tile(&manager, &TileId::root(MEDIA)).await.unwrap();
    assert_eq!(root.size(), (150, 100));

    let level1 = wait_for_tile(&manager, &TileId::new(MEDIA, 1, 0, 1))
        .await
        .unwrap();
    assert_eq!(level1.size(), (44, 200));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_tiles_outside_the_pyramid_are_not_available() {
    let store = TestStore::new();
    store.tile_image(MEDIA, &gradient_image(600, 400), 256);
    let manager = manager(&store);

    let below_max = TileId::new(MEDIA, 3, 0, 0);
    assert!(matches!(
        wait_for_tile(&manager, &below_max).await,
        Err(TileError::NotAvailable { .. })
    ));

    let beyond_edge = TileId::new(MEDIA, 1, 3, 0);
    assert!(matches!(
        wait_for_tile(&manager, &beyond_edge).await,
        Err(TileError::NotAvailable { .. })
    ));
}

// =============================================================================
// Tile Synthesis
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_cut_tile_stands_in_until_loaded() {
    let image = gradient_image(600, 400);
    let store = TestStore::new();
    store.tile_image(MEDIA, &image, 256);
    let manager = manager(&store);
    let id = TileId::new(MEDIA, 2, 0, 0);

    wait_for_tile(&manager, &TileId::root(MEDIA)).await.unwrap();

    let (approx, is_final) = manager.cut_tile(&id, 0).unwrap();
    assert!(!is_final);
    assert_eq!(approx.size(), (256, 256));

    let exact = wait_for_tile(&manager, &id).await.unwrap();
    let (tile, is_final) = manager.cut_tile(&id, 0).unwrap();
    assert!(is_final);
    assert!(tile.ptr_eq(&exact));
    assert!(matches_region(&tile, &image, 0, 0));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cut_below_deepest_level_is_final() {
    let store = TestStore::new();
    store.tile_image(MEDIA, &gradient_image(600, 400), 256);
    let manager = manager(&store);

    let deepest = wait_for_tile(&manager, &TileId::new(MEDIA, 2, 1, 2))
        .await
        .unwrap();
    assert_eq!(deepest.size(), (88, 144));

    let below = TileId::new(MEDIA, 3, 2, 4);
    assert!(matches!(
        wait_for_tile(&manager, &below).await,
        Err(TileError::NotAvailable { .. })
    ));

    // top left quadrant of the 88x144 tile, scaled up twice
    let (tile, is_final) = manager.cut_tile(&below, 0).unwrap();
    assert!(is_final);
    assert_eq!(tile.size(), (176, 256));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cut_without_root_reports_not_loaded() {
    let store = TestStore::new();
    store.tile_image(MEDIA, &gradient_image(600, 400), 256);
    let manager = manager(&store);

    let result = manager.cut_tile(&TileId::new(MEDIA, 2, 1, 1), 0);
    assert!(matches!(result, Err(TileError::NotLoaded { .. })));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_robust_get_of_negative_level() {
    let store = TestStore::new();
    store.tile_image(MEDIA, &gradient_image(600, 400), 256);
    let manager = manager(&store);
    wait_for_tile(&manager, &TileId::root(MEDIA)).await.unwrap();

    let tile = manager
        .get_tile_robust(&TileId::new(MEDIA, -1, 0, 0))
        .unwrap();
    assert_eq!(tile.size(), (75, 50));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_untiled_media() {
    let store = TestStore::new();
    let manager = manager(&store);
    let id = TileId::root("/scans/never-tiled.ppm");

    assert!(!manager.is_tiled(id.media_id()));
    assert!(matches!(
        manager.get_tile(&id),
        Err(TileError::MediaNotTiled { .. })
    ));
    assert!(matches!(
        manager.cut_tile(&id, 0),
        Err(TileError::MediaNotTiled { .. })
    ));
    assert_eq!(manager.pending_requests(), 0);
}

// =============================================================================
// Store Lifetime
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_pyramid_is_visible_to_a_new_store() {
    let store = TestStore::new();
    let meta = store.tile_image(MEDIA, &gradient_image(300, 300), 128);

    let reopened = TileStore::new(store.store.root());
    assert!(reopened.is_tiled(MEDIA));
    assert_eq!(reopened.pyramid_metadata(MEDIA), Some(meta));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_truncated_input_leaves_no_pyramid() {
    let store = TestStore::new();
    let path = write_ppm(store.dir.path(), "full.ppm", &gradient_image(300, 300));
    let mut data = std::fs::read(&path).unwrap();
    data.truncate(data.len() / 2);
    std::fs::write(&path, data).unwrap();

    let source = PpmSource::open(&path).unwrap();
    let result = Tiler::new(Arc::clone(&store.store), source, MEDIA)
        .with_tile_size(64)
        .spawn()
        .await
        .unwrap();

    assert!(matches!(result, Err(TileError::PyramidBuildFailed { .. })));
    assert!(!store.store.is_tiled(MEDIA));
    assert!(!store.store.media_path(MEDIA).exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_purged_media_is_no_longer_tiled() {
    let store = TestStore::new();
    store.tile_image(MEDIA, &gradient_image(200, 100), 64);
    let manager = manager(&store);
    assert!(manager.is_tiled(MEDIA));

    manager.purge(Some(MEDIA));
    store.store.purge_media(MEDIA).unwrap();
    assert!(!manager.is_tiled(MEDIA));
}
