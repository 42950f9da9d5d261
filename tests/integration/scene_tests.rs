//! Scene file integration tests.
//!
//! Tests verify:
//! - Scenes saved to disk load back unchanged
//! - Scene objects are resolved against tiled and dynamic media

use std::sync::Arc;

use tokio::runtime::Handle;

use tile_pyramid::{ManagerConfig, ObjectKind, Scene, SceneObject, TileManager};

use super::test_utils::{gradient_image, TestStore};

const PAGE: &str = "/scans/chapter 1/page:3.ppm";

fn scene() -> Scene {
    let mut scene = Scene {
        zoom_level: 1.0,
        origin: (-50.0, 25.5),
        objects: Vec::new(),
    };
    scene.add(SceneObject::tiled(PAGE, 0.0, 0.0, 0.0));
    scene.add(SceneObject::tiled("dynamic:mandel", -1.0, 700.0, 0.0));
    scene.add(SceneObject::tiled("/scans/missing.ppm", 0.0, 0.0, 500.0));
    scene.add(SceneObject {
        kind: ObjectKind::Svg,
        media_id: "/drawings/arrow.svg".to_string(),
        zoom_level: 0.0,
        x: 10.0,
        y: 10.0,
    });
    scene
}

#[test]
fn test_scene_file_is_readable_text() {
    let store = TestStore::new();
    let path = store.dir.path().join("desk.pzs");
    scene().save(&path).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.starts_with("1\t-50\t25.5\n"));
    assert!(text.contains("TiledMediaObject\t/scans/chapter%201/page:3.ppm\t0\t0\t0\n"));
    assert!(text.contains("SVGMediaObject\t/drawings/arrow.svg\t"));

    assert_eq!(Scene::load(&path).unwrap(), scene());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_resolve_against_manager() {
    let store = TestStore::new();
    store.tile_image(PAGE, &gradient_image(600, 400), 256);
    let manager = TileManager::with_default_providers(
        Arc::clone(&store.store),
        ManagerConfig::default(),
        &Handle::current(),
    )
    .unwrap();

    let resolved = scene().resolve(&manager);
    assert_eq!(resolved.len(), 4);

    // max level 2, shown at zoom 1: half size
    let page = &resolved[0];
    assert_eq!(page.metadata.as_ref().and_then(|m| m.max_level), Some(2));
    assert_eq!(page.size, Some((300.0, 200.0)));

    // fixed aspect, zoom 0: one tile
    assert_eq!(resolved[1].size, Some((256.0, 256.0)));

    assert!(resolved[2].metadata.is_none());
    assert!(resolved[2].size.is_none());
    assert!(resolved[3].metadata.is_none());
}
