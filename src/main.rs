//! Tile Pyramid - build and inspect tile pyramids.
//!
//! This binary tiles PPM images into the tile store and reports what the
//! tile manager knows about a media or a scene.

use clap::Parser;
use serde::Serialize;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tile_pyramid::{
    config::{Command, Config, InfoConfig, SceneConfig, TileConfig},
    PpmSource, PyramidMetadata, Scene, TileManager, TileStore, Tiler,
};

/// How often the `tile` command reports progress.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let store = Arc::new(TileStore::new(config.store_dir()));
    debug!(root = %store.root().display(), "Using tile store");

    match &config.command {
        Command::Tile(tile) => run_tile(store, tile).await,
        Command::Info(info) => run_info(&config, store, info),
        Command::Scene(scene) => run_scene(&config, store, scene),
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "tile_pyramid=debug,tilepyramid=debug"
    } else {
        "tile_pyramid=info,tilepyramid=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

// =============================================================================
// Tile Command
// =============================================================================

async fn run_tile(store: Arc<TileStore>, config: &TileConfig) -> ExitCode {
    let source = match PpmSource::open(&config.input) {
        Ok(source) => source,
        Err(e) => {
            error!("Failed to open {}: {}", config.input.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let media_id = config.media_id();
    info!("Tiling {} as '{}'", config.input.display(), media_id);

    let tiler = Tiler::new(store, source, media_id)
        .with_tile_size(config.tile_size)
        .with_file_ext(config.file_ext.as_str());
    let progress = tiler.progress();
    let mut handle = tiler.spawn();

    let result = loop {
        tokio::select! {
            result = &mut handle => break result,
            _ = tokio::time::sleep(PROGRESS_INTERVAL) => {
                debug!(
                    "{:.1}% ({}/{} tiles)",
                    progress.fraction() * 100.0,
                    progress.tiles_saved(),
                    progress.total_tiles()
                );
            }
        }
    };

    match result {
        Ok(Ok(metadata)) => {
            info!(
                "Done: {} tiles, {} levels, {}x{} pixels",
                progress.tiles_saved(),
                metadata.max_level.unwrap_or(0) + 1,
                metadata.width.unwrap_or(0),
                metadata.height.unwrap_or(0)
            );
            ExitCode::SUCCESS
        }
        Ok(Err(e)) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("Tiling task failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// Info Command
// =============================================================================

#[derive(Serialize)]
struct MediaInfo<'a> {
    media_id: &'a str,
    tiled: bool,
    metadata: Option<PyramidMetadata>,
}

fn run_info(config: &Config, store: Arc<TileStore>, info: &InfoConfig) -> ExitCode {
    let manager = match create_manager(config, store) {
        Some(manager) => manager,
        None => return ExitCode::FAILURE,
    };

    let report = MediaInfo {
        media_id: &info.media_id,
        tiled: manager.is_tiled(&info.media_id),
        metadata: manager.metadata(&info.media_id),
    };
    manager.shutdown();

    print_json(&report)
}

// =============================================================================
// Scene Command
// =============================================================================

fn run_scene(config: &Config, store: Arc<TileStore>, scene: &SceneConfig) -> ExitCode {
    let loaded = match Scene::load(&scene.path) {
        Ok(loaded) => loaded,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let manager = match create_manager(config, store) {
        Some(manager) => manager,
        None => return ExitCode::FAILURE,
    };

    let resolved = loaded.resolve(&manager);
    manager.shutdown();

    print_json(&resolved)
}

fn create_manager(config: &Config, store: Arc<TileStore>) -> Option<TileManager> {
    match TileManager::with_default_providers(store, config.manager_config(), &Handle::current()) {
        Ok(manager) => Some(manager),
        Err(e) => {
            error!("Failed to create tile manager: {}", e);
            None
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Failed to serialize output: {}", e);
            ExitCode::FAILURE
        }
    }
}
