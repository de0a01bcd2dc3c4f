//! # Cadence Player
//!
//! Plays every `.ogg` file in a directory through the audio engine.
//!
//! Files are registered as assets in an in-memory store, decoded
//! incrementally by the engine and played as they become ready. The frame
//! loop runs until the configured run time elapses or every sound finished.
//!
//! Usage: `cadence [config.toml]`

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

mod config;

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use cadence_audio::{
    AssetKind, AssetStore, AudioCategory, AudioEngine, AudioSource, MemoryAssetStore,
};
use cadence_common::{AssetId, OwnerId, SourceId};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{PlayerConfig, CONFIG_FILE};

/// Main entry point.
fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("cadence=info".parse()?))
        .init();

    info!("Cadence player starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::args().nth(1).unwrap_or_else(|| CONFIG_FILE.to_string());
    let config = PlayerConfig::load_from(&config_path);
    if !Path::new(&config_path).exists() {
        if let Err(e) = config.save_to(&config_path) {
            warn!("Failed to write default config: {e}");
        }
    }

    let store = Arc::new(MemoryAssetStore::new());
    let assets = register_assets(&store, &config.asset_dir)?;
    if assets.is_empty() {
        warn!("No .ogg files in {}", config.asset_dir.display());
        return Ok(());
    }

    let mut engine = AudioEngine::init(config.audio.clone(), store)
        .context("Failed to open audio device")?;
    info!("Audio driver: {}", engine.driver_name(true));

    run(&mut engine, &config, &assets);

    engine.shutdown();
    info!("Cadence player shutdown complete");
    Ok(())
}

/// Loads every `.ogg` file in `dir` into the store.
///
/// Ids are derived from file contents so decoded containers persisted by an
/// earlier run are found again.
fn register_assets(store: &MemoryAssetStore, dir: &Path) -> Result<Vec<AssetId>> {
    let mut paths: Vec<_> = fs::read_dir(dir)
        .with_context(|| format!("Failed to read asset directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("ogg")))
        .collect();
    paths.sort();

    let mut assets = Vec::with_capacity(paths.len());
    for path in paths {
        let bytes = fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?;
        let id = AssetId::from_content(&bytes);
        if store.exists(id, AssetKind::Sound) {
            info!("{} duplicates an earlier file, skipping", path.display());
            continue;
        }
        info!("Registered {} as {id}", path.display());
        store.insert(id, AssetKind::Sound, bytes);
        assets.push(id);
    }
    Ok(assets)
}

/// Drives the engine at the configured frame rate.
fn run(engine: &mut AudioEngine, config: &PlayerConfig, assets: &[AssetId]) {
    let mut sources: Vec<SourceId> = Vec::with_capacity(assets.len());
    for &asset in assets {
        engine.preload_sound(asset);
        let source = AudioSource::new(SourceId::generate(), OwnerId::NULL, 1.0, AudioCategory::Sfx)
            .with_ambient(true)
            .with_looping(config.looping);
        let id = engine.add_audio_source(source);
        engine.play(id, asset);
        sources.push(id);
    }

    let start = Instant::now();
    let frame = config.frame_interval();
    let mut frames: u64 = 0;
    loop {
        let frame_start = Instant::now();
        engine.idle(0.0);
        frames += 1;

        if config.run_time().is_some_and(|limit| start.elapsed() >= limit) {
            break;
        }
        if sources.iter().all(|&id| engine.find_audio_source(id).is_none()) {
            info!("All sounds finished");
            break;
        }

        if let Some(remaining) = frame.checked_sub(frame_start.elapsed()) {
            std::thread::sleep(remaining);
        }
    }
    info!("Ran {frames} frames in {:.1}s", start.elapsed().as_secs_f32());
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_register_assets_ids_are_stable() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        fs::write(temp_dir.path().join("a.ogg"), b"first").expect("write");
        fs::write(temp_dir.path().join("b.OGG"), b"second").expect("write");
        fs::write(temp_dir.path().join("c.ogg"), b"first").expect("write");
        fs::write(temp_dir.path().join("notes.txt"), b"ignored").expect("write");

        let first = register_assets(&MemoryAssetStore::new(), temp_dir.path()).expect("register");
        let second = register_assets(&MemoryAssetStore::new(), temp_dir.path()).expect("register");

        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
        assert_eq!(first[0], AssetId::from_content(b"first"));
    }

    #[test]
    fn test_register_assets_missing_dir() {
        let store = MemoryAssetStore::new();
        assert!(register_assets(&store, Path::new("/nonexistent/sounds")).is_err());
    }
}
