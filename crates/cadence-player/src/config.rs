//! Player configuration.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use cadence_audio::AudioConfig;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Default configuration file name.
pub const CONFIG_FILE: &str = "cadence.toml";

/// Player configuration parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    // === Assets ===
    /// Directory scanned for `.ogg` files
    pub asset_dir: PathBuf,
    /// Loop every sound instead of playing it once
    pub looping: bool,

    // === Frame loop ===
    /// Frames per second driving `idle`
    pub frame_rate: u32,
    /// Seconds to run before shutting down (0 = until every sound finished)
    pub run_time_secs: f32,

    // === Engine ===
    /// Audio engine settings
    pub audio: AudioConfig,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            asset_dir: PathBuf::from("sounds"),
            looping: false,
            frame_rate: 60,
            run_time_secs: 0.0,
            audio: AudioConfig::default(),
        }
    }
}

impl PlayerConfig {
    /// Load configuration from a specific path.
    /// Returns default config if file doesn't exist or is invalid.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();

        if !path.exists() {
            info!("Config file not found, using defaults");
            return Self::default();
        }

        let mut contents = String::new();
        match fs::File::open(path) {
            Ok(mut file) => {
                if let Err(e) = file.read_to_string(&mut contents) {
                    warn!("Failed to read config file: {e}");
                    return Self::default();
                }
            },
            Err(e) => {
                warn!("Failed to open config file: {e}");
                return Self::default();
            },
        }

        match toml::from_str::<Self>(&contents) {
            Ok(mut config) => {
                config.validate();
                info!("Loaded config from {}", path.display());
                config
            },
            Err(e) => {
                warn!("Failed to parse config file: {e}");
                Self::default()
            },
        }
    }

    /// Save configuration to a specific path.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let mut file = fs::File::create(path)?;
        file.write_all(contents.as_bytes())?;

        info!("Saved config to {}", path.display());
        Ok(())
    }

    /// Validate and clamp configuration values to sensible ranges.
    pub fn validate(&mut self) {
        self.frame_rate = self.frame_rate.clamp(1, 240);
        if !self.run_time_secs.is_finite() || self.run_time_secs < 0.0 {
            self.run_time_secs = 0.0;
        }
        self.audio.validate();
    }

    /// Time between frames.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.frame_rate.max(1)
    }

    /// How long to run, if bounded.
    pub fn run_time(&self) -> Option<Duration> {
        (self.run_time_secs > 0.0).then(|| Duration::from_secs_f32(self.run_time_secs))
    }
}
