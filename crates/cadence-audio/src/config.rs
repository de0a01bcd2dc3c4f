//! Audio subsystem configuration.
//!
//! Every tunable of the engine lives here. Configuration is stored as TOML
//! and falls back to defaults when the file is missing or malformed.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::backend::BackendKind;
use crate::engine::{MAX_BUFFERS, MAX_CHANNELS};
use crate::gain::{AudioCategory, GainLevels, GainState};
use crate::source::SourceTimeouts;

/// Audio configuration parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    // === Device ===
    /// Output backend
    pub backend: BackendKind,
    /// Channel pool size (capped at `MAX_CHANNELS`)
    pub channels: usize,
    /// Buffer pool size (capped at `MAX_BUFFERS`)
    pub buffers: usize,

    // === Timing ===
    /// Decode budget per frame when `idle` is given none
    pub decode_budget_secs: f32,
    /// How often wind targets are recomputed
    pub wind_update_interval_secs: f32,
    /// Sources still playing after this long are collected
    pub max_source_age_secs: f32,
    /// Sources that never played are collected after this long
    pub unplayed_source_timeout_secs: f32,
    /// Unused buffers older than this are released
    pub buffer_flush_age_secs: f32,

    // === Decoded cache ===
    /// Write decoded containers to `cache_dir` on the I/O thread
    pub persist_decoded: bool,
    /// Directory for decoded containers
    pub cache_dir: PathBuf,

    // === Gains ===
    /// Master gain (0.0 - 1.0)
    pub master_gain: f32,
    /// Uncategorised sounds (0.0 - 1.0)
    pub uncategorized_gain: f32,
    /// Sound effects (0.0 - 1.0)
    pub sfx_gain: f32,
    /// Interface sounds (0.0 - 1.0)
    pub ui_gain: f32,
    /// Ambient sounds (0.0 - 1.0)
    pub ambient_gain: f32,
    /// Start muted
    pub muted: bool,

    // === Listener ===
    /// Doppler strength
    pub doppler_factor: f32,
    /// World units to metres
    pub distance_factor: f32,
    /// Distance rolloff
    pub rolloff_factor: f32,

    // === Wind ===
    /// Start the wind generator at init
    pub enable_wind: bool,
    /// Wind gain at full speed (0.0 - 1.0)
    pub max_wind_gain: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            // Device
            backend: BackendKind::Rodio,
            channels: MAX_CHANNELS,
            buffers: MAX_BUFFERS,

            // Timing
            decode_budget_secs: 0.002,
            wind_update_interval_secs: 0.1,
            max_source_age_secs: 60.0,
            unplayed_source_timeout_secs: 15.0,
            buffer_flush_age_secs: 30.0,

            // Decoded cache
            persist_decoded: true,
            cache_dir: PathBuf::from("cache").join("audio"),

            // Gains
            master_gain: 1.0,
            uncategorized_gain: 1.0,
            sfx_gain: 1.0,
            ui_gain: 1.0,
            ambient_gain: 1.0,
            muted: false,

            // Listener
            doppler_factor: 1.0,
            distance_factor: 1.0,
            rolloff_factor: 1.0,

            // Wind
            enable_wind: false,
            max_wind_gain: 1.0,
        }
    }
}

impl AudioConfig {
    /// Load configuration from a specific path.
    /// Returns default config if file doesn't exist or is invalid.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();

        if !path.exists() {
            info!("Audio config not found, using defaults");
            return Self::default();
        }

        let mut contents = String::new();
        match fs::File::open(path) {
            Ok(mut file) => {
                if let Err(e) = file.read_to_string(&mut contents) {
                    warn!("Failed to read audio config: {e}");
                    return Self::default();
                }
            },
            Err(e) => {
                warn!("Failed to open audio config: {e}");
                return Self::default();
            },
        }

        match toml::from_str::<Self>(&contents) {
            Ok(mut config) => {
                config.validate();
                info!("Loaded audio config from {}", path.display());
                config
            },
            Err(e) => {
                warn!("Failed to parse audio config: {e}");
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

        info!("Saved audio config to {}", path.display());
        Ok(())
    }

    /// Validate and clamp configuration values to sensible ranges.
    pub fn validate(&mut self) {
        // Pools
        self.channels = self.channels.clamp(1, MAX_CHANNELS);
        self.buffers = self.buffers.clamp(1, MAX_BUFFERS);

        // Timing
        self.decode_budget_secs = non_negative(self.decode_budget_secs);
        self.wind_update_interval_secs = non_negative(self.wind_update_interval_secs);
        self.max_source_age_secs = non_negative(self.max_source_age_secs);
        self.unplayed_source_timeout_secs = non_negative(self.unplayed_source_timeout_secs);
        self.buffer_flush_age_secs = non_negative(self.buffer_flush_age_secs);

        // Gains
        self.master_gain = self.master_gain.clamp(0.0, 1.0);
        self.uncategorized_gain = self.uncategorized_gain.clamp(0.0, 1.0);
        self.sfx_gain = self.sfx_gain.clamp(0.0, 1.0);
        self.ui_gain = self.ui_gain.clamp(0.0, 1.0);
        self.ambient_gain = self.ambient_gain.clamp(0.0, 1.0);
        self.max_wind_gain = self.max_wind_gain.clamp(0.0, 1.0);

        // Listener
        self.doppler_factor = non_negative(self.doppler_factor);
        self.distance_factor = non_negative(self.distance_factor);
        self.rolloff_factor = non_negative(self.rolloff_factor);
    }

    /// Builder: backend.
    #[must_use]
    pub const fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Builder: pool sizes.
    #[must_use]
    pub const fn with_pools(mut self, channels: usize, buffers: usize) -> Self {
        self.channels = channels;
        self.buffers = buffers;
        self
    }

    /// Builder: decoded containers go to `dir` through the I/O thread.
    #[must_use]
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.persist_decoded = true;
        self.cache_dir = dir.into();
        self
    }

    /// Builder: decoded containers are stored synchronously in the asset store.
    #[must_use]
    pub const fn without_persistence(mut self) -> Self {
        self.persist_decoded = false;
        self
    }

    /// Default decode budget.
    #[must_use]
    pub fn decode_budget(&self) -> Duration {
        secs(self.decode_budget_secs)
    }

    /// Wind update interval.
    #[must_use]
    pub fn wind_update_interval(&self) -> Duration {
        secs(self.wind_update_interval_secs)
    }

    /// Stale buffer age.
    #[must_use]
    pub fn buffer_flush_age(&self) -> Duration {
        secs(self.buffer_flush_age_secs)
    }

    /// Source collection timeouts.
    #[must_use]
    pub fn source_timeouts(&self) -> SourceTimeouts {
        SourceTimeouts {
            max_age: secs(self.max_source_age_secs),
            unplayed: secs(self.unplayed_source_timeout_secs),
        }
    }

    /// Initial gain settings.
    #[must_use]
    pub fn gain_levels(&self) -> GainLevels {
        let mut secondary = [1.0; AudioCategory::COUNT];
        secondary[AudioCategory::None.index()] = self.uncategorized_gain;
        secondary[AudioCategory::Sfx.index()] = self.sfx_gain;
        secondary[AudioCategory::Ui.index()] = self.ui_gain;
        secondary[AudioCategory::Ambient.index()] = self.ambient_gain;
        GainState::levels(self.master_gain, secondary, self.muted)
    }
}

fn non_negative(value: f32) -> f32 {
    if value.is_finite() {
        value.max(0.0)
    } else {
        0.0
    }
}

fn secs(value: f32) -> Duration {
    Duration::try_from_secs_f32(non_negative(value)).unwrap_or(Duration::MAX)
}
