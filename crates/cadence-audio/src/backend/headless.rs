//! Device-less backend.
//!
//! Voices "play" for exactly their buffer's duration, measured with a wall
//! clock, and record the gain they were given so callers can observe mixing
//! decisions without hearing them.

use std::sync::Arc;
use std::time::Duration;

use super::PlaybackClock;
use crate::wav::PcmData;
use crate::wind::WindControls;

/// The simulated device.
#[derive(Debug)]
pub struct HeadlessDevice {
    internal_gain: f32,
    gain_updates: u32,
    wind: Option<Arc<WindControls>>,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDevice {
    /// A device at full gain with no wind.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            internal_gain: 1.0,
            gain_updates: 0,
            wind: None,
        }
    }

    pub(crate) fn set_internal_gain(&mut self, gain: f32) {
        self.internal_gain = gain;
        self.gain_updates += 1;
    }

    pub(crate) const fn internal_gain(&self) -> f32 {
        self.internal_gain
    }

    /// How many times the internal gain was pushed to the device.
    #[must_use]
    pub const fn gain_updates(&self) -> u32 {
        self.gain_updates
    }

    pub(crate) fn init_wind(&mut self, controls: Arc<WindControls>) -> bool {
        self.wind = Some(controls);
        true
    }

    pub(crate) fn cleanup_wind(&mut self) {
        self.wind = None;
    }

    /// The wind controls, while wind is running.
    #[must_use]
    pub fn wind(&self) -> Option<&WindControls> {
        self.wind.as_deref()
    }
}

/// A simulated voice.
#[derive(Debug, Default)]
pub struct HeadlessChannel {
    bound: bool,
    clock: PlaybackClock,
    volume: f32,
    volume_updates: u32,
    plays: u32,
}

impl HeadlessChannel {
    pub(crate) fn bind(&mut self, buffer: &HeadlessBuffer, looping: bool) -> bool {
        if !buffer.is_loaded() {
            return false;
        }
        self.clock.bind(buffer.duration(), looping);
        self.bound = true;
        true
    }

    pub(crate) fn unbind(&mut self) {
        self.clock.stop();
        self.bound = false;
    }

    pub(crate) fn play_from(&mut self, offset: Duration) {
        if self.bound {
            self.clock.start_at(offset);
            self.plays += 1;
        }
    }

    pub(crate) const fn is_bound(&self) -> bool {
        self.bound
    }

    pub(crate) fn is_playing(&self) -> bool {
        self.clock.is_running()
    }

    pub(crate) fn position(&self) -> Option<Duration> {
        self.clock.position()
    }

    pub(crate) fn set_looping(&mut self, looping: bool) {
        self.clock.set_looping(looping);
    }

    pub(crate) fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
        self.volume_updates += 1;
    }

    /// Last volume set.
    #[must_use]
    pub const fn volume(&self) -> f32 {
        self.volume
    }

    /// How many times the volume was pushed to this voice.
    #[must_use]
    pub const fn volume_updates(&self) -> u32 {
        self.volume_updates
    }

    /// How many times playback was started.
    #[must_use]
    pub const fn plays(&self) -> u32 {
        self.plays
    }
}

/// Length of the simulated samples.
#[derive(Debug, Default)]
pub struct HeadlessBuffer {
    frames: u32,
    sample_rate: u32,
    loaded: bool,
}

impl HeadlessBuffer {
    pub(crate) fn upload(&mut self, pcm: &PcmData) {
        self.frames = pcm.frames();
        self.sample_rate = pcm.sample_rate;
        self.loaded = true;
    }

    pub(crate) fn release(&mut self) {
        *self = Self::default();
    }

    pub(crate) const fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub(crate) const fn frames(&self) -> u32 {
        self.frames
    }

    pub(crate) fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(f64::from(self.frames) / f64::from(self.sample_rate))
    }
}
