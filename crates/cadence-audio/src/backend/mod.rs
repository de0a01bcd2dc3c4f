//! Playback backends.
//!
//! Channels and buffers carry a backend-specific half that owns the actual
//! device resources. The set of backends is closed: a real output device via
//! rodio, and a headless clock-driven backend for machines without audio
//! output (and for tests).

mod headless;
mod rodio_device;

use std::sync::Arc;
use std::time::{Duration, Instant};

use cadence_common::AudioResult;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::wav::PcmData;
use crate::wind::WindControls;

pub use self::headless::{HeadlessBuffer, HeadlessChannel, HeadlessDevice};
pub use self::rodio_device::{RodioBuffer, RodioChannel, RodioDevice};

/// Which backend to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Default system output through rodio.
    #[default]
    Rodio,
    /// No device; playback is simulated with a clock.
    Headless,
}

/// Tracks where a voice is within its buffer.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct PlaybackClock {
    started: Option<Instant>,
    duration: Duration,
    looping: bool,
}

impl PlaybackClock {
    pub(crate) fn bind(&mut self, duration: Duration, looping: bool) {
        self.started = None;
        self.duration = duration;
        self.looping = looping;
    }

    pub(crate) fn start_at(&mut self, offset: Duration) {
        let now = Instant::now();
        self.started = Some(now.checked_sub(offset).unwrap_or(now));
    }

    pub(crate) fn stop(&mut self) {
        self.started = None;
    }

    pub(crate) fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    pub(crate) fn is_running(&self) -> bool {
        match self.started {
            Some(started) => self.looping || started.elapsed() < self.duration,
            None => false,
        }
    }

    /// Offset into the buffer; wraps while looping.
    pub(crate) fn position(&self) -> Option<Duration> {
        let elapsed = self.started?.elapsed();
        if self.duration.is_zero() {
            return Some(Duration::ZERO);
        }
        if self.looping {
            let wrapped = elapsed.as_nanos() % self.duration.as_nanos();
            Some(Duration::from_nanos(wrapped as u64))
        } else {
            Some(elapsed.min(self.duration))
        }
    }
}

/// The output device.
#[derive(Debug)]
pub enum AudioBackend {
    /// Real output.
    Rodio(RodioDevice),
    /// Simulated output.
    Headless(HeadlessDevice),
}

impl AudioBackend {
    /// Opens the requested backend.
    pub fn open(kind: BackendKind) -> AudioResult<Self> {
        match kind {
            BackendKind::Rodio => Ok(Self::Rodio(RodioDevice::new()?)),
            BackendKind::Headless => Ok(Self::Headless(HeadlessDevice::new())),
        }
    }

    /// Which variant this is.
    #[must_use]
    pub const fn kind(&self) -> BackendKind {
        match self {
            Self::Rodio(_) => BackendKind::Rodio,
            Self::Headless(_) => BackendKind::Headless,
        }
    }

    /// Allocates the device half of a channel.
    pub fn create_channel(&self) -> AudioResult<ChannelBackend> {
        match self {
            Self::Rodio(device) => Ok(ChannelBackend::Rodio(device.create_channel())),
            Self::Headless(_) => Ok(ChannelBackend::Headless(HeadlessChannel::default())),
        }
    }

    /// Allocates the device half of a buffer.
    #[must_use]
    pub fn create_buffer(&self) -> BufferBackend {
        match self {
            Self::Rodio(_) => BufferBackend::Rodio(RodioBuffer::default()),
            Self::Headless(_) => BufferBackend::Headless(HeadlessBuffer::default()),
        }
    }

    /// Sets the gain applied on top of every channel.
    pub fn set_internal_gain(&mut self, gain: f32) {
        let gain = gain.clamp(0.0, 1.0);
        match self {
            Self::Rodio(device) => device.set_internal_gain(gain),
            Self::Headless(device) => device.set_internal_gain(gain),
        }
    }

    /// Gain applied on top of every channel.
    #[must_use]
    pub fn internal_gain(&self) -> f32 {
        match self {
            Self::Rodio(device) => device.internal_gain(),
            Self::Headless(device) => device.internal_gain(),
        }
    }

    /// Starts wind playback driven by `controls`.
    pub fn init_wind(&mut self, controls: Arc<WindControls>) -> bool {
        match self {
            Self::Rodio(device) => device.init_wind(controls),
            Self::Headless(device) => device.init_wind(controls),
        }
    }

    /// Stops wind playback.
    pub fn cleanup_wind(&mut self) {
        match self {
            Self::Rodio(device) => device.cleanup_wind(),
            Self::Headless(device) => device.cleanup_wind(),
        }
    }

    /// Human-readable driver description.
    #[must_use]
    pub fn driver_name(&self, verbose: bool) -> String {
        match (self, verbose) {
            (Self::Rodio(_), false) => "rodio".to_string(),
            (Self::Rodio(_), true) => "rodio (cpal default output device)".to_string(),
            (Self::Headless(_), false) => "headless".to_string(),
            (Self::Headless(_), true) => "headless (no output device)".to_string(),
        }
    }

    /// The headless device, for inspection.
    #[must_use]
    pub const fn as_headless(&self) -> Option<&HeadlessDevice> {
        match self {
            Self::Headless(device) => Some(device),
            Self::Rodio(_) => None,
        }
    }
}

/// Device half of a channel.
#[derive(Debug)]
pub enum ChannelBackend {
    /// A rodio sink.
    Rodio(RodioChannel),
    /// A simulated voice.
    Headless(HeadlessChannel),
}

impl ChannelBackend {
    /// Attaches decoded samples. Returns false if the buffer belongs to a
    /// different backend or holds nothing.
    pub fn bind(&mut self, buffer: &BufferBackend, looping: bool) -> bool {
        match (self, buffer) {
            (Self::Rodio(channel), BufferBackend::Rodio(buffer)) => channel.bind(buffer, looping),
            (Self::Headless(channel), BufferBackend::Headless(buffer)) => {
                channel.bind(buffer, looping)
            },
            _ => {
                warn!("Refusing to bind a buffer from a different backend");
                false
            },
        }
    }

    /// Stops playback and drops the attached samples.
    pub fn unbind(&mut self) {
        match self {
            Self::Rodio(channel) => channel.unbind(),
            Self::Headless(channel) => channel.unbind(),
        }
    }

    /// Starts playback from `offset` into the buffer.
    pub fn play_from(&mut self, offset: Duration) {
        match self {
            Self::Rodio(channel) => channel.play_from(offset),
            Self::Headless(channel) => channel.play_from(offset),
        }
    }

    /// Whether samples are attached.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        match self {
            Self::Rodio(channel) => channel.is_bound(),
            Self::Headless(channel) => channel.is_bound(),
        }
    }

    /// Whether the voice is audible right now.
    #[must_use]
    pub fn is_playing(&self) -> bool {
        match self {
            Self::Rodio(channel) => channel.is_playing(),
            Self::Headless(channel) => channel.is_playing(),
        }
    }

    /// Offset into the attached buffer.
    #[must_use]
    pub fn position(&self) -> Option<Duration> {
        match self {
            Self::Rodio(channel) => channel.position(),
            Self::Headless(channel) => channel.position(),
        }
    }

    /// Changes looping for the next and current playback.
    pub fn set_looping(&mut self, looping: bool) {
        match self {
            Self::Rodio(channel) => channel.set_looping(looping),
            Self::Headless(channel) => channel.set_looping(looping),
        }
    }

    /// Sets the output gain.
    pub fn set_volume(&mut self, volume: f32) {
        match self {
            Self::Rodio(channel) => channel.set_volume(volume),
            Self::Headless(channel) => channel.set_volume(volume),
        }
    }

    /// The simulated voice, for inspection.
    #[must_use]
    pub const fn as_headless(&self) -> Option<&HeadlessChannel> {
        match self {
            Self::Headless(channel) => Some(channel),
            Self::Rodio(_) => None,
        }
    }
}

/// Device half of a buffer.
#[derive(Debug)]
pub enum BufferBackend {
    /// Samples kept for rodio sinks.
    Rodio(RodioBuffer),
    /// Length only.
    Headless(HeadlessBuffer),
}

impl BufferBackend {
    /// Takes ownership of decoded samples.
    pub fn upload(&mut self, pcm: PcmData) {
        match self {
            Self::Rodio(buffer) => buffer.upload(pcm),
            Self::Headless(buffer) => buffer.upload(&pcm),
        }
    }

    /// Releases the samples.
    pub fn release(&mut self) {
        match self {
            Self::Rodio(buffer) => buffer.release(),
            Self::Headless(buffer) => buffer.release(),
        }
    }

    /// Whether samples are loaded.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        match self {
            Self::Rodio(buffer) => buffer.is_loaded(),
            Self::Headless(buffer) => buffer.is_loaded(),
        }
    }

    /// Length in sample frames.
    #[must_use]
    pub fn frames(&self) -> u32 {
        match self {
            Self::Rodio(buffer) => buffer.frames(),
            Self::Headless(buffer) => buffer.frames(),
        }
    }

    /// Playback length.
    #[must_use]
    pub fn duration(&self) -> Duration {
        match self {
            Self::Rodio(buffer) => buffer.duration(),
            Self::Headless(buffer) => buffer.duration(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headless_backend_opens() {
        let backend = AudioBackend::open(BackendKind::Headless).expect("headless always opens");
        assert_eq!(backend.kind(), BackendKind::Headless);
        assert_eq!(backend.driver_name(false), "headless");
        assert!(backend.as_headless().is_some());
    }

    #[test]
    fn test_internal_gain_clamped() {
        let mut backend = AudioBackend::open(BackendKind::Headless).expect("open");
        backend.set_internal_gain(3.0);
        assert!((backend.internal_gain() - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_bind_requires_loaded_buffer() {
        let backend = AudioBackend::open(BackendKind::Headless).expect("open");
        let mut channel = backend.create_channel().expect("channel");
        let mut buffer = backend.create_buffer();
        assert!(!channel.bind(&buffer, false));

        buffer.upload(PcmData {
            samples: vec![0; 800],
            channels: 1,
            sample_rate: 8000,
        });
        assert_eq!(buffer.frames(), 800);
        assert_eq!(buffer.duration(), Duration::from_millis(100));
        assert!(channel.bind(&buffer, false));
        assert!(channel.is_bound());
        assert!(!channel.is_playing());

        channel.play_from(Duration::ZERO);
        assert!(channel.is_playing());
        channel.unbind();
        assert!(!channel.is_playing());
        assert!(!channel.is_bound());
    }

    #[test]
    fn test_clock_wraps_when_looping() {
        let mut clock = PlaybackClock::default();
        clock.bind(Duration::from_millis(10), true);
        assert_eq!(clock.position(), None);
        clock.start_at(Duration::from_millis(25));
        let pos = clock.position().expect("running");
        assert!(pos < Duration::from_millis(10));
        assert!(clock.is_running());
    }

    #[test]
    fn test_clock_finishes() {
        let mut clock = PlaybackClock::default();
        clock.bind(Duration::from_millis(10), false);
        clock.start_at(Duration::from_millis(50));
        assert!(!clock.is_running());
        assert_eq!(clock.position(), Some(Duration::from_millis(10)));
    }
}
