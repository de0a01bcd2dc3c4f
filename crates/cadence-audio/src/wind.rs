//! Procedural wind.
//!
//! The engine maps the local wind vector to three scalars (gain, pitch, pan)
//! on a fixed interval and publishes them as [`WindControls`] targets. A
//! [`WindGen`] running on the audio thread glides toward those targets while
//! band-pass filtering white noise.

use std::f32::consts::PI;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use glam::Vec3;

/// Wind speed at which gain saturates.
pub const MAX_WIND_SPEED: f32 = 20.0;

/// Center frequency at zero wind.
pub const WIND_BASE_CENTER_FREQ: f32 = 80.0;

/// Center frequency while the camera is under water.
pub const WIND_UNDERWATER_CENTER_FREQ: f32 = 20.0;

/// Sample rate of the generated noise.
pub const WIND_SAMPLE_RATE: u32 = 44_100;

/// Per-sample glide toward the targets.
const SMOOTHING: f32 = 0.0005;

/// Bandwidth of the noise filter.
const FILTER_Q: f32 = 0.6;

/// Converts a wind vector from region axes (+X forward, +Y left, +Z up) to
/// listener axes (+X right, +Y up, +Z back).
#[must_use]
pub fn to_listener_frame(wind: Vec3) -> Vec3 {
    Vec3::new(-wind.y, wind.z, -wind.x)
}

/// Linear in speed, saturating at [`MAX_WIND_SPEED`].
#[must_use]
pub fn map_wind_vec_to_gain(wind: Vec3) -> f32 {
    wind.length().min(MAX_WIND_SPEED) / MAX_WIND_SPEED
}

fn angle_to_right(wind: Vec3) -> f32 {
    let dot = wind.normalize_or_zero().dot(Vec3::X).clamp(-1.0, 1.0);
    dot.acos() / PI
}

/// Pitch offset in `[0, 0.5]`: highest for wind blowing front to back.
#[must_use]
pub fn map_wind_vec_to_pitch(wind: Vec3) -> f32 {
    let theta = angle_to_right(wind);
    let folded = if theta > 0.5 { 1.0 - theta } else { theta };
    folded.max(0.0)
}

/// Right-channel share in `[0, 1]`.
#[must_use]
pub fn map_wind_vec_to_pan(wind: Vec3) -> f32 {
    angle_to_right(wind)
}

/// What the generator should glide toward.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindTargets {
    /// Output gain.
    pub gain: f32,
    /// Filter center frequency in Hz.
    pub center_freq: f32,
    /// Right-channel share.
    pub pan: f32,
}

impl Default for WindTargets {
    fn default() -> Self {
        Self {
            gain: 0.0,
            center_freq: WIND_BASE_CENTER_FREQ,
            pan: 0.5,
        }
    }
}

impl WindTargets {
    /// Targets for a wind vector in region axes.
    #[must_use]
    pub fn from_wind(wind: Vec3, max_gain: f32, underwater: bool) -> Self {
        let wind = to_listener_frame(wind);
        let gain = map_wind_vec_to_gain(wind);
        let pitch = 1.0 + map_wind_vec_to_pitch(wind);
        let center_freq = if underwater {
            WIND_UNDERWATER_CENTER_FREQ
        } else {
            WIND_BASE_CENTER_FREQ * pitch.powf(2.5 * (gain + 1.0))
        };
        Self {
            gain: gain * max_gain.clamp(0.0, 1.0),
            center_freq,
            pan: map_wind_vec_to_pan(wind),
        }
    }
}

/// Lock-free targets shared with the generator.
#[derive(Debug)]
pub struct WindControls {
    gain: AtomicU32,
    center_freq: AtomicU32,
    pan: AtomicU32,
}

impl Default for WindControls {
    fn default() -> Self {
        let targets = WindTargets::default();
        Self {
            gain: AtomicU32::new(targets.gain.to_bits()),
            center_freq: AtomicU32::new(targets.center_freq.to_bits()),
            pan: AtomicU32::new(targets.pan.to_bits()),
        }
    }
}

impl WindControls {
    /// Publishes new targets.
    pub fn set(&self, targets: WindTargets) {
        self.gain.store(targets.gain.to_bits(), Ordering::Relaxed);
        self.center_freq
            .store(targets.center_freq.to_bits(), Ordering::Relaxed);
        self.pan.store(targets.pan.to_bits(), Ordering::Relaxed);
    }

    /// Latest published targets.
    #[must_use]
    pub fn targets(&self) -> WindTargets {
        WindTargets {
            gain: f32::from_bits(self.gain.load(Ordering::Relaxed)),
            center_freq: f32::from_bits(self.center_freq.load(Ordering::Relaxed)),
            pan: f32::from_bits(self.pan.load(Ordering::Relaxed)),
        }
    }
}

/// Filtered-noise wind generator producing interleaved stereo `f32`.
pub struct WindGen {
    controls: Arc<WindControls>,
    rng: fastrand::Rng,
    current: WindTargets,
    low: f32,
    band: f32,
    right: Option<f32>,
}

impl std::fmt::Debug for WindGen {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindGen")
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

impl WindGen {
    /// A generator following `controls`.
    #[must_use]
    pub fn new(controls: Arc<WindControls>) -> Self {
        Self {
            controls,
            rng: fastrand::Rng::new(),
            current: WindTargets::default(),
            low: 0.0,
            band: 0.0,
            right: None,
        }
    }

    /// Same as [`Self::new`] with a fixed noise seed.
    #[must_use]
    pub fn with_seed(controls: Arc<WindControls>, seed: u64) -> Self {
        Self {
            rng: fastrand::Rng::with_seed(seed),
            ..Self::new(controls)
        }
    }

    /// Parameters the generator is currently producing.
    #[must_use]
    pub const fn current(&self) -> WindTargets {
        self.current
    }

    fn next_frame(&mut self) -> (f32, f32) {
        let target = self.controls.targets();
        self.current.gain += (target.gain - self.current.gain) * SMOOTHING;
        self.current.center_freq += (target.center_freq - self.current.center_freq) * SMOOTHING;
        self.current.pan += (target.pan - self.current.pan) * SMOOTHING;

        let noise = self.rng.f32() * 2.0 - 1.0;
        let f = 2.0 * (PI * self.current.center_freq / WIND_SAMPLE_RATE as f32).sin();
        self.low += f * self.band;
        let high = noise - self.low - FILTER_Q * self.band;
        self.band += f * high;

        let out = (self.band * self.current.gain).clamp(-1.0, 1.0);
        (out * (1.0 - self.current.pan), out * self.current.pan)
    }
}

impl Iterator for WindGen {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if let Some(right) = self.right.take() {
            return Some(right);
        }
        let (left, right) = self.next_frame();
        self.right = Some(right);
        Some(left)
    }
}

impl rodio::Source for WindGen {
    fn current_frame_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        2
    }

    fn sample_rate(&self) -> u32 {
        WIND_SAMPLE_RATE
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gain_saturates() {
        assert!(map_wind_vec_to_gain(Vec3::ZERO).abs() < f32::EPSILON);
        assert!((map_wind_vec_to_gain(Vec3::new(10.0, 0.0, 0.0)) - 0.5).abs() < f32::EPSILON);
        assert!((map_wind_vec_to_gain(Vec3::new(0.0, 100.0, 0.0)) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_pitch_folds() {
        // Blowing straight right or left: no pitch offset.
        assert!(map_wind_vec_to_pitch(Vec3::X).abs() < 1e-6);
        assert!(map_wind_vec_to_pitch(-Vec3::X).abs() < 1e-6);
        // Perpendicular: maximum.
        assert!((map_wind_vec_to_pitch(Vec3::Z) - 0.5).abs() < 1e-6);
        assert!((map_wind_vec_to_pitch(Vec3::ZERO) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_pan_range() {
        assert!(map_wind_vec_to_pan(Vec3::X).abs() < 1e-6);
        assert!((map_wind_vec_to_pan(-Vec3::X) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_frame_conversion() {
        assert_eq!(to_listener_frame(Vec3::new(1.0, 2.0, 3.0)), Vec3::new(-2.0, 3.0, -1.0));
    }

    #[test]
    fn test_targets_from_wind() {
        let calm = WindTargets::from_wind(Vec3::ZERO, 1.0, false);
        assert!(calm.gain.abs() < f32::EPSILON);
        // pitch 1.5 at zero wind: 80 * 1.5^2.5
        assert!((calm.center_freq - 80.0 * 1.5f32.powf(2.5)).abs() < 0.01);

        let gale = WindTargets::from_wind(Vec3::new(30.0, 0.0, 0.0), 0.5, false);
        assert!((gale.gain - 0.5).abs() < f32::EPSILON);

        let wet = WindTargets::from_wind(Vec3::new(30.0, 0.0, 0.0), 1.0, true);
        assert!((wet.center_freq - WIND_UNDERWATER_CENTER_FREQ).abs() < f32::EPSILON);
    }

    #[test]
    fn test_generator_follows_controls() {
        let controls = Arc::new(WindControls::default());
        let mut gen = WindGen::with_seed(controls.clone(), 7);
        assert!(gen.by_ref().take(1000).all(|s| s.abs() < f32::EPSILON));

        controls.set(WindTargets {
            gain: 1.0,
            center_freq: 400.0,
            pan: 0.5,
        });
        let samples: Vec<f32> = gen.by_ref().take(44_100).collect();
        assert!(samples.iter().all(|s| s.abs() <= 1.0));
        assert!(samples.iter().any(|s| s.abs() > 0.0));
        assert!(gen.current().gain > 0.5);
    }
}
