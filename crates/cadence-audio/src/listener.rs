//! Listener state and distance attenuation.

use glam::{DVec3, Vec3};

/// Distance inside which sources play at full volume.
pub const DEFAULT_MIN_DISTANCE: f32 = 2.0;

/// Rolloff multiplier applied while the camera is under water.
pub const UNDERWATER_ROLLOFF_MULTIPLIER: f32 = 5.0;

/// The single listener all positioned sources are heard from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Listener {
    /// Global position.
    pub position: DVec3,
    /// Velocity in world units per second.
    pub velocity: Vec3,
    /// Up vector.
    pub up: Vec3,
    /// Facing vector.
    pub at: Vec3,
    /// Doppler strength.
    pub doppler_factor: f32,
    /// World units to metres.
    pub distance_factor: f32,
    /// Rolloff requested by the caller.
    pub rolloff_factor: f32,
    /// Whether the underwater multiplier is in effect.
    pub underwater: bool,
}

impl Default for Listener {
    fn default() -> Self {
        Self {
            position: DVec3::ZERO,
            velocity: Vec3::ZERO,
            up: Vec3::Z,
            at: Vec3::X,
            doppler_factor: 1.0,
            distance_factor: 1.0,
            rolloff_factor: 1.0,
            underwater: false,
        }
    }
}

impl Listener {
    /// Updates position, velocity and orientation at once.
    pub fn set(&mut self, position: DVec3, velocity: Vec3, up: Vec3, at: Vec3) {
        self.position = position;
        self.velocity = velocity;
        self.up = up;
        self.at = at;
    }

    /// Rolloff actually applied, including the underwater multiplier.
    #[must_use]
    pub fn effective_rolloff(&self) -> f32 {
        if self.underwater {
            self.rolloff_factor * UNDERWATER_ROLLOFF_MULTIPLIER
        } else {
            self.rolloff_factor
        }
    }

    /// Squared distance to `point`, in world units.
    #[must_use]
    pub fn distance_squared(&self, point: DVec3) -> f32 {
        self.position.distance_squared(point) as f32
    }

    /// Inverse-distance attenuation clamped at [`DEFAULT_MIN_DISTANCE`].
    #[must_use]
    pub fn attenuation(&self, point: DVec3) -> f32 {
        let d = self.distance_squared(point).sqrt() * self.distance_factor;
        if d <= DEFAULT_MIN_DISTANCE {
            return 1.0;
        }
        let rolloff = self.effective_rolloff();
        (DEFAULT_MIN_DISTANCE / (DEFAULT_MIN_DISTANCE + rolloff * (d - DEFAULT_MIN_DISTANCE)))
            .clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attenuation_inside_min_distance() {
        let listener = Listener::default();
        assert!((listener.attenuation(DVec3::new(1.0, 1.0, 0.0)) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_attenuation_falls_with_distance() {
        let listener = Listener::default();
        let near = listener.attenuation(DVec3::new(4.0, 0.0, 0.0));
        let far = listener.attenuation(DVec3::new(40.0, 0.0, 0.0));
        assert!((near - 0.5).abs() < 0.001);
        assert!(far < near);
    }

    #[test]
    fn test_underwater_rolloff() {
        let mut listener = Listener {
            rolloff_factor: 2.0,
            ..Listener::default()
        };
        let dry = listener.attenuation(DVec3::new(10.0, 0.0, 0.0));
        listener.underwater = true;
        assert!((listener.effective_rolloff() - 10.0).abs() < f32::EPSILON);
        assert!(listener.attenuation(DVec3::new(10.0, 0.0, 0.0)) < dry);
    }
}
