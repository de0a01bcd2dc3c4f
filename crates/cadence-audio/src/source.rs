//! Logical sounds.
//!
//! An [`AudioSource`] is "a sound that should be playing". It knows what it
//! wants to play and where, but not which channel or buffer it ends up on;
//! the engine decides that each frame from the source's priority.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use cadence_common::{AssetId, OwnerId, SourceId};
use glam::{DVec3, Vec3};

use crate::channel::ChannelId;
use crate::gain::AudioCategory;
use crate::listener::Listener;

/// Priority of sounds that ignore distance.
pub const UNPOSITIONED_PRIORITY: f32 = 1.0;

/// How long a source may live before it is collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceTimeouts {
    /// A source still playing past this age is collected anyway.
    pub max_age: Duration,
    /// A source that never got to play is collected after this.
    pub unplayed: Duration,
}

impl Default for SourceTimeouts {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(60),
            unplayed: Duration::from_secs(15),
        }
    }
}

/// One request to play a sound.
#[derive(Debug, Clone)]
pub struct AudioSource {
    id: SourceId,
    owner: OwnerId,
    priority: f32,
    gain: f32,
    category: AudioCategory,
    ambient: bool,
    looping: bool,
    sync_master: bool,
    sync_slave: bool,
    queue_sounds: bool,
    played_once: bool,
    position: DVec3,
    velocity: Vec3,
    channel: Option<ChannelId>,
    current: Option<AssetId>,
    queued: Option<AssetId>,
    preloads: BTreeSet<AssetId>,
    age_start: Instant,
    serial: u64,
}

impl AudioSource {
    /// A positionless, non-looping source with nothing attached.
    #[must_use]
    pub fn new(id: SourceId, owner: OwnerId, gain: f32, category: AudioCategory) -> Self {
        Self {
            id,
            owner,
            priority: 0.0,
            gain: gain.clamp(0.0, 1.0),
            category,
            ambient: false,
            looping: false,
            sync_master: false,
            sync_slave: false,
            queue_sounds: false,
            played_once: false,
            position: DVec3::ZERO,
            velocity: Vec3::ZERO,
            channel: None,
            current: None,
            queued: None,
            preloads: BTreeSet::new(),
            age_start: Instant::now(),
            serial: 0,
        }
    }

    /// Builder: ambient (no distance falloff).
    #[must_use]
    pub const fn with_ambient(mut self, ambient: bool) -> Self {
        self.ambient = ambient;
        self
    }

    /// Builder: looping.
    #[must_use]
    pub const fn with_looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    /// Builder: global position.
    #[must_use]
    pub const fn with_position(mut self, position: DVec3) -> Self {
        self.position = position;
        self
    }

    /// Builder: queue additional sounds instead of replacing.
    #[must_use]
    pub const fn with_queue_sounds(mut self, queue: bool) -> Self {
        self.queue_sounds = queue;
        self
    }

    /// Builder: loop sync master.
    #[must_use]
    pub const fn with_sync_master(mut self, master: bool) -> Self {
        self.sync_master = master;
        self
    }

    /// Builder: loop sync slave.
    #[must_use]
    pub const fn with_sync_slave(mut self, slave: bool) -> Self {
        self.sync_slave = slave;
        self
    }

    /// Source identity.
    #[must_use]
    pub const fn id(&self) -> SourceId {
        self.id
    }

    /// Entity that requested the sound.
    #[must_use]
    pub const fn owner(&self) -> OwnerId {
        self.owner
    }

    /// Priority from the last [`Self::update_priority`].
    #[must_use]
    pub const fn priority(&self) -> f32 {
        self.priority
    }

    /// Base gain in `[0, 1]`.
    #[must_use]
    pub const fn gain(&self) -> f32 {
        self.gain
    }

    /// Sets the base gain, clamped to `[0, 1]`.
    pub fn set_gain(&mut self, gain: f32) {
        self.gain = gain.clamp(0.0, 1.0);
    }

    /// Category for secondary gain.
    #[must_use]
    pub const fn category(&self) -> AudioCategory {
        self.category
    }

    /// Whether distance is ignored.
    #[must_use]
    pub const fn is_ambient(&self) -> bool {
        self.ambient
    }

    /// Sets ambient.
    pub fn set_ambient(&mut self, ambient: bool) {
        self.ambient = ambient;
    }

    /// Whether the sound loops.
    #[must_use]
    pub const fn is_looping(&self) -> bool {
        self.looping
    }

    /// Sets looping.
    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    /// Whether this is a loop sync master.
    #[must_use]
    pub const fn is_sync_master(&self) -> bool {
        self.sync_master
    }

    /// Sets sync master.
    pub fn set_sync_master(&mut self, master: bool) {
        self.sync_master = master;
    }

    /// Whether this is a loop sync slave.
    #[must_use]
    pub const fn is_sync_slave(&self) -> bool {
        self.sync_slave
    }

    /// Sets sync slave.
    pub fn set_sync_slave(&mut self, slave: bool) {
        self.sync_slave = slave;
    }

    /// Whether new sounds queue behind the current one.
    #[must_use]
    pub const fn queue_sounds(&self) -> bool {
        self.queue_sounds
    }

    /// Sets sound queueing.
    pub fn set_queue_sounds(&mut self, queue: bool) {
        self.queue_sounds = queue;
    }

    /// Whether playback started at least once.
    #[must_use]
    pub const fn played_once(&self) -> bool {
        self.played_once
    }

    pub(crate) fn set_played_once(&mut self, played: bool) {
        self.played_once = played;
    }

    /// Global position.
    #[must_use]
    pub const fn position(&self) -> DVec3 {
        self.position
    }

    /// Moves the source.
    pub fn set_position(&mut self, position: DVec3) {
        self.position = position;
    }

    /// Velocity.
    #[must_use]
    pub const fn velocity(&self) -> Vec3 {
        self.velocity
    }

    /// Sets velocity.
    pub fn set_velocity(&mut self, velocity: Vec3) {
        self.velocity = velocity;
    }

    /// Channel this source is bound to.
    #[must_use]
    pub const fn channel(&self) -> Option<ChannelId> {
        self.channel
    }

    pub(crate) fn set_channel(&mut self, channel: Option<ChannelId>) {
        self.channel = channel;
    }

    /// Asset being played.
    #[must_use]
    pub const fn current(&self) -> Option<AssetId> {
        self.current
    }

    pub(crate) fn set_current(&mut self, asset: Option<AssetId>) {
        self.current = asset;
    }

    /// Asset to play once the current one ends.
    #[must_use]
    pub const fn queued(&self) -> Option<AssetId> {
        self.queued
    }

    pub(crate) fn set_queued(&mut self, asset: Option<AssetId>) {
        self.queued = asset;
    }

    /// Moves the queued asset to current. Returns the new current asset.
    pub(crate) fn promote_queued(&mut self, now: Instant) -> Option<AssetId> {
        self.current = self.queued.take();
        self.age_start = now;
        self.current
    }

    /// Assets this source wants decoded ahead of time.
    pub fn preloads(&self) -> impl Iterator<Item = AssetId> + '_ {
        self.preloads.iter().copied()
    }

    /// Adds an asset to decode ahead of time. Through the engine
    /// (`add_audio_data` without `set_current`) this also queues the decode.
    pub fn preload(&mut self, asset: AssetId) {
        self.preloads.insert(asset);
    }

    /// Whether any preload is still waiting on a decode. `is_settled` is
    /// true for assets that are decoded or can never be.
    pub fn has_pending_preloads(&self, is_settled: impl Fn(AssetId) -> bool) -> bool {
        self.preloads.iter().any(|asset| !is_settled(*asset))
    }

    /// Creation order; larger is newer.
    #[must_use]
    pub const fn serial(&self) -> u64 {
        self.serial
    }

    pub(crate) fn set_serial(&mut self, serial: u64) {
        self.serial = serial;
    }

    /// Restarts the age timer.
    pub fn reset_age(&mut self, now: Instant) {
        self.age_start = now;
    }

    /// Time since creation or the last (re)play.
    #[must_use]
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.age_start)
    }

    /// Ambient and interface sounds ignore distance.
    #[must_use]
    pub fn ignores_distance(&self) -> bool {
        self.ambient || self.category == AudioCategory::Ui
    }

    /// Recomputes priority: gain over squared distance (at least one unit).
    pub fn update_priority(&mut self, listener: &Listener) {
        self.priority = if self.ignores_distance() {
            UNPOSITIONED_PRIORITY
        } else {
            let dist_squared = listener.distance_squared(self.position).max(1.0);
            self.gain / dist_squared
        };
    }

    /// Whether the source can be collected.
    ///
    /// `channel_playing` is `None` without a channel, otherwise whether the
    /// channel is audible.
    #[must_use]
    pub fn is_done(
        &self,
        channel_playing: Option<bool>,
        pending_preloads: bool,
        timeouts: &SourceTimeouts,
        now: Instant,
    ) -> bool {
        if self.looping || pending_preloads || self.queued.is_some() {
            return false;
        }
        let age = self.age(now);
        let expired = age > timeouts.unplayed || self.played_once;
        match channel_playing {
            Some(true) => age > timeouts.max_age,
            Some(false) | None => expired,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(gain: f32) -> AudioSource {
        AudioSource::new(SourceId::generate(), OwnerId::NULL, gain, AudioCategory::Sfx)
    }

    #[test]
    fn test_gain_clamped() {
        let mut s = source(2.0);
        assert!((s.gain() - 1.0).abs() < f32::EPSILON);
        s.set_gain(-0.5);
        assert!(s.gain().abs() < f32::EPSILON);
    }

    #[test]
    fn test_priority_falls_with_distance() {
        let listener = Listener::default();
        let mut near = source(0.8).with_position(DVec3::new(0.5, 0.0, 0.0));
        let mut far = source(0.8).with_position(DVec3::new(10.0, 0.0, 0.0));
        near.update_priority(&listener);
        far.update_priority(&listener);
        // Inside one unit the distance term is clamped.
        assert!((near.priority() - 0.8).abs() < f32::EPSILON);
        assert!((far.priority() - 0.008).abs() < 1e-6);
    }

    #[test]
    fn test_unpositioned_priority() {
        let listener = Listener::default();
        let mut ambient = source(0.1)
            .with_ambient(true)
            .with_position(DVec3::new(1000.0, 0.0, 0.0));
        ambient.update_priority(&listener);
        assert!((ambient.priority() - UNPOSITIONED_PRIORITY).abs() < f32::EPSILON);

        let mut ui = AudioSource::new(SourceId::generate(), OwnerId::NULL, 0.1, AudioCategory::Ui);
        ui.set_position(DVec3::new(500.0, 0.0, 0.0));
        ui.update_priority(&listener);
        assert!((ui.priority() - UNPOSITIONED_PRIORITY).abs() < f32::EPSILON);
    }

    #[test]
    fn test_done_rules() {
        let timeouts = SourceTimeouts::default();
        let now = Instant::now();
        let later = now + Duration::from_secs(20);
        let much_later = now + Duration::from_secs(90);
        let mut s = source(1.0);
        s.reset_age(now);

        // Fresh and unplayed: kept around.
        assert!(!s.is_done(None, false, &timeouts, now));
        // Unplayed timeout.
        assert!(s.is_done(None, false, &timeouts, later));
        // Still playing: only the max age collects it.
        assert!(!s.is_done(Some(true), false, &timeouts, later));
        assert!(s.is_done(Some(true), false, &timeouts, much_later));

        s.set_played_once(true);
        assert!(s.is_done(Some(false), false, &timeouts, now));
        assert!(s.is_done(None, false, &timeouts, now));
    }

    #[test]
    fn test_done_blocked() {
        let timeouts = SourceTimeouts::default();
        let later = Instant::now() + Duration::from_secs(600);
        let mut s = source(1.0);
        s.set_played_once(true);

        assert!(s.is_done(None, false, &timeouts, later));
        assert!(!s.is_done(None, true, &timeouts, later));

        s.set_queued(Some(AssetId::generate()));
        assert!(!s.is_done(None, false, &timeouts, later));
        s.set_queued(None);

        s.set_looping(true);
        assert!(!s.is_done(None, false, &timeouts, later));
    }

    #[test]
    fn test_pending_preloads() {
        let mut s = source(1.0);
        let a = AssetId::generate();
        let b = AssetId::generate();
        assert!(!s.has_pending_preloads(|_| false));
        s.preload(a);
        s.preload(b);
        assert!(s.has_pending_preloads(|id| id == a));
        assert!(!s.has_pending_preloads(|_| true));
        assert_eq!(s.preloads().count(), 2);
    }

    #[test]
    fn test_promote_queued() {
        let now = Instant::now();
        let mut s = source(1.0);
        let next = AssetId::generate();
        s.set_current(Some(AssetId::generate()));
        s.set_queued(Some(next));
        assert_eq!(s.promote_queued(now), Some(next));
        assert_eq!(s.current(), Some(next));
        assert_eq!(s.queued(), None);
    }
}
