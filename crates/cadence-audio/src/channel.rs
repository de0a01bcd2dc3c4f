//! Playback slots.
//!
//! A channel is one voice on the device. It serves at most one source at a
//! time and reads from at most one buffer. The pool, and every reassignment
//! of it, belongs to the engine; a channel only keeps its own bookkeeping in
//! step with whatever source it was handed.

use std::time::{Duration, Instant};

use cadence_common::SourceId;
use tracing::warn;

use crate::backend::{ChannelBackend, HeadlessChannel};
use crate::buffer::{AudioBuffer, BufferId};
use crate::listener::Listener;
use crate::source::AudioSource;

/// Index of a slot in the channel pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(usize);

impl ChannelId {
    /// Wraps a pool index.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Pool index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// One voice.
#[derive(Debug)]
pub struct AudioChannel {
    id: ChannelId,
    source: Option<SourceId>,
    buffer: Option<BufferId>,
    secondary_gain: f32,
    waiting: bool,
    looped_this_frame: bool,
    last_position: Option<Duration>,
    applied_volume: Option<f32>,
    backend: ChannelBackend,
}

impl AudioChannel {
    /// An idle channel.
    #[must_use]
    pub const fn new(id: ChannelId, backend: ChannelBackend) -> Self {
        Self {
            id,
            source: None,
            buffer: None,
            secondary_gain: 1.0,
            waiting: false,
            looped_this_frame: false,
            last_position: None,
            applied_volume: None,
            backend,
        }
    }

    /// Pool slot.
    #[must_use]
    pub const fn id(&self) -> ChannelId {
        self.id
    }

    /// Source being served.
    #[must_use]
    pub const fn source(&self) -> Option<SourceId> {
        self.source
    }

    /// Buffer being read.
    #[must_use]
    pub const fn buffer(&self) -> Option<BufferId> {
        self.buffer
    }

    /// Category gain captured at the last buffer update.
    #[must_use]
    pub const fn secondary_gain(&self) -> f32 {
        self.secondary_gain
    }

    /// Waiting for its sync master to loop.
    #[must_use]
    pub const fn is_waiting(&self) -> bool {
        self.waiting
    }

    pub(crate) fn set_waiting(&mut self, waiting: bool) {
        self.waiting = waiting;
    }

    /// Whether playback wrapped around during this frame.
    #[must_use]
    pub const fn looped_this_frame(&self) -> bool {
        self.looped_this_frame
    }

    pub(crate) fn clear_looped(&mut self) {
        self.looped_this_frame = false;
    }

    /// Assigns or clears the source. Clearing stops playback.
    pub(crate) fn set_source(&mut self, source: Option<SourceId>) {
        if source.is_none() {
            self.cleanup();
            self.waiting = false;
        }
        self.source = source;
    }

    /// Rebinds when the source switched buffers. Returns true if a new
    /// buffer was bound.
    pub fn update_buffer(
        &mut self,
        source: &AudioSource,
        buffer: Option<&mut AudioBuffer>,
        category_gain: f32,
        now: Instant,
    ) -> bool {
        if self.source.is_none() {
            return false;
        }
        self.secondary_gain = category_gain;

        let wanted = buffer.as_ref().map(|b| b.id());
        if wanted == self.buffer {
            if let Some(buffer) = buffer {
                buffer.touch(now);
                self.backend.set_looping(source.is_looping());
            }
            return false;
        }

        self.cleanup();
        let Some(buffer) = buffer else {
            return false;
        };
        buffer.touch(now);
        if !self.backend.bind(buffer.backend(), source.is_looping()) {
            warn!("Channel {} could not bind buffer {}", self.id.index(), buffer.id().index());
            return false;
        }
        self.buffer = wanted;
        true
    }

    /// Starts the bound buffer from the top.
    pub fn play(&mut self, source: &mut AudioSource) {
        if !self.backend.is_bound() {
            warn!("Playing channel {} without a buffer", self.id.index());
            return;
        }
        self.backend.play_from(Duration::ZERO);
        self.last_position = None;
        self.waiting = false;
        source.set_played_once(true);
    }

    /// Starts at the sync master's position, wrapped to this buffer's
    /// length.
    pub fn play_synced(
        &mut self,
        master_position: Duration,
        buffer_length: Duration,
        source: &mut AudioSource,
    ) {
        if !self.backend.is_bound() {
            return;
        }
        let offset = if buffer_length.is_zero() {
            Duration::ZERO
        } else {
            let wrapped = master_position.as_nanos() % buffer_length.as_nanos();
            Duration::from_nanos(wrapped as u64)
        };
        self.backend.play_from(offset);
        self.last_position = Some(offset);
        self.waiting = false;
        source.set_played_once(true);
    }

    /// Pushes the effective gain for the source's position.
    ///
    /// The device is only touched when the gain actually changes.
    pub fn update_3d_position(&mut self, source: &AudioSource, listener: &Listener, internal_gain: f32) {
        if !self.backend.is_bound() {
            return;
        }
        let attenuation = if source.ignores_distance() {
            1.0
        } else {
            listener.attenuation(source.position())
        };
        let volume = (internal_gain * self.secondary_gain * source.gain() * attenuation).clamp(0.0, 1.0);
        if self
            .applied_volume
            .is_some_and(|applied| (applied - volume).abs() <= f32::EPSILON)
        {
            return;
        }
        self.backend.set_volume(volume);
        self.applied_volume = Some(volume);
    }

    /// Flags a loop when the play position moved backwards.
    pub fn update_loop(&mut self) {
        if !self.backend.is_bound() {
            return;
        }
        let position = self.backend.position();
        if let (Some(last), Some(current)) = (self.last_position, position) {
            if current < last {
                self.looped_this_frame = true;
            }
        }
        self.last_position = position;
    }

    /// Whether the voice is audible.
    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.backend.is_playing()
    }

    /// Offset into the bound buffer.
    #[must_use]
    pub fn position(&self) -> Option<Duration> {
        self.backend.position()
    }

    /// Stops playback and drops the buffer binding.
    pub fn cleanup(&mut self) {
        self.backend.unbind();
        self.buffer = None;
        self.last_position = None;
        self.applied_volume = None;
    }

    /// Device half.
    #[must_use]
    pub const fn backend(&self) -> &ChannelBackend {
        &self.backend
    }

    /// The simulated voice, for inspection.
    #[must_use]
    pub const fn as_headless(&self) -> Option<&HeadlessChannel> {
        self.backend.as_headless()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{AudioBackend, BackendKind};
    use crate::gain::AudioCategory;
    use crate::wav;
    use cadence_common::OwnerId;
    use glam::DVec3;

    fn setup(seconds: u32) -> (AudioChannel, AudioBuffer, AudioSource) {
        let backend = AudioBackend::open(BackendKind::Headless).expect("headless");
        let channel = AudioChannel::new(ChannelId::new(0), backend.create_channel().expect("channel"));
        let mut buffer = AudioBuffer::new(BufferId::new(0), backend.create_buffer());
        let samples = vec![0i16; 8000 * seconds as usize];
        buffer
            .load_wav_bytes(&wav::encode_pcm(&samples, 1, 8000))
            .expect("load");
        let source = AudioSource::new(SourceId::generate(), OwnerId::NULL, 0.5, AudioCategory::Sfx);
        (channel, buffer, source)
    }

    #[test]
    fn test_update_buffer_needs_source() {
        let (mut channel, mut buffer, source) = setup(1);
        assert!(!channel.update_buffer(&source, Some(&mut buffer), 1.0, Instant::now()));
        assert_eq!(channel.buffer(), None);
    }

    #[test]
    fn test_update_buffer_binds_once() {
        let (mut channel, mut buffer, mut source) = setup(1);
        channel.set_source(Some(source.id()));
        let now = Instant::now();
        assert!(channel.update_buffer(&source, Some(&mut buffer), 0.8, now));
        assert_eq!(channel.buffer(), Some(buffer.id()));
        assert!(buffer.in_use());
        assert!((channel.secondary_gain() - 0.8).abs() < f32::EPSILON);

        // Same buffer: nothing to rebind.
        assert!(!channel.update_buffer(&source, Some(&mut buffer), 0.8, now));

        channel.play(&mut source);
        assert!(channel.is_playing());
        assert!(source.played_once());

        // Source lost its buffer: channel goes quiet.
        assert!(!channel.update_buffer(&source, None, 0.8, now));
        assert_eq!(channel.buffer(), None);
        assert!(!channel.is_playing());
    }

    #[test]
    fn test_volume_pushed_on_change_only() {
        let (mut channel, mut buffer, source) = setup(1);
        let listener = Listener::default();
        channel.set_source(Some(source.id()));
        channel.update_buffer(&source, Some(&mut buffer), 0.5, Instant::now());

        channel.update_3d_position(&source, &listener, 1.0);
        channel.update_3d_position(&source, &listener, 1.0);
        let voice = channel.as_headless().expect("headless");
        assert_eq!(voice.volume_updates(), 1);
        assert!((voice.volume() - 0.25).abs() < f32::EPSILON);

        channel.update_3d_position(&source, &listener, 0.0);
        let voice = channel.as_headless().expect("headless");
        assert_eq!(voice.volume_updates(), 2);
        assert!(voice.volume().abs() < f32::EPSILON);
    }

    #[test]
    fn test_distance_attenuates() {
        let (mut channel, mut buffer, mut source) = setup(1);
        let listener = Listener::default();
        source.set_position(DVec3::new(4.0, 0.0, 0.0));
        channel.set_source(Some(source.id()));
        channel.update_buffer(&source, Some(&mut buffer), 1.0, Instant::now());
        channel.update_3d_position(&source, &listener, 1.0);
        let voice = channel.as_headless().expect("headless");
        assert!((voice.volume() - 0.25).abs() < 0.001);
    }

    #[test]
    fn test_clearing_source_stops() {
        let (mut channel, mut buffer, mut source) = setup(1);
        channel.set_source(Some(source.id()));
        channel.update_buffer(&source, Some(&mut buffer), 1.0, Instant::now());
        channel.set_waiting(true);
        channel.play(&mut source);
        assert!(!channel.is_waiting());

        channel.set_waiting(true);
        channel.set_source(None);
        assert_eq!(channel.source(), None);
        assert_eq!(channel.buffer(), None);
        assert!(!channel.is_waiting());
        assert!(!channel.is_playing());
    }

    #[test]
    fn test_play_synced_wraps_offset() {
        let (mut channel, mut buffer, mut source) = setup(1);
        source.set_looping(true);
        channel.set_source(Some(source.id()));
        channel.update_buffer(&source, Some(&mut buffer), 1.0, Instant::now());
        channel.set_waiting(true);

        channel.play_synced(Duration::from_millis(2500), buffer.duration(), &mut source);
        assert!(channel.is_playing());
        assert!(!channel.is_waiting());
        let position = channel.position().expect("playing");
        assert!(position >= Duration::from_millis(500));
        assert!(position < Duration::from_millis(1000));
    }

    #[test]
    fn test_update_loop_detects_wrap() {
        let (mut channel, mut buffer, mut source) = setup(1);
        source.set_looping(true);
        channel.set_source(Some(source.id()));
        channel.update_buffer(&source, Some(&mut buffer), 1.0, Instant::now());
        channel.play(&mut source);

        channel.update_loop();
        assert!(!channel.looped_this_frame());
        // Pretend the last sample was near the end of the buffer.
        channel.last_position = Some(Duration::from_millis(999));
        channel.update_loop();
        assert!(channel.looped_this_frame());
        channel.clear_looped();
        assert!(!channel.looped_this_frame());
    }
}
