//! Rodio output backend.
//!
//! Each channel owns its own [`Sink`], created fresh for every playback so a
//! stopped voice never carries queued samples into the next one. Buffers keep
//! their decoded samples behind an `Arc` so several channels can play the
//! same asset.

use std::sync::Arc;
use std::time::Duration;

use cadence_common::{AudioError, AudioResult};
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamHandle, Sink, Source, StreamError};
use tracing::{debug, info, warn};

use super::PlaybackClock;
use crate::wav::PcmData;
use crate::wind::{WindControls, WindGen};

/// Wraps rodio's output stream.
pub struct RodioDevice {
    /// The output stream (must be kept alive).
    _stream: OutputStream,
    /// Handle for creating sinks.
    handle: OutputStreamHandle,
    internal_gain: f32,
    wind: Option<Sink>,
}

impl std::fmt::Debug for RodioDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RodioDevice")
            .field("internal_gain", &self.internal_gain)
            .field("wind", &self.wind.is_some())
            .finish_non_exhaustive()
    }
}

impl RodioDevice {
    /// Opens the default output device.
    pub fn new() -> AudioResult<Self> {
        let (stream, handle) = OutputStream::try_default().map_err(|e| match e {
            StreamError::NoDevice => AudioError::NoDevice,
            e => AudioError::DeviceInitFailed(e.to_string()),
        })?;

        info!("Audio device initialized");

        Ok(Self {
            _stream: stream,
            handle,
            internal_gain: 1.0,
            wind: None,
        })
    }

    pub(crate) fn create_channel(&self) -> RodioChannel {
        RodioChannel {
            handle: self.handle.clone(),
            sink: None,
            pcm: None,
            clock: PlaybackClock::default(),
            looping: false,
            volume: 1.0,
        }
    }

    pub(crate) fn set_internal_gain(&mut self, gain: f32) {
        self.internal_gain = gain;
        if let Some(wind) = &self.wind {
            wind.set_volume(gain);
        }
    }

    pub(crate) const fn internal_gain(&self) -> f32 {
        self.internal_gain
    }

    pub(crate) fn init_wind(&mut self, controls: Arc<WindControls>) -> bool {
        if self.wind.is_some() {
            return true;
        }
        match new_sink(&self.handle) {
            Ok(sink) => {
                sink.append(WindGen::new(controls));
                sink.set_volume(self.internal_gain);
                self.wind = Some(sink);
                debug!("Wind generator started");
                true
            },
            Err(e) => {
                warn!("Wind disabled: {e}");
                false
            },
        }
    }

    pub(crate) fn cleanup_wind(&mut self) {
        if let Some(sink) = self.wind.take() {
            sink.stop();
            debug!("Wind generator stopped");
        }
    }
}

fn new_sink(handle: &OutputStreamHandle) -> AudioResult<Sink> {
    Sink::try_new(handle).map_err(|e| AudioError::SinkCreationFailed(e.to_string()))
}

/// One rodio voice.
pub struct RodioChannel {
    handle: OutputStreamHandle,
    sink: Option<Sink>,
    pcm: Option<Arc<PcmData>>,
    clock: PlaybackClock,
    looping: bool,
    volume: f32,
}

impl std::fmt::Debug for RodioChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RodioChannel")
            .field("bound", &self.pcm.is_some())
            .field("looping", &self.looping)
            .field("volume", &self.volume)
            .finish_non_exhaustive()
    }
}

impl RodioChannel {
    pub(crate) fn bind(&mut self, buffer: &RodioBuffer, looping: bool) -> bool {
        let Some(pcm) = buffer.pcm.clone() else {
            return false;
        };
        self.stop();
        self.clock.bind(pcm.duration(), looping);
        self.pcm = Some(pcm);
        self.looping = looping;
        true
    }

    pub(crate) fn unbind(&mut self) {
        self.stop();
        self.pcm = None;
    }

    pub(crate) fn play_from(&mut self, offset: Duration) {
        let Some(pcm) = self.pcm.clone() else {
            warn!("Play requested on a channel with no samples");
            return;
        };
        self.stop();

        let sink = match new_sink(&self.handle) {
            Ok(sink) => sink,
            Err(e) => {
                warn!("{e}");
                return;
            },
        };
        let samples = SamplesBuffer::new(pcm.channels, pcm.sample_rate, pcm.samples.clone());
        if self.looping {
            sink.append(samples.repeat_infinite().skip_duration(offset));
        } else {
            sink.append(samples.skip_duration(offset));
        }
        sink.set_volume(self.volume);
        sink.play();

        self.sink = Some(sink);
        self.clock.start_at(offset);
    }

    fn stop(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.stop();
        }
        self.clock.stop();
    }

    pub(crate) fn is_bound(&self) -> bool {
        self.pcm.is_some()
    }

    pub(crate) fn is_playing(&self) -> bool {
        self.sink
            .as_ref()
            .is_some_and(|sink| !sink.empty() && !sink.is_paused())
    }

    pub(crate) fn position(&self) -> Option<Duration> {
        if self.is_playing() {
            self.clock.position()
        } else {
            None
        }
    }

    pub(crate) fn set_looping(&mut self, looping: bool) {
        // Takes effect on the next play; rodio cannot re-loop a queued source.
        self.looping = looping;
        self.clock.set_looping(looping);
    }

    pub(crate) fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
        if let Some(sink) = &self.sink {
            sink.set_volume(volume);
        }
    }
}

/// Decoded samples shared with rodio voices.
#[derive(Debug, Default)]
pub struct RodioBuffer {
    pcm: Option<Arc<PcmData>>,
}

impl RodioBuffer {
    pub(crate) fn upload(&mut self, pcm: PcmData) {
        self.pcm = Some(Arc::new(pcm));
    }

    pub(crate) fn release(&mut self) {
        self.pcm = None;
    }

    pub(crate) fn is_loaded(&self) -> bool {
        self.pcm.is_some()
    }

    pub(crate) fn frames(&self) -> u32 {
        self.pcm.as_ref().map_or(0, |pcm| pcm.frames())
    }

    pub(crate) fn duration(&self) -> Duration {
        self.pcm.as_ref().map_or(Duration::ZERO, |pcm| pcm.duration())
    }
}
