//! Decoded-sample slots.

use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use cadence_common::{AssetId, DecodeResult};
use tracing::debug;

use crate::backend::BufferBackend;
use crate::wav;

/// Index of a slot in the buffer pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(usize);

impl BufferId {
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

/// One slot of decoded PCM.
#[derive(Debug)]
pub struct AudioBuffer {
    id: BufferId,
    in_use: bool,
    asset: Option<AssetId>,
    last_used: Instant,
    backend: BufferBackend,
}

impl AudioBuffer {
    /// An empty buffer on `backend`.
    #[must_use]
    pub fn new(id: BufferId, backend: BufferBackend) -> Self {
        Self {
            id,
            in_use: false,
            asset: None,
            last_used: Instant::now(),
            backend,
        }
    }

    /// Pool slot.
    #[must_use]
    pub const fn id(&self) -> BufferId {
        self.id
    }

    /// Loads a PCM container from disk.
    pub fn load_wav(&mut self, path: &Path) -> DecodeResult<()> {
        let bytes = fs::read(path)?;
        self.load_wav_bytes(&bytes)
    }

    /// Loads a PCM container already in memory.
    pub fn load_wav_bytes(&mut self, bytes: &[u8]) -> DecodeResult<()> {
        let pcm = wav::read_pcm(bytes)?;
        debug!(
            "Buffer {} loaded {} frames at {} Hz",
            self.id.index(),
            pcm.frames(),
            pcm.sample_rate
        );
        self.backend.upload(pcm);
        self.last_used = Instant::now();
        Ok(())
    }

    /// Length in sample frames.
    #[must_use]
    pub fn length(&self) -> u32 {
        self.backend.frames()
    }

    /// Playback length.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.backend.duration()
    }

    /// Whether samples are loaded.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.backend.is_loaded()
    }

    /// Marks the buffer used this frame.
    pub fn touch(&mut self, now: Instant) {
        self.last_used = now;
        self.in_use = true;
    }

    /// Whether a channel touched this buffer since the last reset.
    #[must_use]
    pub const fn in_use(&self) -> bool {
        self.in_use
    }

    /// Sets the in-use flag.
    pub fn set_in_use(&mut self, in_use: bool) {
        self.in_use = in_use;
    }

    /// Asset whose samples this buffer holds.
    #[must_use]
    pub const fn asset(&self) -> Option<AssetId> {
        self.asset
    }

    /// Records which asset the samples belong to.
    pub fn set_asset(&mut self, asset: Option<AssetId>) {
        self.asset = asset;
    }

    /// Last time a channel used this buffer.
    #[must_use]
    pub const fn last_used(&self) -> Instant {
        self.last_used
    }

    /// Time since last use.
    #[must_use]
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_used)
    }

    /// Device half.
    #[must_use]
    pub const fn backend(&self) -> &BufferBackend {
        &self.backend
    }

    /// Releases samples and forgets the asset.
    pub fn cleanup(&mut self) {
        self.backend.release();
        self.asset = None;
        self.in_use = false;
    }
}
