//! Incremental decode of compressed assets into PCM containers.
//!
//! The [`DecodeManager`] owns a FIFO of asset ids and at most one active
//! [`DecodeState`]. Each frame the engine hands it a time budget; the state
//! decodes fixed-size sections until the stream ends or the budget runs out,
//! then finalises the container and hands the write to the background I/O
//! thread.
//!
//! ```text
//! Queued ─▶ Initializing ─▶ Decoding ⟲ ─▶ Finalizing ─▶ Writing ─▶ Done
//!                │              │              │            │
//!                └──────────────┴──────────────┴────────────┴─▶ Invalid
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cadence_common::{AssetId, DecodeError, DecodeResult};
use tracing::{debug, info, warn};

use crate::codec::{PcmStream, StreamCodec};
use crate::file_io::{IoHandle, IoThread, WriteStatus};
use crate::store::{AssetKind, AssetStore, DecodedCache};
use crate::wav;

/// Bytes of PCM decoded per section.
pub const DECODE_SECTION_BYTES: usize = 4096;

/// Ceiling on the output buffer reserved up front; larger outputs grow on
/// demand.
pub const MAX_PREALLOC_BYTES: usize = 64 << 20;

/// Largest PCM-to-compressed ratio trusted from a stream's declared length.
const MAX_EXPANSION: usize = 16;

/// Where a decode is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStage {
    /// Created, stream not yet opened.
    Queued,
    /// Opening the compressed stream.
    Initializing,
    /// Decoding sections.
    Decoding,
    /// End of stream reached; container not yet patched.
    Finalizing,
    /// Container handed to the I/O thread.
    Writing,
    /// Container persisted.
    Done,
    /// Failed; the source bytes are bad.
    Invalid,
}

/// Result of a finished decode, reported back to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// A playable container now exists.
    Decoded(AssetId),
    /// The asset can never be decoded.
    Invalid(AssetId),
}

/// One in-flight decode.
pub struct DecodeState {
    asset: AssetId,
    stage: DecodeStage,
    valid: bool,
    done: bool,
    wav: Vec<u8>,
    stream: Option<Box<dyn PcmStream>>,
    io_handle: IoHandle,
    write_status: Arc<WriteStatus>,
    expected_bytes: u64,
}

impl std::fmt::Debug for DecodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodeState")
            .field("asset", &self.asset)
            .field("stage", &self.stage)
            .field("valid", &self.valid)
            .field("done", &self.done)
            .field("bytes", &self.wav.len())
            .field("io_handle", &self.io_handle)
            .finish_non_exhaustive()
    }
}

impl DecodeState {
    /// A fresh state for `asset`.
    #[must_use]
    pub fn new(asset: AssetId) -> Self {
        Self {
            asset,
            stage: DecodeStage::Queued,
            valid: false,
            done: false,
            wav: Vec::new(),
            stream: None,
            io_handle: IoHandle::NULL,
            write_status: Arc::new(WriteStatus::pending()),
            expected_bytes: 0,
        }
    }

    /// The asset being decoded.
    #[must_use]
    pub const fn asset(&self) -> AssetId {
        self.asset
    }

    /// Current stage.
    #[must_use]
    pub const fn stage(&self) -> DecodeStage {
        self.stage
    }

    /// No more decoding work remains (successfully or not).
    #[must_use]
    pub const fn is_done(&self) -> bool {
        self.done
    }

    /// Whether the decode has not failed.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.valid
    }

    fn fail(&mut self) {
        self.valid = false;
        self.done = true;
        self.stage = DecodeStage::Invalid;
        self.stream = None;
    }

    /// Opens the compressed stream and seeds the container header.
    pub fn init_decode(&mut self, store: &dyn AssetStore, codec: &dyn StreamCodec) -> DecodeResult<()> {
        self.stage = DecodeStage::Initializing;
        match self.open(store, codec) {
            Ok(()) => {
                self.stage = DecodeStage::Decoding;
                Ok(())
            },
            Err(e) => {
                self.fail();
                Err(e)
            },
        }
    }

    fn open(&mut self, store: &dyn AssetStore, codec: &dyn StreamCodec) -> DecodeResult<()> {
        let file = store
            .open(self.asset, AssetKind::Sound)
            .ok_or(DecodeError::MissingSource(self.asset))?;
        if file.is_empty() {
            return Err(DecodeError::EmptySource(self.asset));
        }
        let source_size = file.size();
        let stream = codec.open(file)?;
        let spec = stream.spec();

        let reserve = prealloc_bytes(spec.size_hint(), source_size);
        self.wav = Vec::with_capacity(wav::WAV_HEADER_SIZE + reserve);
        wav::write_header(&mut self.wav, spec.channels, spec.sample_rate);
        self.stream = Some(stream);

        debug!(
            "Decoding {}: {} ch @ {} Hz, {source_size} compressed bytes",
            self.asset, spec.channels, spec.sample_rate
        );
        Ok(())
    }

    /// Decodes one section. Returns true once there is nothing left to decode.
    pub fn decode_section(&mut self) -> bool {
        if self.done {
            return true;
        }
        let Some(stream) = self.stream.as_mut() else {
            warn!("No stream open while decoding {}", self.asset);
            self.fail();
            return true;
        };

        let mut chunk = [0u8; DECODE_SECTION_BYTES];
        let mut filled = 0;
        let mut eof = false;
        while filled < DECODE_SECTION_BYTES {
            match stream.read(&mut chunk[filled..]) {
                Ok(0) => {
                    eof = true;
                    break;
                },
                Ok(n) => filled += n,
                Err(e) => {
                    warn!("Decode of {} failed: {e}", self.asset);
                    self.fail();
                    return true;
                },
            }
        }
        self.wav.extend_from_slice(&chunk[..filled]);

        if eof {
            self.done = true;
            self.valid = true;
            self.stage = DecodeStage::Finalizing;
            self.stream = None;
        }
        self.done
    }

    /// Patches the container, hands it off for writing and polls the write.
    ///
    /// Returns true when finalisation has finished, successfully or not; check
    /// [`Self::stage`] for which.
    pub fn finish_decode(&mut self, io: Option<&IoThread>, cache: &DecodedCache) -> bool {
        match self.stage {
            DecodeStage::Finalizing => self.finalize(io, cache),
            DecodeStage::Writing => self.poll_write(cache),
            DecodeStage::Done | DecodeStage::Invalid => true,
            stage => {
                warn!("finish_decode for {} called in stage {stage:?}", self.asset);
                false
            },
        }
    }

    /// Patches the header lengths and fades the ends of the sample data.
    fn seal_container(&mut self) -> DecodeResult<u32> {
        let data_length = wav::patch_lengths(&mut self.wav).ok_or_else(|| {
            DecodeError::BadContainer(format!(
                "{} bytes of PCM do not fit a container",
                self.wav.len().saturating_sub(wav::WAV_HEADER_SIZE)
            ))
        })?;
        if data_length == 0 {
            return Err(DecodeError::EmptyOutput);
        }
        wav::apply_crossfade(&mut self.wav[wav::WAV_HEADER_SIZE..]);
        Ok(data_length)
    }

    fn finalize(&mut self, io: Option<&IoThread>, cache: &DecodedCache) -> bool {
        if let Err(e) = self.seal_container() {
            warn!("Decode of {} failed: {e}", self.asset);
            self.fail();
            return true;
        }

        let container = std::mem::take(&mut self.wav);
        match (io, cache.partial_path_for(self.asset)) {
            (Some(io), Some(path)) => {
                self.expected_bytes = container.len() as u64;
                self.write_status.reset();
                let status = Arc::downgrade(&self.write_status);
                self.io_handle = io.submit_write(
                    path,
                    container,
                    0,
                    Box::new(move |bytes| {
                        // Nothing to report to if the decode was abandoned.
                        if let Some(status) = status.upgrade() {
                            status.record(bytes);
                        }
                    }),
                );
                self.stage = DecodeStage::Writing;
                false
            },
            _ => {
                if let Err(e) = cache.store_now(self.asset, container) {
                    warn!("Storing decoded {} failed: {e}", self.asset);
                    self.fail();
                } else {
                    self.stage = DecodeStage::Done;
                }
                true
            },
        }
    }

    fn poll_write(&mut self, cache: &DecodedCache) -> bool {
        let bytes = self.write_status.get();
        if bytes < 0 {
            return false;
        }
        if bytes as u64 != self.expected_bytes {
            warn!(
                "Write of decoded {} stopped at {bytes} of {} bytes",
                self.asset, self.expected_bytes
            );
            cache.discard_partial(self.asset);
            self.fail();
            return true;
        }
        match cache.commit_partial(self.asset, self.expected_bytes) {
            Ok(()) => {
                debug!("Wrote {bytes} decoded bytes for {}", self.asset);
                self.stage = DecodeStage::Done;
            },
            Err(e) => {
                warn!("Decoded {} could not be committed: {e}", self.asset);
                self.fail();
            },
        }
        true
    }

    /// Removes the compressed bytes so the asset is never retried.
    pub fn flush_bad_file(&self, store: &dyn AssetStore) {
        if store.remove(self.asset, AssetKind::Sound) {
            warn!("Flushed bad audio asset {}", self.asset);
        }
    }
}

/// Bytes to reserve for the output of a stream declaring `hint` bytes of PCM.
///
/// A declared length comes from the container and may be corrupt, so it is
/// bounded by the compressed size and by [`MAX_PREALLOC_BYTES`].
fn prealloc_bytes(hint: Option<usize>, source_size: u64) -> usize {
    let source = usize::try_from(source_size).unwrap_or(usize::MAX);
    let bound = source
        .saturating_mul(MAX_EXPANSION)
        .min(MAX_PREALLOC_BYTES);
    // Compressed audio is roughly a tenth of PCM size when undeclared.
    hint.unwrap_or_else(|| source.saturating_mul(10)).min(bound)
}

/// FIFO of decode requests plus the single active decode.
pub struct DecodeManager {
    queue: VecDeque<AssetId>,
    current: Option<DecodeState>,
    store: Arc<dyn AssetStore>,
    codec: Arc<dyn StreamCodec>,
    cache: DecodedCache,
    io: Option<IoThread>,
}

impl std::fmt::Debug for DecodeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodeManager")
            .field("queued", &self.queue.len())
            .field("current", &self.current)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl DecodeManager {
    /// Creates a manager. Without an I/O thread every container is stored
    /// synchronously.
    pub fn new(
        store: Arc<dyn AssetStore>,
        codec: Arc<dyn StreamCodec>,
        cache: DecodedCache,
        io: Option<IoThread>,
    ) -> Self {
        Self {
            queue: VecDeque::new(),
            current: None,
            store,
            codec,
            cache,
            io,
        }
    }

    /// Replaces the codec used for decodes started from now on.
    pub fn set_codec(&mut self, codec: Arc<dyn StreamCodec>) {
        self.codec = codec;
    }

    /// Queues `asset` for decoding.
    ///
    /// Returns true if the asset is already decoded or its bytes are present
    /// and it was queued; false if there is nothing to decode yet.
    pub fn add_decode_request(&mut self, asset: AssetId) -> bool {
        if self.cache.contains(asset) {
            return true;
        }
        if self.queue.contains(&asset) || self.current.as_ref().is_some_and(|s| s.asset() == asset) {
            return true;
        }
        if self.store.exists(asset, AssetKind::Sound) {
            debug!("Queueing decode of {asset}");
            self.queue.push_back(asset);
            return true;
        }
        false
    }

    /// Advances decoding for at most roughly `budget`.
    ///
    /// At least one section of the active decode is processed per call, so a
    /// zero budget still makes progress.
    pub fn process_queue(&mut self, budget: Duration) -> Vec<DecodeOutcome> {
        let start = Instant::now();
        let mut outcomes = Vec::new();

        loop {
            if let Some(state) = self.current.as_mut() {
                let mut finished = state.decode_section();
                while !finished && start.elapsed() < budget {
                    finished = state.decode_section();
                }

                if state.stage() == DecodeStage::Invalid {
                    state.flush_bad_file(&*self.store);
                    outcomes.push(DecodeOutcome::Invalid(state.asset()));
                    self.current = None;
                    continue;
                }
                if !finished {
                    break;
                }

                if state.finish_decode(self.io.as_ref(), &self.cache) {
                    let asset = state.asset();
                    if state.stage() == DecodeStage::Done {
                        info!("Decoded audio asset {asset}");
                        outcomes.push(DecodeOutcome::Decoded(asset));
                    } else {
                        state.flush_bad_file(&*self.store);
                        outcomes.push(DecodeOutcome::Invalid(asset));
                    }
                    self.current = None;
                }
                break;
            }

            let Some(asset) = self.queue.pop_front() else {
                break;
            };
            if self.cache.contains(asset) {
                debug!("Skipping decode of {asset}, already decoded");
                continue;
            }

            let mut state = DecodeState::new(asset);
            match state.init_decode(&*self.store, &*self.codec) {
                Ok(()) => self.current = Some(state),
                Err(e) => {
                    warn!("Unable to decode {asset}: {e}");
                    state.flush_bad_file(&*self.store);
                    outcomes.push(DecodeOutcome::Invalid(asset));
                },
            }
        }

        outcomes
    }

    /// Number of requests waiting behind the active decode.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// The active decode, if any.
    #[must_use]
    pub fn current(&self) -> Option<&DecodeState> {
        self.current.as_ref()
    }

    /// Whether nothing is active or queued.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.current.is_none() && self.queue.is_empty()
    }

    /// Abandons the active decode. A write already in flight still lands,
    /// under the partial name, but is never committed.
    pub fn cancel_current(&mut self) {
        if let Some(state) = self.current.take() {
            debug!("Cancelled decode of {} in stage {:?}", state.asset(), state.stage());
        }
    }

    /// Drops all work and stops the I/O thread.
    pub fn shutdown(&mut self) {
        self.cancel_current();
        self.queue.clear();
        if let Some(mut io) = self.io.take() {
            io.shutdown();
        }
    }
}
