//! The audio engine.
//!
//! One explicitly constructed [`AudioEngine`] owns the channel and buffer
//! pools, the source and asset registries, gain and listener state, wind and
//! the decode manager. Everything is driven from [`AudioEngine::idle`], once
//! per frame, on the caller's thread. The only other thread involved is the
//! decode manager's background writer.
//!
//! # Frame order
//!
//! ```text
//! commit gains -> update sources (load, prioritise, collect) -> assign
//! channels -> refresh channels -> promote queued sounds -> refresh channels
//! -> sync slaves -> flush stale buffers -> wind -> decode -> transfers
//! ```

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cadence_common::{AssetId, AudioResult, OwnerId, SourceId};
use glam::{DVec3, Vec3};
use tracing::{debug, info, warn};

use crate::backend::AudioBackend;
use crate::buffer::{AudioBuffer, BufferId};
use crate::channel::{AudioChannel, ChannelId};
use crate::codec::{StreamCodec, VorbisCodec};
use crate::config::AudioConfig;
use crate::data::AudioData;
use crate::decode::{DecodeManager, DecodeOutcome};
use crate::file_io::IoThread;
use crate::gain::{AudioCategory, GainChange, GainState};
use crate::listener::Listener;
use crate::source::AudioSource;
use crate::store::{AssetKind, AssetStore, DecodedCache};
use crate::wind::{WindControls, WindTargets};

/// Largest channel pool.
pub const MAX_CHANNELS: usize = 30;

/// Largest buffer pool.
pub const MAX_BUFFERS: usize = 40;

/// Fetches compressed bytes for assets the engine wants but does not have.
///
/// The engine asks for one asset at a time. The fetcher writes the bytes
/// into the asset store and then reports back through
/// [`AudioEngine::asset_received`].
pub trait AssetFetcher: Send {
    /// Starts fetching `asset`.
    fn request(&mut self, asset: AssetId);
}

#[derive(Debug)]
struct WindState {
    controls: Option<Arc<WindControls>>,
    max_gain: f32,
    vector: Vec3,
    last_update: Option<Instant>,
    targets: WindTargets,
}

/// The audio subsystem.
pub struct AudioEngine {
    config: AudioConfig,
    backend: AudioBackend,
    store: Arc<dyn AssetStore>,
    cache: DecodedCache,
    decoder: DecodeManager,
    channels: Vec<AudioChannel>,
    buffers: Vec<Option<AudioBuffer>>,
    sources: HashMap<SourceId, AudioSource>,
    data: HashMap<AssetId, AudioData>,
    gains: GainState,
    listener: Listener,
    wind: WindState,
    fetcher: Option<Box<dyn AssetFetcher>>,
    current_transfer: Option<AssetId>,
    next_serial: u64,
}

impl std::fmt::Debug for AudioEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioEngine")
            .field("backend", &self.backend.kind())
            .field("channels", &self.channels.len())
            .field("sources", &self.sources.len())
            .field("data", &self.data.len())
            .field("decoder", &self.decoder)
            .finish_non_exhaustive()
    }
}

impl AudioEngine {
    /// Opens the configured backend and builds the engine.
    ///
    /// This is the only fallible entry point: if the device cannot be
    /// opened, the caller should run without audio.
    pub fn init(config: AudioConfig, store: Arc<dyn AssetStore>) -> AudioResult<Self> {
        let mut config = config;
        config.validate();
        let backend = AudioBackend::open(config.backend)?;
        Self::with_backend(config, backend, store)
    }

    /// Builds the engine on an already opened backend.
    pub fn with_backend(
        config: AudioConfig,
        backend: AudioBackend,
        store: Arc<dyn AssetStore>,
    ) -> AudioResult<Self> {
        let mut config = config;
        config.validate();

        let (cache, io) = if config.persist_decoded {
            (
                DecodedCache::persisted(store.clone(), config.cache_dir.clone()),
                Some(IoThread::spawn()?),
            )
        } else {
            (DecodedCache::in_store(store.clone()), None)
        };
        let decoder = DecodeManager::new(store.clone(), Arc::new(VorbisCodec), cache.clone(), io);

        let mut channels = Vec::with_capacity(config.channels);
        for index in 0..config.channels {
            channels.push(AudioChannel::new(ChannelId::new(index), backend.create_channel()?));
        }
        let buffers = std::iter::repeat_with(|| None).take(config.buffers).collect();

        let gains = GainState::new(config.gain_levels());
        let listener = Listener {
            doppler_factor: config.doppler_factor,
            distance_factor: config.distance_factor,
            rolloff_factor: config.rolloff_factor,
            ..Listener::default()
        };

        let mut engine = Self {
            backend,
            store,
            cache,
            decoder,
            channels,
            buffers,
            sources: HashMap::new(),
            data: HashMap::new(),
            gains,
            listener,
            wind: WindState {
                controls: None,
                max_gain: config.max_wind_gain,
                vector: Vec3::ZERO,
                last_update: None,
                targets: WindTargets::default(),
            },
            fetcher: None,
            current_transfer: None,
            next_serial: 0,
            config,
        };
        engine
            .backend
            .set_internal_gain(engine.gains.applied().internal_gain());
        if engine.config.enable_wind {
            engine.enable_wind(true);
        }

        info!(
            "Audio engine initialized: {} channels, {} buffers, driver {}",
            engine.channels.len(),
            engine.buffers.len(),
            engine.backend.driver_name(true)
        );
        Ok(engine)
    }

    /// Replaces the compressed-stream codec.
    #[must_use]
    pub fn with_codec(mut self, codec: Arc<dyn StreamCodec>) -> Self {
        self.decoder.set_codec(codec);
        self
    }

    // === Sources ===

    /// Plays `asset` once from a new, transient source.
    ///
    /// Without a position (or at the origin) the sound is ambient. Returns
    /// the source id, or `None` while muted. The sound may still never be
    /// heard if it loses out on priority or is not available yet.
    pub fn trigger_sound(
        &mut self,
        asset: AssetId,
        owner: OwnerId,
        gain: f32,
        category: AudioCategory,
        position: Option<DVec3>,
    ) -> Option<SourceId> {
        if self.gains.requested().muted() {
            return None;
        }

        let mut source = AudioSource::new(SourceId::generate(), owner, gain, category);
        match position {
            Some(position) if position != DVec3::ZERO => source.set_position(position),
            _ => source.set_ambient(true),
        }
        source.update_priority(&self.listener);
        let id = self.add_audio_source(source);
        self.play(id, asset);
        Some(id)
    }

    /// Registers a source. Registering an id twice keeps the first.
    pub fn add_audio_source(&mut self, mut source: AudioSource) -> SourceId {
        let id = source.id();
        if self.sources.contains_key(&id) {
            debug!("Audio source {id} already registered");
            return id;
        }
        source.set_serial(self.next_serial);
        self.next_serial += 1;
        self.sources.insert(id, source);
        id
    }

    /// Removes a source and frees its channel. Returns false if it was not
    /// registered.
    pub fn cleanup_audio_source(&mut self, id: SourceId) -> bool {
        let Some(source) = self.sources.remove(&id) else {
            debug!("Cleaning up unknown audio source {id}");
            return false;
        };
        if let Some(channel) = source.channel() {
            if let Some(channel) = self.channels.get_mut(channel.index()) {
                channel.set_source(None);
            }
        }
        true
    }

    /// Looks up a source.
    #[must_use]
    pub fn find_audio_source(&self, id: SourceId) -> Option<&AudioSource> {
        self.sources.get(&id)
    }

    /// Mutable access to a source's settings.
    pub fn source_mut(&mut self, id: SourceId) -> Option<&mut AudioSource> {
        self.sources.get_mut(&id)
    }

    /// Number of live sources.
    #[must_use]
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Every live source.
    pub fn sources(&self) -> impl Iterator<Item = &AudioSource> {
        self.sources.values()
    }

    /// Starts `asset` on a source. A null asset stops the source.
    ///
    /// Returns true if the sound is now playing (or waiting on its sync
    /// master). False is not an error: the asset may still be decoding, or
    /// there may be no channel to spare this frame.
    pub fn play(&mut self, source_id: SourceId, asset: AssetId) -> bool {
        let Some(source) = self.sources.get_mut(&source_id) else {
            return false;
        };

        if asset.is_null() {
            if let Some(channel) = source.channel() {
                source.set_channel(None);
                self.channels[channel.index()].set_source(None);
            }
            source.set_current(None);
            return false;
        }
        source.reset_age(Instant::now());

        self.get_audio_data(asset);
        let has_buffer = self.update_buffer_for_data(asset);
        self.add_audio_data(source_id, asset, true);

        let is_current = self
            .sources
            .get(&source_id)
            .is_some_and(|source| source.current() == Some(asset));
        if !has_buffer || !is_current {
            return false;
        }
        if !self.setup_channel(source_id) {
            return false;
        }

        let Some(source) = self.sources.get_mut(&source_id) else {
            return false;
        };
        let Some(channel) = source.channel() else {
            return false;
        };
        let channel = &mut self.channels[channel.index()];
        if source.is_sync_slave() {
            channel.set_waiting(true);
        } else {
            channel.play(source);
        }
        true
    }

    /// Attaches `asset` to a source.
    ///
    /// With `set_current` the asset becomes the current sound, or the queued
    /// one when the source queues sounds and already has a current sound.
    /// Otherwise it joins the source's preload set. Returns false only when
    /// the queue slot is already taken.
    pub fn add_audio_data(&mut self, source_id: SourceId, asset: AssetId, set_current: bool) -> bool {
        if !self.sources.contains_key(&source_id) {
            return false;
        }
        self.get_audio_data(asset);
        let Some(source) = self.sources.get_mut(&source_id) else {
            return false;
        };

        if !set_current {
            source.preload(asset);
            let decodable = self
                .data
                .get(&asset)
                .is_some_and(|data| data.has_local() && !data.has_decoded() && data.is_valid());
            if decodable {
                self.decoder.add_decode_request(asset);
            }
            self.start_next_transfer();
            return true;
        }

        let restart = match source.current() {
            None => {
                source.set_current(Some(asset));
                true
            },
            Some(current) if source.queue_sounds() => {
                if source.queued().is_some() {
                    return false;
                }
                if current == asset && source.is_looping() {
                    return true;
                }
                source.set_queued(Some(asset));
                false
            },
            Some(current) if current != asset => {
                source.set_current(Some(asset));
                true
            },
            Some(_) => return true,
        };

        if restart {
            if let Some(channel) = source.channel() {
                let index = channel.index();
                self.update_channel(index, Instant::now());
                self.play_channel(index);
            }
        }
        self.start_next_transfer();
        true
    }

    /// Makes sure the source's current sound is on a channel.
    ///
    /// Needs the current asset's buffer to be loaded. Without a channel,
    /// asks for one at the source's priority.
    pub fn setup_channel(&mut self, source_id: SourceId) -> bool {
        let Some(source) = self.sources.get_mut(&source_id) else {
            return false;
        };
        let has_buffer = source
            .current()
            .and_then(|asset| self.data.get(&asset))
            .is_some_and(|data| data.buffer().is_some());
        if !has_buffer {
            return false;
        }

        let index = match source.channel() {
            Some(channel) => channel.index(),
            None => {
                source.update_priority(&self.listener);
                let priority = source.priority();
                let Some(index) = self.get_free_channel(priority) else {
                    return false;
                };
                self.bind_channel(index, source_id);
                index
            },
        };
        self.update_channel(index, Instant::now());
        true
    }

    // === Assets ===

    /// The entry for `asset`, created on first use from what the store and
    /// decoded cache already hold.
    pub fn get_audio_data(&mut self, asset: AssetId) -> &mut AudioData {
        let cache = &self.cache;
        let store = &self.store;
        self.data.entry(asset).or_insert_with(|| {
            if asset.is_null() {
                return AudioData::new(asset, false, false);
            }
            AudioData::new(
                asset,
                cache.contains(asset),
                store.exists(asset, AssetKind::Sound),
            )
        })
    }

    /// The entry for `asset`, if the engine has seen it.
    #[must_use]
    pub fn audio_data(&self, asset: AssetId) -> Option<&AudioData> {
        self.data.get(&asset)
    }

    /// Makes sure `asset` is known and queued for decoding.
    ///
    /// Returns true when it is already decoded or its bytes are present and
    /// a decode is queued; false when the bytes have not arrived.
    pub fn preload_sound(&mut self, asset: AssetId) -> bool {
        let decoded = self.cache.contains(asset);
        let local = self.store.exists(asset, AssetKind::Sound);
        let data = self.get_audio_data(asset);
        data.set_has_decoded(decoded);
        data.set_has_local(local || decoded);

        self.decoder.add_decode_request(asset)
    }

    /// Loads the buffer for `asset` if it is decoded, or queues a decode if
    /// only the compressed bytes are present. Returns whether a buffer is
    /// loaded.
    pub fn update_buffer_for_data(&mut self, asset: AssetId) -> bool {
        let Some(data) = self.data.get(&asset) else {
            return false;
        };
        if data.buffer().is_none() {
            if data.has_decoded() {
                self.load_data(asset);
            } else if data.has_local() && data.is_valid() && !asset.is_null() {
                self.decoder.add_decode_request(asset);
            }
        }
        self.data.get(&asset).is_some_and(|data| data.buffer().is_some())
    }

    /// Loads the decoded container for `asset` into a buffer.
    ///
    /// A container that fails to load is dropped from the cache and the
    /// asset is marked invalid.
    pub fn load_data(&mut self, asset: AssetId) -> bool {
        let Some(data) = self.data.get(&asset) else {
            return false;
        };
        if data.buffer().is_some() {
            return true;
        }
        if !data.has_decoded() || !data.is_valid() {
            return false;
        }

        let Some(slot) = self.get_free_buffer() else {
            debug!("No free audio buffer for {asset}");
            return false;
        };
        let mut buffer = AudioBuffer::new(BufferId::new(slot), self.backend.create_buffer());
        let loaded = match self.cache.path_for(asset) {
            Some(path) => buffer.load_wav(&path),
            None => self
                .cache
                .read(asset)
                .and_then(|bytes| buffer.load_wav_bytes(&bytes)),
        };

        match loaded {
            Ok(()) => {
                buffer.set_asset(Some(asset));
                self.buffers[slot] = Some(buffer);
                if let Some(data) = self.data.get_mut(&asset) {
                    data.set_buffer(Some(BufferId::new(slot)));
                }
                true
            },
            Err(e) => {
                warn!("Failed to load decoded audio {asset}: {e}");
                self.cache.remove(asset);
                if let Some(data) = self.data.get_mut(&asset) {
                    data.set_has_decoded(false);
                    data.set_valid(false);
                }
                false
            },
        }
    }

    /// Whether a decoded container exists for `asset`.
    #[must_use]
    pub fn has_decoded_file(&self, asset: AssetId) -> bool {
        self.cache.contains(asset)
    }

    /// Whether compressed bytes exist for `asset`.
    #[must_use]
    pub fn has_local_file(&self, asset: AssetId) -> bool {
        self.store.exists(asset, AssetKind::Sound)
    }

    // === Pools ===

    /// A channel for a sound of `priority`.
    ///
    /// Unassigned and finished channels are handed out first. Otherwise the
    /// lowest-priority channel (oldest on a tie) is evicted, but only if its
    /// priority is strictly below `priority`.
    pub fn get_free_channel(&mut self, priority: f32) -> Option<usize> {
        for index in 0..self.channels.len() {
            let channel = &self.channels[index];
            if channel.source().is_none() {
                return Some(index);
            }
            if !channel.is_playing() && !channel.is_waiting() {
                self.detach_channel(index);
                return Some(index);
            }
        }

        let (index, lowest) = self
            .channels
            .iter()
            .enumerate()
            .filter_map(|(index, channel)| {
                let source = self.sources.get(&channel.source()?)?;
                Some((index, source.priority(), source.serial()))
            })
            .min_by(|a, b| {
                a.1.partial_cmp(&b.1)
                    .unwrap_or(Ordering::Equal)
                    .then(a.2.cmp(&b.2))
            })
            .map(|(index, priority, _)| (index, priority))?;

        if lowest >= priority {
            return None;
        }
        debug!("Evicting channel {index} (priority {lowest} < {priority})");
        self.detach_channel(index);
        Some(index)
    }

    /// A buffer slot, emptied and ready to load.
    ///
    /// Empty slots come first; otherwise the least recently used buffer that
    /// no channel is reading from is taken over.
    pub fn get_free_buffer(&mut self) -> Option<usize> {
        if let Some(index) = self.buffers.iter().position(Option::is_none) {
            return Some(index);
        }

        let bound = self.bound_buffers();
        let index = self
            .buffers
            .iter()
            .enumerate()
            .filter_map(|(index, buffer)| buffer.as_ref().map(|buffer| (index, buffer)))
            .filter(|(_, buffer)| !buffer.in_use() && !bound.contains(&buffer.id()))
            .min_by_key(|(_, buffer)| buffer.last_used())
            .map(|(index, _)| index)?;

        info!("Taking over unused audio buffer {index}");
        self.release_buffer(index);
        Some(index)
    }

    /// Gives every unassigned source that has a buffer a shot at a channel,
    /// highest priority first, then refreshes every channel.
    pub fn update_channels(&mut self) {
        let mut waiting: Vec<(SourceId, f32, u64)> = self
            .sources
            .values()
            .filter(|source| source.channel().is_none())
            .filter(|source| {
                source
                    .current()
                    .and_then(|asset| self.data.get(&asset))
                    .is_some_and(|data| data.buffer().is_some())
            })
            .map(|source| (source.id(), source.priority(), source.serial()))
            .collect();
        waiting.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then(b.2.cmp(&a.2))
        });

        let now = Instant::now();
        for (source_id, priority, _) in waiting {
            let Some(index) = self.get_free_channel(priority) else {
                continue;
            };
            self.bind_channel(index, source_id);
            self.update_channel(index, now);
            let slave = self
                .sources
                .get(&source_id)
                .is_some_and(AudioSource::is_sync_slave);
            if slave {
                self.channels[index].set_waiting(true);
            } else {
                self.play_channel(index);
            }
        }

        self.refresh_channels(now);
    }

    // === Frame ===

    /// Runs one frame.
    ///
    /// `max_decode_secs` bounds time spent decoding; zero or less uses the
    /// configured default.
    pub fn idle(&mut self, max_decode_secs: f32) {
        let budget = if max_decode_secs > 0.0 {
            Duration::try_from_secs_f32(max_decode_secs).unwrap_or(Duration::MAX)
        } else {
            self.config.decode_budget()
        };

        self.commit_deferred_changes();

        for buffer in self.buffers.iter_mut().flatten() {
            buffer.set_in_use(false);
        }

        self.update_sources();
        self.update_channels();
        self.update_queued_sounds();
        self.refresh_channels(Instant::now());
        self.sync_slaves();
        self.flush_stale_buffers();
        for channel in &mut self.channels {
            channel.clear_looped();
        }

        self.update_wind_targets();

        for outcome in self.decoder.process_queue(budget) {
            self.apply_decode_outcome(outcome);
        }
        self.start_next_transfer();
    }

    fn update_sources(&mut self) {
        let now = Instant::now();
        let timeouts = self.config.source_timeouts();
        let ids: Vec<SourceId> = self.sources.keys().copied().collect();

        for id in ids {
            let pending_load = self.sources.get(&id).and_then(|source| {
                let asset = source.current()?;
                let data = self.data.get(&asset)?;
                data.buffer().is_none().then_some(asset)
            });
            if let Some(asset) = pending_load {
                if self.load_data(asset) {
                    self.play(id, asset);
                }
            }

            let Some(source) = self.sources.get_mut(&id) else {
                continue;
            };
            source.update_priority(&self.listener);

            let channel_playing = source
                .channel()
                .map(|channel| self.channels[channel.index()].is_playing());
            let data = &self.data;
            let pending_preloads = source.has_pending_preloads(|asset| {
                data.get(&asset)
                    .map_or(true, |data| data.has_decoded() || !data.is_valid())
            });
            if source.is_done(channel_playing, pending_preloads, &timeouts, now) {
                debug!("Audio source {id} done");
                self.cleanup_audio_source(id);
            }
        }
    }

    fn update_queued_sounds(&mut self) {
        let now = Instant::now();
        let queued: Vec<SourceId> = self
            .sources
            .values()
            .filter(|source| source.queued().is_some())
            .map(AudioSource::id)
            .collect();

        for id in queued {
            let Some(source) = self.sources.get(&id) else {
                continue;
            };
            let advance = match source.channel() {
                None => true,
                Some(channel) => {
                    let channel = &self.channels[channel.index()];
                    !channel.is_playing() || (source.is_looping() && channel.looped_this_frame())
                },
            };
            if !advance {
                continue;
            }

            let Some(source) = self.sources.get_mut(&id) else {
                continue;
            };
            let Some(asset) = source.promote_queued(now) else {
                continue;
            };
            debug!("Audio source {id} advancing to queued {asset}");
            self.update_buffer_for_data(asset);
            if self.setup_channel(id) {
                if let Some(channel) = self.sources.get(&id).and_then(AudioSource::channel) {
                    self.play_channel(channel.index());
                }
            }
        }
    }

    fn sync_slaves(&mut self) {
        let master_channel = self
            .sources
            .values()
            .filter(|source| source.is_sync_master())
            .max_by(|a, b| a.priority().partial_cmp(&b.priority()).unwrap_or(Ordering::Equal))
            .and_then(AudioSource::channel);
        let Some(master_channel) = master_channel else {
            return;
        };
        let master = &self.channels[master_channel.index()];
        if !master.looped_this_frame() {
            return;
        }
        let master_position = master.position().unwrap_or_default();

        for source in self.sources.values_mut() {
            if !source.is_sync_slave() {
                continue;
            }
            let Some(channel) = source.channel() else {
                continue;
            };
            let channel = &mut self.channels[channel.index()];
            if !channel.is_waiting() {
                continue;
            }
            let length = channel
                .buffer()
                .and_then(|buffer| self.buffers.get(buffer.index()))
                .and_then(Option::as_ref)
                .map_or(Duration::ZERO, AudioBuffer::duration);
            debug!("Starting sync slave {} with its master", source.id());
            channel.play_synced(master_position, length, source);
        }
    }

    fn flush_stale_buffers(&mut self) {
        let now = Instant::now();
        let max_age = self.config.buffer_flush_age();
        let bound = self.bound_buffers();
        let stale: Vec<usize> = self
            .buffers
            .iter()
            .enumerate()
            .filter_map(|(index, buffer)| buffer.as_ref().map(|buffer| (index, buffer)))
            .filter(|(_, buffer)| !buffer.in_use() && !bound.contains(&buffer.id()))
            .filter(|(_, buffer)| buffer.idle_for(now) > max_age)
            .map(|(index, _)| index)
            .collect();
        for index in stale {
            debug!("Flushing stale audio buffer {index}");
            self.release_buffer(index);
        }
    }

    fn apply_decode_outcome(&mut self, outcome: DecodeOutcome) {
        match outcome {
            DecodeOutcome::Decoded(asset) => {
                let data = self.get_audio_data(asset);
                data.set_has_decoded(true);
                data.set_has_local(true);
                data.set_valid(true);
            },
            DecodeOutcome::Invalid(asset) => {
                warn!("Audio asset {asset} is unplayable");
                let data = self.get_audio_data(asset);
                data.set_has_decoded(false);
                data.set_has_local(false);
                data.set_valid(false);
            },
        }
    }

    fn refresh_channels(&mut self, now: Instant) {
        for index in 0..self.channels.len() {
            self.update_channel(index, now);
            self.channels[index].update_loop();
        }
    }

    /// Rebinds the channel's buffer if its source switched, and pushes gain.
    fn update_channel(&mut self, index: usize, now: Instant) -> bool {
        let channel = &mut self.channels[index];
        let Some(source_id) = channel.source() else {
            return false;
        };
        let Some(source) = self.sources.get(&source_id) else {
            channel.set_source(None);
            return false;
        };
        let buffer = source
            .current()
            .and_then(|asset| self.data.get(&asset))
            .and_then(AudioData::buffer)
            .and_then(|buffer| self.buffers.get_mut(buffer.index()))
            .and_then(Option::as_mut);

        let levels = self.gains.applied();
        let rebound = channel.update_buffer(source, buffer, levels.secondary(source.category()), now);
        channel.update_3d_position(source, &self.listener, levels.internal_gain());
        rebound
    }

    fn play_channel(&mut self, index: usize) {
        let channel = &mut self.channels[index];
        let Some(source) = channel.source().and_then(|id| self.sources.get_mut(&id)) else {
            return;
        };
        channel.play(source);
    }

    fn bind_channel(&mut self, index: usize, source_id: SourceId) {
        if self.channels[index].source().is_some_and(|id| id != source_id) {
            self.detach_channel(index);
        }
        self.channels[index].set_source(Some(source_id));
        if let Some(source) = self.sources.get_mut(&source_id) {
            source.set_channel(Some(ChannelId::new(index)));
        }
    }

    fn detach_channel(&mut self, index: usize) {
        let channel = &mut self.channels[index];
        if let Some(source) = channel.source().and_then(|id| self.sources.get_mut(&id)) {
            source.set_channel(None);
        }
        channel.set_source(None);
    }

    fn bound_buffers(&self) -> HashSet<BufferId> {
        self.channels
            .iter()
            .filter(|channel| channel.source().is_some())
            .filter_map(AudioChannel::buffer)
            .collect()
    }

    fn release_buffer(&mut self, index: usize) {
        let Some(mut buffer) = self.buffers.get_mut(index).and_then(Option::take) else {
            return;
        };
        if let Some(data) = buffer.asset().and_then(|asset| self.data.get_mut(&asset)) {
            data.set_buffer(None);
        }
        buffer.cleanup();
    }

    // === Gains ===

    /// Sets the master gain; applied at the next `idle`.
    pub fn set_master_gain(&mut self, gain: f32) {
        self.gains.push(GainChange::Master(gain));
    }

    /// Requested master gain.
    #[must_use]
    pub fn master_gain(&self) -> f32 {
        self.gains.requested().master()
    }

    /// Sets a category gain; applied at the next `idle`.
    pub fn set_secondary_gain(&mut self, category: AudioCategory, gain: f32) {
        self.gains.push(GainChange::Secondary(category, gain));
    }

    /// Requested category gain.
    #[must_use]
    pub fn secondary_gain(&self, category: AudioCategory) -> f32 {
        self.gains.requested().secondary(category)
    }

    /// Mutes or unmutes; applied at the next `idle`. While muted no new
    /// sounds are triggered and no transfers are started.
    pub fn set_muted(&mut self, muted: bool) {
        self.gains.push(GainChange::Muted(muted));
    }

    /// Whether mute is requested.
    #[must_use]
    pub fn is_muted(&self) -> bool {
        self.gains.requested().muted()
    }

    /// Applies pending gain changes to the device.
    pub fn commit_deferred_changes(&mut self) {
        if let Some(internal) = self.gains.commit() {
            debug!("Internal gain now {internal}");
            self.backend.set_internal_gain(internal);
        }
    }

    // === Listener ===

    /// Updates the listener in one call.
    pub fn set_listener(&mut self, position: DVec3, velocity: Vec3, up: Vec3, at: Vec3) {
        self.listener.set(position, velocity, up, at);
    }

    /// Moves the listener.
    pub fn set_listener_position(&mut self, position: DVec3) {
        self.listener.position = position;
    }

    /// Sets listener velocity.
    pub fn set_listener_velocity(&mut self, velocity: Vec3) {
        self.listener.velocity = velocity;
    }

    /// Sets listener orientation.
    pub fn set_listener_orientation(&mut self, up: Vec3, at: Vec3) {
        self.listener.up = up;
        self.listener.at = at;
    }

    /// Listener position.
    #[must_use]
    pub const fn listener_position(&self) -> DVec3 {
        self.listener.position
    }

    /// Listener state.
    #[must_use]
    pub const fn listener(&self) -> &Listener {
        &self.listener
    }

    /// Sets doppler strength.
    pub fn set_doppler_factor(&mut self, factor: f32) {
        self.listener.doppler_factor = factor.max(0.0);
    }

    /// Doppler strength.
    #[must_use]
    pub const fn doppler_factor(&self) -> f32 {
        self.listener.doppler_factor
    }

    /// Sets world units to metres.
    pub fn set_distance_factor(&mut self, factor: f32) {
        self.listener.distance_factor = factor.max(0.0);
    }

    /// World units to metres.
    #[must_use]
    pub const fn distance_factor(&self) -> f32 {
        self.listener.distance_factor
    }

    /// Sets the base rolloff.
    pub fn set_rolloff_factor(&mut self, factor: f32) {
        self.listener.rolloff_factor = factor.max(0.0);
    }

    /// Base rolloff, without the underwater multiplier.
    #[must_use]
    pub const fn rolloff_factor(&self) -> f32 {
        self.listener.rolloff_factor
    }

    // === Wind ===

    /// Starts or stops the wind generator.
    pub fn enable_wind(&mut self, enable: bool) {
        match (enable, self.wind.controls.is_some()) {
            (true, false) => {
                let controls = Arc::new(WindControls::default());
                if self.backend.init_wind(controls.clone()) {
                    self.wind.controls = Some(controls);
                    self.wind.last_update = None;
                    info!("Wind enabled");
                } else {
                    warn!("Unable to start wind");
                }
            },
            (false, true) => {
                self.backend.cleanup_wind();
                self.wind.controls = None;
                info!("Wind disabled");
            },
            _ => {},
        }
    }

    /// Whether the wind generator is running.
    #[must_use]
    pub const fn is_wind_enabled(&self) -> bool {
        self.wind.controls.is_some()
    }

    /// Records the local wind (region axes) and camera height above water.
    ///
    /// Crossing the water surface switches the underwater rolloff right
    /// away; wind targets follow at the next update interval.
    pub fn update_wind(&mut self, wind: Vec3, camera_height_above_water: f32) {
        let underwater = camera_height_above_water < 0.0;
        if underwater != self.listener.underwater {
            debug!("Listener underwater: {underwater}");
            self.listener.underwater = underwater;
        }
        self.wind.vector = wind;
    }

    /// Wind gain at full speed.
    pub fn set_max_wind_gain(&mut self, gain: f32) {
        self.wind.max_gain = gain.clamp(0.0, 1.0);
    }

    /// Targets last handed to the wind generator.
    #[must_use]
    pub const fn wind_targets(&self) -> WindTargets {
        self.wind.targets
    }

    fn update_wind_targets(&mut self) {
        let Some(controls) = self.wind.controls.as_ref() else {
            return;
        };
        let now = Instant::now();
        let interval = self.config.wind_update_interval();
        if self
            .wind
            .last_update
            .is_some_and(|last| now.saturating_duration_since(last) < interval)
        {
            return;
        }
        self.wind.last_update = Some(now);

        let max_gain = if self.gains.applied().muted() {
            0.0
        } else {
            self.wind.max_gain
        };
        let targets = WindTargets::from_wind(self.wind.vector, max_gain, self.listener.underwater);
        controls.set(targets);
        self.wind.targets = targets;
    }

    // === Transfers ===

    /// Installs the collaborator that fetches missing assets.
    pub fn set_asset_fetcher(&mut self, fetcher: Box<dyn AssetFetcher>) {
        self.fetcher = Some(fetcher);
        self.start_next_transfer();
    }

    /// Asset currently being fetched.
    #[must_use]
    pub const fn current_transfer(&self) -> Option<AssetId> {
        self.current_transfer
    }

    /// Completion of a fetch. On success the bytes must already be in the
    /// asset store; the asset is queued for decoding.
    pub fn asset_received(&mut self, asset: AssetId, ok: bool) {
        if self.current_transfer == Some(asset) {
            self.current_transfer = None;
        }
        let ok = ok && self.store.exists(asset, AssetKind::Sound);
        let data = self.get_audio_data(asset);
        if ok {
            data.set_valid(true);
            data.set_has_local(true);
            self.decoder.add_decode_request(asset);
        } else {
            warn!("Transfer of audio asset {asset} failed");
            data.set_valid(false);
            data.set_has_local(false);
        }
        self.start_next_transfer();
    }

    /// Requests the most wanted missing asset, one at a time.
    ///
    /// Sounds already on a channel come first (current, then queued, then
    /// preloads), followed by every other source in priority order.
    pub fn start_next_transfer(&mut self) {
        if self.current_transfer.is_some() || self.fetcher.is_none() || self.is_muted() {
            return;
        }

        let mut on_channels: Vec<&AudioSource> = self
            .channels
            .iter()
            .filter_map(|channel| channel.source())
            .filter_map(|id| self.sources.get(&id))
            .collect();
        let mut everyone: Vec<&AudioSource> = self.sources.values().collect();
        let by_priority = |a: &&AudioSource, b: &&AudioSource| {
            b.priority().partial_cmp(&a.priority()).unwrap_or(Ordering::Equal)
        };
        on_channels.sort_by(by_priority);
        everyone.sort_by(by_priority);

        let wanted = |asset: &AssetId| {
            self.data
                .get(asset)
                .is_some_and(|data| !data.has_local() && data.is_valid())
        };
        let pick = |sources: &[&AudioSource]| {
            sources
                .iter()
                .filter_map(|source| source.current())
                .find(|asset| wanted(asset))
                .or_else(|| sources.iter().filter_map(|source| source.queued()).find(|asset| wanted(asset)))
                .or_else(|| sources.iter().flat_map(|source| source.preloads()).find(|asset| wanted(asset)))
        };
        let Some(asset) = pick(on_channels.as_slice()).or_else(|| pick(everyone.as_slice())) else {
            return;
        };

        info!("Requesting audio asset {asset}");
        self.current_transfer = Some(asset);
        if let Some(fetcher) = self.fetcher.as_mut() {
            fetcher.request(asset);
        }
    }

    // === Inspection ===

    /// Configuration in effect.
    #[must_use]
    pub const fn config(&self) -> &AudioConfig {
        &self.config
    }

    /// A channel by id.
    #[must_use]
    pub fn channel(&self, id: ChannelId) -> Option<&AudioChannel> {
        self.channels.get(id.index())
    }

    /// The channel pool.
    #[must_use]
    pub fn channels(&self) -> &[AudioChannel] {
        &self.channels
    }

    /// Loaded buffers.
    pub fn buffers(&self) -> impl Iterator<Item = &AudioBuffer> {
        self.buffers.iter().flatten()
    }

    /// Number of channels serving a source.
    #[must_use]
    pub fn bound_channel_count(&self) -> usize {
        self.channels
            .iter()
            .filter(|channel| channel.source().is_some())
            .count()
    }

    /// The output device.
    #[must_use]
    pub const fn backend(&self) -> &AudioBackend {
        &self.backend
    }

    /// The decode manager.
    #[must_use]
    pub const fn decoder(&self) -> &DecodeManager {
        &self.decoder
    }

    /// Driver description.
    #[must_use]
    pub fn driver_name(&self, verbose: bool) -> String {
        self.backend.driver_name(verbose)
    }

    /// Stops everything and releases every resource. The engine is empty
    /// but usable afterwards.
    pub fn shutdown(&mut self) {
        info!("Shutting down audio engine");
        self.enable_wind(false);
        for channel in &mut self.channels {
            channel.set_source(None);
        }
        self.sources.clear();
        for index in 0..self.buffers.len() {
            self.release_buffer(index);
        }
        self.data.clear();
        self.decoder.shutdown();
        self.current_transfer = None;
    }
}
