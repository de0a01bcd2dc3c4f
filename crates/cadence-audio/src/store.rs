//! Asset byte storage.
//!
//! The engine never touches the disk for compressed assets directly: it
//! reads them through an [`AssetStore`], keyed by asset identity and kind.
//! Decoded PCM containers live either next to the compressed bytes in the
//! store or as files in a cache directory, and [`DecodedCache`] hides which.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cadence_common::{AssetId, DecodeResult, StoreError};
use parking_lot::RwLock;
use tracing::{debug, warn};

/// Extension used for decoded containers in the cache directory.
pub const DECODED_EXTENSION: &str = "dsf";

/// Suffix of a decoded container that is still being written.
pub const PARTIAL_SUFFIX: &str = "tmp";

/// What flavour of bytes is stored under an asset id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetKind {
    /// Compressed sound as delivered (Ogg Vorbis).
    Sound,
    /// Decoded PCM container.
    DecodedSound,
}

/// Synchronous provider of raw asset bytes.
pub trait AssetStore: Send + Sync {
    /// Whether bytes exist for `(id, kind)`.
    fn exists(&self, id: AssetId, kind: AssetKind) -> bool;

    /// Opens a readable, seekable handle on the bytes.
    fn open(&self, id: AssetId, kind: AssetKind) -> Option<AssetFile>;

    /// Stores bytes, replacing anything already there.
    fn write(&self, id: AssetId, kind: AssetKind, bytes: Vec<u8>);

    /// Removes bytes. Returns whether anything was removed.
    fn remove(&self, id: AssetId, kind: AssetKind) -> bool;
}

/// A read cursor over one stored asset.
#[derive(Debug, Clone)]
pub struct AssetFile {
    bytes: Arc<[u8]>,
    pos: u64,
}

impl AssetFile {
    /// Creates a cursor positioned at the start of `bytes`.
    #[must_use]
    pub fn new(bytes: Arc<[u8]>) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Total size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Current read position.
    #[must_use]
    pub const fn tell(&self) -> u64 {
        self.pos
    }

    /// Whether the file is zero length.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Read for AssetFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let start = (self.pos as usize).min(self.bytes.len());
        let remaining = &self.bytes[start..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for AssetFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(offset) => self.size().checked_add_signed(offset),
            SeekFrom::Current(offset) => self.pos.checked_add_signed(offset),
        };
        match target {
            Some(p) => {
                self.pos = p;
                Ok(p)
            },
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of asset",
            )),
        }
    }
}

/// In-memory asset store.
#[derive(Debug, Default)]
pub struct MemoryAssetStore {
    assets: RwLock<HashMap<(AssetId, AssetKind), Arc<[u8]>>>,
}

impl MemoryAssetStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores bytes under `(id, kind)`.
    pub fn insert(&self, id: AssetId, kind: AssetKind, bytes: impl Into<Vec<u8>>) {
        self.write(id, kind, bytes.into());
    }

    /// Number of stored entries across all kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.assets.read().len()
    }

    /// Whether the store holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assets.read().is_empty()
    }
}

impl AssetStore for MemoryAssetStore {
    fn exists(&self, id: AssetId, kind: AssetKind) -> bool {
        self.assets.read().contains_key(&(id, kind))
    }

    fn open(&self, id: AssetId, kind: AssetKind) -> Option<AssetFile> {
        self.assets
            .read()
            .get(&(id, kind))
            .map(|bytes| AssetFile::new(Arc::clone(bytes)))
    }

    fn write(&self, id: AssetId, kind: AssetKind, bytes: Vec<u8>) {
        self.assets.write().insert((id, kind), bytes.into());
    }

    fn remove(&self, id: AssetId, kind: AssetKind) -> bool {
        self.assets.write().remove(&(id, kind)).is_some()
    }
}

/// Where decoded containers are kept.
#[derive(Clone)]
pub struct DecodedCache {
    store: Arc<dyn AssetStore>,
    dir: Option<PathBuf>,
}

impl std::fmt::Debug for DecodedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedCache")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

impl DecodedCache {
    /// Decoded containers are written as files under `dir`.
    #[must_use]
    pub fn persisted(store: Arc<dyn AssetStore>, dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            dir: Some(dir.into()),
        }
    }

    /// Decoded containers are stored synchronously in the asset store.
    #[must_use]
    pub fn in_store(store: Arc<dyn AssetStore>) -> Self {
        Self { store, dir: None }
    }

    /// Whether decoded output goes through the background writer.
    #[must_use]
    pub fn is_persisted(&self) -> bool {
        self.dir.is_some()
    }

    /// File path for a decoded asset, when persisting.
    #[must_use]
    pub fn path_for(&self, id: AssetId) -> Option<PathBuf> {
        self.dir
            .as_deref()
            .map(|dir| decoded_path(dir, id))
    }

    /// Where the background writer puts a container before it is complete.
    #[must_use]
    pub fn partial_path_for(&self, id: AssetId) -> Option<PathBuf> {
        self.dir
            .as_deref()
            .map(|dir| partial_path(dir, id))
    }

    /// Whether a complete decoded container exists for `id`. Files still
    /// being written never count.
    #[must_use]
    pub fn contains(&self, id: AssetId) -> bool {
        match self.path_for(id) {
            Some(path) => path.is_file(),
            None => self.store.exists(id, AssetKind::DecodedSound),
        }
    }

    /// Reads the whole decoded container.
    pub fn read(&self, id: AssetId) -> DecodeResult<Vec<u8>> {
        if let Some(path) = self.path_for(id) {
            return Ok(fs::read(path)?);
        }
        let mut file = self
            .store
            .open(id, AssetKind::DecodedSound)
            .ok_or(StoreError::NotFound(id))?;
        let mut bytes = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    /// Stores a decoded container on the calling thread.
    pub fn store_now(&self, id: AssetId, bytes: Vec<u8>) -> DecodeResult<()> {
        debug!("Storing decoded container for {id} ({} bytes)", bytes.len());
        match self.path_for(id) {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(path, bytes)?;
            },
            None => self.store.write(id, AssetKind::DecodedSound, bytes),
        }
        Ok(())
    }

    /// Moves a fully written partial container into place.
    ///
    /// Fails, and removes the partial file, unless it holds exactly
    /// `expected` bytes.
    pub fn commit_partial(&self, id: AssetId, expected: u64) -> DecodeResult<()> {
        let (Some(partial), Some(path)) = (self.partial_path_for(id), self.path_for(id)) else {
            return Err(StoreError::NotFound(id).into());
        };
        let written = fs::metadata(&partial)?.len();
        if written != expected {
            remove_file_logged(&partial);
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("decoded container for {id} is {written} of {expected} bytes"),
            )
            .into());
        }
        fs::rename(&partial, &path)?;
        debug!("Committed decoded container {}", path.display());
        Ok(())
    }

    /// Drops any partial container left by an abandoned write.
    pub fn discard_partial(&self, id: AssetId) {
        if let Some(partial) = self.partial_path_for(id) {
            remove_file_logged(&partial);
        }
    }

    /// Drops any decoded container for `id`.
    pub fn remove(&self, id: AssetId) {
        match self.path_for(id) {
            Some(path) => remove_file_logged(&path),
            None => {
                self.store.remove(id, AssetKind::DecodedSound);
            },
        }
    }
}

fn remove_file_logged(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {},
        Err(e) if e.kind() == io::ErrorKind::NotFound => {},
        Err(e) => warn!("Failed to remove {}: {e}", path.display()),
    }
}

/// `<dir>/<asset>.dsf`
#[must_use]
pub fn decoded_path(dir: &Path, id: AssetId) -> PathBuf {
    dir.join(format!("{id}.{DECODED_EXTENSION}"))
}

/// `<dir>/<asset>.dsf.tmp`
#[must_use]
pub fn partial_path(dir: &Path, id: AssetId) -> PathBuf {
    dir.join(format!("{id}.{DECODED_EXTENSION}.{PARTIAL_SUFFIX}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryAssetStore::new();
        let id = AssetId::generate();
        assert!(!store.exists(id, AssetKind::Sound));

        store.insert(id, AssetKind::Sound, vec![1u8, 2, 3]);
        assert!(store.exists(id, AssetKind::Sound));
        assert!(!store.exists(id, AssetKind::DecodedSound));

        let mut file = store.open(id, AssetKind::Sound).expect("should open");
        let mut out = Vec::new();
        file.read_to_end(&mut out).expect("should read");
        assert_eq!(out, vec![1, 2, 3]);

        assert!(store.remove(id, AssetKind::Sound));
        assert!(!store.remove(id, AssetKind::Sound));
        assert!(store.is_empty());
    }

    #[test]
    fn test_asset_file_seek_tell() {
        let mut file = AssetFile::new(Arc::from(vec![0u8, 1, 2, 3, 4, 5]));
        assert_eq!(file.size(), 6);
        assert_eq!(file.seek(SeekFrom::End(-2)).expect("seek"), 4);
        assert_eq!(file.tell(), 4);
        let mut buf = [0u8; 8];
        assert_eq!(file.read(&mut buf).expect("read"), 2);
        assert_eq!(&buf[..2], &[4, 5]);
        assert_eq!(file.read(&mut buf).expect("read"), 0);
        assert!(file.seek(SeekFrom::Current(-10)).is_err());
        file.seek(SeekFrom::Start(1)).expect("seek");
        assert_eq!(file.read(&mut buf[..1]).expect("read"), 1);
        assert_eq!(buf[0], 1);
    }

    #[test]
    fn test_decoded_cache_in_store() {
        let store = Arc::new(MemoryAssetStore::new());
        let cache = DecodedCache::in_store(store.clone());
        let id = AssetId::generate();

        assert!(!cache.contains(id));
        assert!(cache.read(id).is_err());
        cache.store_now(id, vec![9, 9]).expect("should store");
        assert!(cache.contains(id));
        assert_eq!(cache.read(id).expect("should read"), vec![9, 9]);
        assert!(store.exists(id, AssetKind::DecodedSound));

        cache.remove(id);
        assert!(!cache.contains(id));
    }

    #[test]
    fn test_decoded_cache_persisted_paths() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = DecodedCache::persisted(Arc::new(MemoryAssetStore::new()), dir.path());
        let id = AssetId::generate();

        let path = cache.path_for(id).expect("should have path");
        assert!(path.to_string_lossy().ends_with(".dsf"));
        assert!(!cache.contains(id));

        cache.store_now(id, vec![1, 2, 3]).expect("should store");
        assert!(path.is_file());
        assert!(cache.contains(id));
        assert_eq!(cache.read(id).expect("read"), vec![1, 2, 3]);
    }

    #[test]
    fn test_partial_container_not_visible_until_committed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = DecodedCache::persisted(Arc::new(MemoryAssetStore::new()), dir.path());
        let id = AssetId::generate();
        let partial = cache.partial_path_for(id).expect("partial path");
        assert!(partial.to_string_lossy().ends_with(".dsf.tmp"));

        fs::write(&partial, [0u8; 10]).expect("write partial");
        assert!(!cache.contains(id));

        cache.commit_partial(id, 10).expect("commit");
        assert!(!partial.exists());
        assert!(cache.contains(id));
    }

    #[test]
    fn test_short_partial_container_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = DecodedCache::persisted(Arc::new(MemoryAssetStore::new()), dir.path());
        let id = AssetId::generate();
        let partial = cache.partial_path_for(id).expect("partial path");
        fs::write(&partial, [0u8; 4]).expect("write partial");

        assert!(cache.commit_partial(id, 16).is_err());
        assert!(!partial.exists());
        assert!(!cache.contains(id));
    }

    #[test]
    fn test_remove_missing_file_is_quiet() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = DecodedCache::persisted(Arc::new(MemoryAssetStore::new()), dir.path());
        let id = AssetId::generate();
        cache.remove(id);
        cache.discard_partial(id);
        assert!(!cache.contains(id));
    }
}
