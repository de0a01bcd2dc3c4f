//! Per-asset playback bookkeeping.

use cadence_common::AssetId;

use crate::buffer::BufferId;

/// Lifecycle flags for one sound asset, shared by every source playing it.
///
/// The buffer slot is a non-owning reference into the engine's buffer pool;
/// the pool clears it when the buffer is taken over or flushed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioData {
    id: AssetId,
    buffer: Option<BufferId>,
    has_local: bool,
    has_decoded: bool,
    valid: bool,
}

impl AudioData {
    /// New entry. A decoded asset is also considered local.
    #[must_use]
    pub const fn new(id: AssetId, has_decoded: bool, has_local: bool) -> Self {
        Self {
            id,
            buffer: None,
            has_local: has_local || has_decoded,
            has_decoded,
            valid: true,
        }
    }

    /// Asset identity.
    #[must_use]
    pub const fn id(&self) -> AssetId {
        self.id
    }

    /// Buffer currently holding this asset's samples.
    #[must_use]
    pub const fn buffer(&self) -> Option<BufferId> {
        self.buffer
    }

    pub(crate) fn set_buffer(&mut self, buffer: Option<BufferId>) {
        self.buffer = buffer;
    }

    /// Compressed bytes are available.
    #[must_use]
    pub const fn has_local(&self) -> bool {
        self.has_local
    }

    /// A decoded container exists.
    #[must_use]
    pub const fn has_decoded(&self) -> bool {
        self.has_decoded
    }

    /// False once the asset failed to transfer or decode.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.valid
    }

    /// Sets the local flag.
    pub fn set_has_local(&mut self, has_local: bool) {
        self.has_local = has_local;
    }

    /// Sets the decoded flag.
    pub fn set_has_decoded(&mut self, has_decoded: bool) {
        self.has_decoded = has_decoded;
    }

    /// Sets the valid flag.
    pub fn set_valid(&mut self, valid: bool) {
        self.valid = valid;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoded_implies_local() {
        let data = AudioData::new(AssetId::generate(), true, false);
        assert!(data.has_local());
        assert!(data.has_decoded());
        assert!(data.is_valid());
        assert_eq!(data.buffer(), None);
    }

    #[test]
    fn test_flags_independent() {
        let mut data = AudioData::new(AssetId::generate(), false, false);
        assert!(!data.has_local());
        data.set_has_local(true);
        data.set_valid(false);
        assert!(data.has_local());
        assert!(!data.is_valid());
        assert!(!data.has_decoded());
    }
}
