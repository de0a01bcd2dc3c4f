//! ID types for assets, sources and their owners.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identity of a sound asset (compressed bytes, decoded container, buffer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssetId(Uuid);

impl AssetId {
    /// Null asset ID. Playing it means "stop".
    pub const NULL: Self = Self(Uuid::nil());

    /// Creates a fresh random asset ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Derives a stable ID from the asset's bytes, so the same content maps
    /// to the same ID across runs.
    #[must_use]
    pub fn from_content(bytes: &[u8]) -> Self {
        Self(Uuid::new_v5(&Uuid::NAMESPACE_OID, bytes))
    }

    /// Wraps an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn uuid(self) -> Uuid {
        self.0
    }

    /// Checks if this is the null ID.
    #[must_use]
    pub fn is_null(self) -> bool {
        self.0.is_nil()
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

impl FromStr for AssetId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Identity of one logical audio source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceId(Uuid);

impl SourceId {
    /// Null source ID.
    pub const NULL: Self = Self(Uuid::nil());

    /// Creates a fresh random source ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Checks if this is the null ID.
    #[must_use]
    pub fn is_null(self) -> bool {
        self.0.is_nil()
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

/// Identity of the world entity a sound is attributed to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId(Uuid);

impl OwnerId {
    /// Null owner (system sounds, UI).
    pub const NULL: Self = Self(Uuid::nil());

    /// Wraps an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Checks if this is the null ID.
    #[must_use]
    pub fn is_null(self) -> bool {
        self.0.is_nil()
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_id_null() {
        assert!(AssetId::NULL.is_null());
        assert!(!AssetId::generate().is_null());
    }

    #[test]
    fn test_asset_id_from_content_is_stable() {
        let a = AssetId::from_content(b"ogg bytes");
        assert_eq!(a, AssetId::from_content(b"ogg bytes"));
        assert_ne!(a, AssetId::from_content(b"other bytes"));
        assert!(!a.is_null());
    }

    #[test]
    fn test_asset_id_parse_display() {
        let id = AssetId::generate();
        let parsed: AssetId = id.to_string().parse().expect("should parse");
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<AssetId>().is_err());
    }

    #[test]
    fn test_source_id_generation() {
        let a = SourceId::generate();
        let b = SourceId::generate();
        assert_ne!(a, b);
        assert!(SourceId::NULL.is_null());
    }
}
