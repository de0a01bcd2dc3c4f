//! Error types for Cadence.

use thiserror::Error;

use crate::ids::AssetId;

/// Top-level error type for Cadence operations.
#[derive(Debug, Error)]
pub enum CadenceError {
    /// Audio backend errors
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    /// Decode pipeline errors
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Asset store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Backend and device errors.
#[derive(Debug, Error)]
pub enum AudioError {
    /// Failed to initialize the output device.
    #[error("Failed to initialize audio device: {0}")]
    DeviceInitFailed(String),

    /// No output device available.
    #[error("No audio device available")]
    NoDevice,

    /// Failed to create a playback sink.
    #[error("Failed to create audio sink: {0}")]
    SinkCreationFailed(String),

    /// Failed to start the background writer.
    #[error("Failed to start I/O thread: {0}")]
    WorkerSpawnFailed(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while turning compressed bytes into a PCM container.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// No bytes exist for the asset.
    #[error("No source bytes for asset {0}")]
    MissingSource(AssetId),

    /// The source exists but is zero length.
    #[error("Source bytes for asset {0} are empty")]
    EmptySource(AssetId),

    /// The bytes are not a recognised compressed stream.
    #[error("Not a recognised audio stream: {0}")]
    NotAStream(String),

    /// The stream failed part way through.
    #[error("Stream error: {0}")]
    Stream(String),

    /// Decoding finished without producing any samples.
    #[error("Decode produced no samples")]
    EmptyOutput,

    /// A stored artifact was missing.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// A PCM container could not be parsed.
    #[error("Malformed PCM container: {0}")]
    BadContainer(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Asset store lookups.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Nothing is stored under this id.
    #[error("Asset {0} not found")]
    NotFound(AssetId),
}

/// Result type alias for Cadence operations.
pub type CadenceResult<T> = Result<T, CadenceError>;

/// Result type for audio backend operations.
pub type AudioResult<T> = Result<T, AudioError>;

/// Result type for decode operations.
pub type DecodeResult<T> = Result<T, DecodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_error_display() {
        let err = AudioError::NoDevice;
        assert!(err.to_string().contains("No audio device"));
    }

    #[test]
    fn test_decode_error_names_asset() {
        let id = AssetId::generate();
        let err = DecodeError::EmptySource(id);
        assert!(err.to_string().contains(&id.to_string()));
    }

    #[test]
    fn test_store_error_conversion() {
        let id = AssetId::generate();
        let err: CadenceError = StoreError::NotFound(id).into();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_error_conversion() {
        let err: CadenceError = DecodeError::EmptyOutput.into();
        assert!(matches!(err, CadenceError::Decode(DecodeError::EmptyOutput)));
    }
}
