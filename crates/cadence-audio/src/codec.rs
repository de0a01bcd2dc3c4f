//! Compressed stream decoding.
//!
//! A [`StreamCodec`] opens an [`AssetFile`] and yields a [`PcmStream`] that
//! produces interleaved little-endian 16-bit PCM in caller-sized chunks.
//! The production codec is Ogg Vorbis on top of symphonia.

use std::io;

use cadence_common::{DecodeError, DecodeResult};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

use crate::store::AssetFile;

/// Shape of the PCM a stream produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSpec {
    /// Interleaved channel count.
    pub channels: u16,
    /// Frames per second.
    pub sample_rate: u32,
    /// Total frames if the container declares it.
    pub total_frames: Option<u64>,
}

impl StreamSpec {
    /// Expected decoded size in bytes, used to pre-size the output buffer.
    /// `None` when undeclared or too large to represent.
    #[must_use]
    pub fn size_hint(&self) -> Option<usize> {
        let frames = usize::try_from(self.total_frames?).ok()?;
        frames
            .checked_mul(usize::from(self.channels))?
            .checked_mul(2)
    }
}

/// An open, partially consumed compressed stream.
pub trait PcmStream: Send {
    /// Channel layout and rate of the decoded output.
    fn spec(&self) -> StreamSpec;

    /// Decodes up to `out.len()` bytes of PCM. `Ok(0)` means end of stream.
    fn read(&mut self, out: &mut [u8]) -> DecodeResult<usize>;
}

/// Opens compressed assets.
pub trait StreamCodec: Send + Sync {
    /// Opens a stream over `file`. Fails if the bytes are not a stream this
    /// codec understands.
    fn open(&self, file: AssetFile) -> DecodeResult<Box<dyn PcmStream>>;
}

impl MediaSource for AssetFile {
    fn is_seekable(&self) -> bool {
        true
    }

    fn byte_len(&self) -> Option<u64> {
        Some(self.size())
    }
}

/// Ogg Vorbis decoding via symphonia.
#[derive(Debug, Default, Clone, Copy)]
pub struct VorbisCodec;

impl StreamCodec for VorbisCodec {
    fn open(&self, file: AssetFile) -> DecodeResult<Box<dyn PcmStream>> {
        let mss = MediaSourceStream::new(Box::new(file), Default::default());
        let mut hint = Hint::new();
        hint.with_extension("ogg");

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| DecodeError::NotAStream(e.to_string()))?;
        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| DecodeError::NotAStream("no audio track".to_string()))?;
        let track_id = track.id;
        let params = track.codec_params.clone();

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| DecodeError::NotAStream(e.to_string()))?;

        let channels = params.channels.map_or(0, |c| c.count() as u16);
        let sample_rate = params.sample_rate.unwrap_or(0);
        if channels == 0 || sample_rate == 0 {
            return Err(DecodeError::NotAStream(
                "stream does not declare channels and rate".to_string(),
            ));
        }
        let spec = StreamSpec {
            channels,
            sample_rate,
            total_frames: params.n_frames,
        };
        debug!(
            "Opened vorbis stream: {} ch @ {} Hz, {:?} frames",
            spec.channels, spec.sample_rate, spec.total_frames
        );

        Ok(Box::new(VorbisStream {
            format,
            decoder,
            track_id,
            spec,
            pending: Vec::new(),
            cursor: 0,
        }))
    }
}

struct VorbisStream {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    spec: StreamSpec,
    /// Decoded bytes not yet handed out.
    pending: Vec<u8>,
    cursor: usize,
}

impl VorbisStream {
    /// Decodes the next packet into `pending`. Returns false at end of stream.
    fn refill(&mut self) -> DecodeResult<bool> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Ok(false);
                },
                Err(e) => return Err(DecodeError::Stream(e.to_string())),
            };
            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = self
                .decoder
                .decode(&packet)
                .map_err(|e| DecodeError::Stream(e.to_string()))?;
            if decoded.frames() == 0 {
                continue;
            }
            let mut samples = SampleBuffer::<i16>::new(decoded.capacity() as u64, *decoded.spec());
            samples.copy_interleaved_ref(decoded);

            self.pending.clear();
            self.cursor = 0;
            for sample in samples.samples() {
                self.pending.extend_from_slice(&sample.to_le_bytes());
            }
            return Ok(true);
        }
    }
}

impl PcmStream for VorbisStream {
    fn spec(&self) -> StreamSpec {
        self.spec
    }

    fn read(&mut self, out: &mut [u8]) -> DecodeResult<usize> {
        if self.cursor >= self.pending.len() && !self.refill()? {
            return Ok(0);
        }
        let available = &self.pending[self.cursor..];
        let n = available.len().min(out.len());
        out[..n].copy_from_slice(&available[..n]);
        self.cursor += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_vorbis_rejects_garbage() {
        let file = AssetFile::new(Arc::from(vec![0xABu8; 512]));
        assert!(matches!(
            VorbisCodec.open(file),
            Err(DecodeError::NotAStream(_))
        ));
    }

    #[test]
    fn test_vorbis_rejects_empty() {
        let file = AssetFile::new(Arc::from(Vec::<u8>::new()));
        assert!(VorbisCodec.open(file).is_err());
    }

    #[test]
    fn test_vorbis_fixture_stream() {
        let file = AssetFile::new(Arc::from(
            include_bytes!("../tests/data/silence.ogg").to_vec(),
        ));
        let mut stream = VorbisCodec.open(file).expect("fixture should open");
        let spec = stream.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 8000);

        let mut total = 0;
        let mut chunk = [0u8; 1000];
        loop {
            let n = stream.read(&mut chunk).expect("fixture should decode");
            if n == 0 {
                break;
            }
            total += n;
        }
        assert!(total > 0);
        assert_eq!(total % 2, 0);
    }

    #[test]
    fn test_size_hint() {
        let spec = StreamSpec {
            channels: 2,
            sample_rate: 44_100,
            total_frames: Some(1000),
        };
        assert_eq!(spec.size_hint(), Some(4000));
        let unknown = StreamSpec {
            total_frames: None,
            ..spec
        };
        assert_eq!(unknown.size_hint(), None);
    }

    #[test]
    fn test_size_hint_overflow() {
        let spec = StreamSpec {
            channels: 2,
            sample_rate: 44_100,
            total_frames: Some(u64::MAX / 2),
        };
        assert_eq!(spec.size_hint(), None);
    }
}
