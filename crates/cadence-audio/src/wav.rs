//! 16-bit PCM container handling.
//!
//! Decoded assets are stored as a canonical 44-byte RIFF/WAVE header followed
//! by interleaved little-endian `i16` samples. The decoder writes the header
//! up front with placeholder lengths and patches them once the size is known.

use std::io::Cursor;
use std::time::Duration;

use cadence_common::{DecodeError, DecodeResult};

/// Size of the fixed container header.
pub const WAV_HEADER_SIZE: usize = 44;

/// Upper bound on samples faded at each end of a decoded container.
pub const MAX_CROSSFADE_SAMPLES: usize = 128;

const BITS_PER_SAMPLE: u16 = 16;
const FORMAT_PCM: u16 = 1;
const FMT_CHUNK_SIZE: u32 = 16;

/// Offset of the overall (RIFF) length field.
const RIFF_LENGTH_OFFSET: usize = 4;
/// Offset of the data chunk length field.
const DATA_LENGTH_OFFSET: usize = 40;

/// Appends a container header with zeroed length fields to `out`.
pub fn write_header(out: &mut Vec<u8>, channels: u16, sample_rate: u32) {
    let block_align = channels * (BITS_PER_SAMPLE / 8);
    let byte_rate = sample_rate * u32::from(block_align);

    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&FMT_CHUNK_SIZE.to_le_bytes());
    out.extend_from_slice(&FORMAT_PCM.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&BITS_PER_SAMPLE.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&0u32.to_le_bytes());
}

/// Fills in the data and overall length fields from the container size.
///
/// Returns the data length in bytes, or `None` if `container` is shorter
/// than a header or too long for the 32-bit length fields.
pub fn patch_lengths(container: &mut [u8]) -> Option<u32> {
    let data_length = data_length_for(container.len())?;
    container[DATA_LENGTH_OFFSET..DATA_LENGTH_OFFSET + 4]
        .copy_from_slice(&data_length.to_le_bytes());
    container[RIFF_LENGTH_OFFSET..RIFF_LENGTH_OFFSET + 4]
        .copy_from_slice(&(data_length + RIFF_OVERHEAD).to_le_bytes());
    Some(data_length)
}

/// Header bytes counted by the overall length field.
const RIFF_OVERHEAD: u32 = WAV_HEADER_SIZE as u32 - 8;

/// Data chunk length for a container of `total` bytes, if it is representable.
fn data_length_for(total: usize) -> Option<u32> {
    let data = total.checked_sub(WAV_HEADER_SIZE)?;
    u32::try_from(data)
        .ok()
        .filter(|len| len.checked_add(RIFF_OVERHEAD).is_some())
}

fn read_u32(container: &[u8], offset: usize) -> Option<u32> {
    let bytes = container.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// The data chunk length recorded in the header.
#[must_use]
pub fn data_length(container: &[u8]) -> Option<u32> {
    read_u32(container, DATA_LENGTH_OFFSET)
}

/// The overall length recorded in the header (file size minus 8).
#[must_use]
pub fn riff_length(container: &[u8]) -> Option<u32> {
    read_u32(container, RIFF_LENGTH_OFFSET)
}

/// Number of samples faded at each end for `data_bytes` of sample data.
#[must_use]
pub fn crossfade_len(data_bytes: usize) -> usize {
    MAX_CROSSFADE_SAMPLES.min(data_bytes / 8)
}

/// Applies a linear fade-in at the start and fade-out at the end of the
/// sample data (everything after the header).
///
/// Returns how many samples were faded at each end.
pub fn apply_crossfade(data: &mut [u8]) -> usize {
    let fade = crossfade_len(data.len());
    if fade == 0 {
        return 0;
    }
    let total = data.len() / 2;
    let scale = |data: &mut [u8], index: usize, factor: usize| {
        let at = index * 2;
        let sample = i16::from_le_bytes([data[at], data[at + 1]]);
        let faded = (f32::from(sample) * factor as f32 / fade as f32).floor() as i16;
        data[at..at + 2].copy_from_slice(&faded.to_le_bytes());
    };

    for i in 0..fade {
        scale(data, i, i);
    }
    let tail = total - fade;
    for k in 0..fade {
        scale(data, tail + k, fade - 1 - k);
    }
    fade
}

/// Decoded 16-bit PCM ready to hand to a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmData {
    /// Interleaved samples.
    pub samples: Vec<i16>,
    /// Interleaved channel count.
    pub channels: u16,
    /// Frames per second.
    pub sample_rate: u32,
}

impl PcmData {
    /// Number of sample frames.
    #[must_use]
    pub fn frames(&self) -> u32 {
        if self.channels == 0 {
            return 0;
        }
        (self.samples.len() / self.channels as usize) as u32
    }

    /// Playback length.
    #[must_use]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(f64::from(self.frames()) / f64::from(self.sample_rate))
    }
}

/// Parses a container produced by the decoder (or any 16-bit PCM WAV).
pub fn read_pcm(bytes: &[u8]) -> DecodeResult<PcmData> {
    let reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| DecodeError::BadContainer(e.to_string()))?;
    let spec = reader.spec();
    if spec.bits_per_sample != BITS_PER_SAMPLE || spec.sample_format != hound::SampleFormat::Int {
        return Err(DecodeError::BadContainer(format!(
            "unsupported sample format: {} bit {:?}",
            spec.bits_per_sample, spec.sample_format
        )));
    }
    let samples = reader
        .into_samples::<i16>()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| DecodeError::BadContainer(e.to_string()))?;
    Ok(PcmData {
        samples,
        channels: spec.channels,
        sample_rate: spec.sample_rate,
    })
}

/// Builds a complete container around `samples`.
#[must_use]
pub fn encode_pcm(samples: &[i16], channels: u16, sample_rate: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(WAV_HEADER_SIZE + samples.len() * 2);
    write_header(&mut out, channels, sample_rate);
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    patch_lengths(&mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_header_layout() {
        let mut out = Vec::new();
        write_header(&mut out, 2, 44_100);
        assert_eq!(out.len(), WAV_HEADER_SIZE);
        assert_eq!(&out[0..4], b"RIFF");
        assert_eq!(&out[8..12], b"WAVE");
        assert_eq!(&out[12..16], b"fmt ");
        assert_eq!(&out[36..40], b"data");
        // byte rate = 44100 * 2 channels * 2 bytes
        assert_eq!(read_u32(&out, 28), Some(176_400));
    }

    #[test]
    fn test_patch_lengths() {
        let mut container = encode_pcm(&[1, 2, 3, 4, 5], 1, 22_050);
        let total = container.len() as u32;
        assert_eq!(data_length(&container), Some(total - 44));
        assert_eq!(riff_length(&container), Some(total - 8));

        assert_eq!(patch_lengths(&mut container[..10]), None);
    }

    #[test]
    fn test_oversized_data_rejected() {
        assert_eq!(data_length_for(WAV_HEADER_SIZE), Some(0));
        let largest = (u32::MAX - RIFF_OVERHEAD) as usize;
        assert_eq!(data_length_for(WAV_HEADER_SIZE + largest), Some(u32::MAX - 36));
        assert_eq!(data_length_for(WAV_HEADER_SIZE + largest + 1), None);
        assert_eq!(data_length_for(usize::MAX), None);
    }

    #[test]
    fn test_read_pcm_roundtrip() {
        let samples: Vec<i16> = (0..200).map(|i| (i * 37 - 3000) as i16).collect();
        let bytes = encode_pcm(&samples, 2, 48_000);
        let pcm = read_pcm(&bytes).expect("should parse");
        assert_eq!(pcm.channels, 2);
        assert_eq!(pcm.sample_rate, 48_000);
        assert_eq!(pcm.frames(), 100);
        assert_eq!(pcm.samples, samples);
    }

    #[test]
    fn test_read_pcm_rejects_garbage() {
        assert!(read_pcm(b"definitely not a wav file").is_err());
    }

    #[test]
    fn test_crossfade_ramps() {
        let samples = vec![1000i16; 2048];
        let mut bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let fade = apply_crossfade(&mut bytes);
        assert_eq!(fade, MAX_CROSSFADE_SAMPLES);

        let out: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(out[0], 0);
        assert_eq!(out[64], 500);
        assert_eq!(out[fade], 1000);
        assert_eq!(out[out.len() - fade - 1], 1000);
        assert_eq!(out[out.len() - 1], 0);
    }

    #[test]
    fn test_crossfade_short_data() {
        let mut bytes = vec![0x10u8; 6];
        assert_eq!(apply_crossfade(&mut bytes), 0);
        assert_eq!(bytes, vec![0x10u8; 6]);
    }

    proptest! {
        #[test]
        fn prop_crossfade_bounded(samples in proptest::collection::vec(any::<i16>(), 0..1200)) {
            let original: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
            let mut faded = original.clone();
            let fade = apply_crossfade(&mut faded);
            prop_assert!(fade <= MAX_CROSSFADE_SAMPLES.min(original.len() / 8));

            let n = samples.len();
            for i in fade..n.saturating_sub(fade) {
                prop_assert_eq!(&faded[i * 2..i * 2 + 2], &original[i * 2..i * 2 + 2]);
            }
        }
    }
}
