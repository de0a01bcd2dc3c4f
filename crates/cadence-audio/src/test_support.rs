//! Helpers shared by unit tests.
//!
//! `RawCodec` understands a trivial "compressed" format so decode tests do not
//! need an Ogg encoder: `TPCM`, channels (u16 LE), rate (u32 LE), then raw
//! little-endian `i16` samples. A `TBAD` header decodes a few bytes and then
//! reports a stream error. A `TBIG` header decodes normally but declares an
//! absurd frame count.

use std::io::Read;

use cadence_common::{DecodeError, DecodeResult};

use crate::codec::{PcmStream, StreamCodec, StreamSpec};
use crate::store::AssetFile;

const GOOD_MAGIC: &[u8; 4] = b"TPCM";
const BAD_MAGIC: &[u8; 4] = b"TBAD";
const BIG_MAGIC: &[u8; 4] = b"TBIG";
const HEADER_LEN: usize = 10;

/// Encodes samples in the test format.
pub fn raw_asset(samples: &[i16], channels: u16, sample_rate: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + samples.len() * 2);
    out.extend_from_slice(GOOD_MAGIC);
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

/// A test asset whose stream fails after `good_bytes` bytes.
pub fn failing_asset(good_bytes: usize) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(BAD_MAGIC);
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&8000u32.to_le_bytes());
    out.extend(std::iter::repeat(0x11u8).take(good_bytes));
    out
}

/// A test asset that claims to hold `u64::MAX / 2` frames.
pub fn overstated_asset(samples: &[i16], channels: u16, sample_rate: u32) -> Vec<u8> {
    let mut out = raw_asset(samples, channels, sample_rate);
    out[..4].copy_from_slice(BIG_MAGIC);
    out
}

/// A deterministic ramp of `len` samples.
pub fn ramp(len: usize) -> Vec<i16> {
    (0..len).map(|i| ((i * 97) % 20_000) as i16 - 10_000).collect()
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RawCodec;

impl StreamCodec for RawCodec {
    fn open(&self, mut file: AssetFile) -> DecodeResult<Box<dyn PcmStream>> {
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        if bytes.len() < HEADER_LEN {
            return Err(DecodeError::NotAStream("too short".to_string()));
        }
        let (fails, overstated) = match &bytes[..4] {
            m if m == GOOD_MAGIC => (false, false),
            m if m == BAD_MAGIC => (true, false),
            m if m == BIG_MAGIC => (false, true),
            _ => return Err(DecodeError::NotAStream("bad magic".to_string())),
        };
        let channels = u16::from_le_bytes([bytes[4], bytes[5]]);
        let sample_rate = u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]);
        let body = bytes.split_off(HEADER_LEN);
        let total_frames = if overstated {
            u64::MAX / 2
        } else {
            (body.len() / 2 / channels.max(1) as usize) as u64
        };
        Ok(Box::new(RawStream {
            spec: StreamSpec {
                channels,
                sample_rate,
                total_frames: Some(total_frames),
            },
            body,
            cursor: 0,
            fails,
        }))
    }
}

struct RawStream {
    spec: StreamSpec,
    body: Vec<u8>,
    cursor: usize,
    fails: bool,
}

impl PcmStream for RawStream {
    fn spec(&self) -> StreamSpec {
        self.spec
    }

    fn read(&mut self, out: &mut [u8]) -> DecodeResult<usize> {
        if self.cursor >= self.body.len() {
            if self.fails {
                return Err(DecodeError::Stream("corrupt packet".to_string()));
            }
            return Ok(0);
        }
        // Hand out small pieces so callers have to loop.
        let n = (self.body.len() - self.cursor).min(out.len()).min(1000);
        out[..n].copy_from_slice(&self.body[self.cursor..self.cursor + n]);
        self.cursor += n;
        Ok(n)
    }
}
