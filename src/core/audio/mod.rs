//! PCM pipeline for inbound microphone audio.
//!
//! Browser frames arrive as little-endian float32 or int16 samples at an
//! arbitrary rate; the upstream service only accepts 16 kHz mono int16.
//! `PcmProcessor::process` decodes, resamples, and re-encodes one frame at
//! a time, carrying resampler state across calls so batch boundaries do
//! not produce seams.

use std::fmt;

use serde::Deserialize;
use thiserror::Error;

/// Sample rate the upstream service expects.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Sample encoding of inbound browser audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum Encoding {
    #[default]
    #[serde(rename = "f32le")]
    F32le,
    #[serde(rename = "s16le")]
    S16le,
}

impl Encoding {
    fn sample_size(self) -> usize {
        match self {
            Self::F32le => 4,
            Self::S16le => 2,
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::F32le => "f32le",
            Self::S16le => "s16le",
        })
    }
}

/// Declared format of the inbound stream, taken from the start handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputFormat {
    pub sample_rate: u32,
    pub encoding: Encoding,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AudioError {
    #[error("invalid sample rate {0}")]
    InvalidSampleRate(u32),

    #[error("unaligned {encoding} frame of {len} bytes")]
    UnalignedFrame { encoding: Encoding, len: usize },
}

/// Decode → resample → re-encode stage. One instance per session; not
/// shareable across streams because the resampler carries state.
#[derive(Debug)]
pub struct PcmProcessor {
    format: InputFormat,
    resampler: Option<LinearResampler>,
}

impl PcmProcessor {
    pub fn new(format: InputFormat) -> Result<Self, AudioError> {
        if format.sample_rate == 0 {
            return Err(AudioError::InvalidSampleRate(format.sample_rate));
        }
        let resampler = (format.sample_rate != TARGET_SAMPLE_RATE)
            .then(|| LinearResampler::new(format.sample_rate, TARGET_SAMPLE_RATE));
        Ok(Self { format, resampler })
    }

    /// Convert one inbound frame to 16 kHz mono s16le bytes. Empty input
    /// and frames swallowed by the resampler yield an empty output.
    pub fn process(&mut self, frame: &[u8]) -> Result<Vec<u8>, AudioError> {
        let samples = decode_samples(frame, self.format.encoding)?;
        if samples.is_empty() {
            return Ok(Vec::new());
        }
        let samples = match &mut self.resampler {
            Some(resampler) => resampler.process(&samples),
            None => samples,
        };
        Ok(encode_s16le(&samples))
    }
}

fn decode_samples(data: &[u8], encoding: Encoding) -> Result<Vec<f32>, AudioError> {
    if data.len() % encoding.sample_size() != 0 {
        return Err(AudioError::UnalignedFrame {
            encoding,
            len: data.len(),
        });
    }
    let samples = match encoding {
        Encoding::F32le => data
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
        Encoding::S16le => data
            .chunks_exact(2)
            .map(|chunk| f32::from(i16::from_le_bytes([chunk[0], chunk[1]])) / 32768.0)
            .collect(),
    };
    Ok(samples)
}

fn encode_s16le(samples: &[f32]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        buf.extend_from_slice(&quantize(sample).to_le_bytes());
    }
    buf
}

/// Clamp to [-1, 1] and quantize, rounding halves away from zero.
fn quantize(value: f32) -> i16 {
    (f64::from(value.clamp(-1.0, 1.0)) * 32767.0).round() as i16
}

/// Streaming linear interpolator.
///
/// The fractional read position and the final sample of each batch are the
/// only state carried between calls; the tail is prepended to the next
/// batch so an interpolation window straddling the boundary still sees
/// both neighbours.
#[derive(Debug)]
struct LinearResampler {
    step: f64,
    pos: f64,
    last: Option<f32>,
    work: Vec<f32>,
}

impl LinearResampler {
    fn new(src_rate: u32, dst_rate: u32) -> Self {
        Self {
            step: f64::from(src_rate) / f64::from(dst_rate),
            pos: 0.0,
            last: None,
            work: Vec::new(),
        }
    }

    fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        if samples.is_empty() {
            return Vec::new();
        }
        let mut work = std::mem::take(&mut self.work);
        let data: &[f32] = match self.last {
            Some(last) => {
                work.clear();
                work.reserve(samples.len() + 1);
                work.push(last);
                work.extend_from_slice(samples);
                &work
            }
            None => samples,
        };

        let last_idx = data.len() - 1;
        if last_idx == 0 {
            self.last = Some(data[0]);
            self.work = work;
            return Vec::new();
        }

        let mut out = Vec::with_capacity((samples.len() as f64 / self.step) as usize + 4);
        let mut pos = self.pos;
        loop {
            let idx = pos as usize;
            let next = idx + 1;
            if next > last_idx {
                break;
            }
            let frac = (pos - idx as f64) as f32;
            out.push(data[idx] * (1.0 - frac) + data[next] * frac);
            pos += self.step;
        }
        let tail = data[last_idx];
        self.pos = (pos - last_idx as f64).max(0.0);
        self.last = Some(tail);
        self.work = work;
        out
    }
}
