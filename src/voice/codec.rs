//! PCM16 audio codec
//!
//! Float samples in `[-1.0, 1.0]` travel as little-endian signed 16-bit
//! PCM, base64 encoded, tagged with an `audio/pcm;rate=N` MIME type.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Scale between float samples and i16
const PCM_SCALE: f32 = 32768.0;

/// Which way an audio frame is travelling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Microphone to remote
    Capture,
    /// Remote to speaker
    Playback,
}

/// Immutable block of mono samples at a fixed rate
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Arc<[f32]>,
    sample_rate: u32,
    direction: Direction,
}

impl AudioFrame {
    #[must_use]
    pub fn new(samples: impl Into<Arc<[f32]>>, sample_rate: u32, direction: Direction) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
            direction,
        }
    }

    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Shared sample buffer
    #[must_use]
    pub fn shared_samples(&self) -> Arc<[f32]> {
        Arc::clone(&self.samples)
    }

    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[must_use]
    pub const fn direction(&self) -> Direction {
        self.direction
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }
}

/// Base64 PCM payload with its MIME type, as carried on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PcmBlob {
    #[serde(default)]
    pub mime_type: String,
    pub data: String,
}

/// MIME type for raw PCM at `sample_rate`
#[must_use]
pub fn mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={sample_rate}")
}

/// Quantize one float sample to i16, clamping out-of-range input
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn quantize(sample: f32) -> i16 {
    (sample * PCM_SCALE).round().clamp(-32768.0, 32767.0) as i16
}

/// Encode float samples as a base64 PCM16 blob
#[must_use]
pub fn encode(samples: &[f32], sample_rate: u32) -> PcmBlob {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        bytes.extend_from_slice(&quantize(sample).to_le_bytes());
    }

    PcmBlob {
        mime_type: mime_type(sample_rate),
        data: STANDARD.encode(bytes),
    }
}

/// Encode an audio frame at its own sample rate
#[must_use]
pub fn encode_frame(frame: &AudioFrame) -> PcmBlob {
    encode(frame.samples(), frame.sample_rate())
}

/// Decode a PCM16 blob
///
/// The rate comes from the MIME `rate=` parameter, falling back to
/// `default_rate`. A trailing odd byte is ignored.
///
/// # Errors
///
/// Returns error if the MIME type is not raw PCM or the payload is not
/// valid base64
pub fn decode(blob: &PcmBlob, default_rate: u32, direction: Direction) -> Result<AudioFrame> {
    let sample_rate = parse_rate(&blob.mime_type)?.unwrap_or(default_rate);

    let bytes = STANDARD
        .decode(blob.data.as_bytes())
        .map_err(|e| Error::Codec(format!("invalid base64: {e}")))?;

    let samples: Vec<f32> = bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / PCM_SCALE)
        .collect();

    Ok(AudioFrame::new(samples, sample_rate, direction))
}

/// Parse the `rate=` parameter of a PCM MIME type
///
/// An empty MIME type is treated as PCM with no rate.
fn parse_rate(mime: &str) -> Result<Option<u32>> {
    let mut parts = mime.split(';').map(str::trim);
    let essence = parts.next().unwrap_or_default().to_ascii_lowercase();

    if !essence.is_empty() && essence != "audio/pcm" && essence != "audio/l16" {
        return Err(Error::Codec(format!("unsupported mime type: {mime}")));
    }

    for param in parts {
        if let Some((key, value)) = param.split_once('=')
            && key.trim().eq_ignore_ascii_case("rate")
        {
            let rate = value
                .trim()
                .parse::<u32>()
                .map_err(|_| Error::Codec(format!("invalid sample rate in {mime}")))?;
            if rate == 0 {
                return Err(Error::Codec(format!("invalid sample rate in {mime}")));
            }
            return Ok(Some(rate));
        }
    }

    Ok(None)
}

/// Root-mean-square level of `samples` (0 for empty input)
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

/// Linearly resample mono samples from one rate to another
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = f64::from(from_rate) / f64::from(to_rate);
    let out_len = ((samples.len() as f64) / ratio).round().max(1.0) as usize;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let index = (pos.floor() as usize).min(last);
            let next = (index + 1).min(last);
            let frac = (pos - index as f64) as f32;
            samples[index].mul_add(1.0 - frac, samples[next] * frac)
        })
        .collect()
}
