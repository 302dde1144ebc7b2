//! Microphone capture pipeline
//!
//! The device callback feeds a [`FrameAssembler`]; whole frames go over a
//! bounded channel to the session, where a [`FrameHandler`] meters and
//! encodes them.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;

use super::codec::{self, AudioFrame, PcmBlob};
use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Samples per captured frame
pub const FRAME_SIZE: usize = 4096;

/// Frames buffered between the device callback and the session
pub const FRAME_CHANNEL_CAPACITY: usize = 16;

/// Cuts an arbitrary callback stream into fixed-size frames
#[derive(Debug)]
pub struct FrameAssembler {
    frame_size: usize,
    pending: Vec<f32>,
}

impl FrameAssembler {
    #[must_use]
    pub fn new(frame_size: usize) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            frame_size,
            pending: Vec::with_capacity(frame_size),
        }
    }

    /// Append `data`, returning every frame it completes
    ///
    /// Leftover samples are kept for the next call.
    pub fn push(&mut self, mut data: &[f32]) -> Vec<Vec<f32>> {
        let mut frames = Vec::new();

        while !data.is_empty() {
            let take = (self.frame_size - self.pending.len()).min(data.len());
            self.pending.extend_from_slice(&data[..take]);
            data = &data[take..];

            if self.pending.len() == self.frame_size {
                frames.push(std::mem::replace(
                    &mut self.pending,
                    Vec::with_capacity(self.frame_size),
                ));
            }
        }

        frames
    }

    /// Samples waiting for the next frame
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Per-session consumer of captured frames
#[derive(Debug)]
pub struct FrameHandler {
    muted: Arc<AtomicBool>,
    volume: watch::Sender<f32>,
}

impl FrameHandler {
    #[must_use]
    pub fn new(muted: Arc<AtomicBool>) -> Self {
        let (volume, _) = watch::channel(0.0);
        Self { muted, volume }
    }

    /// Meter and encode a frame; `None` while muted
    ///
    /// Muted frames are dropped before any metering or encoding.
    pub fn handle(&self, frame: &AudioFrame) -> Option<PcmBlob> {
        if self.muted.load(Ordering::Relaxed) {
            return None;
        }

        self.volume.send_replace(codec::rms(frame.samples()));
        Some(codec::encode_frame(frame))
    }

    /// Input level observer
    #[must_use]
    pub fn volume(&self) -> watch::Receiver<f32> {
        self.volume.subscribe()
    }

    pub fn reset_volume(&self) {
        self.volume.send_replace(0.0);
    }
}

/// Convert f32 samples to WAV bytes
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            writer
                .write_sample(codec::quantize(sample))
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::codec::Direction;

    #[test]
    fn assembler_carries_partial_frames() {
        let mut assembler = FrameAssembler::new(4);

        assert!(assembler.push(&[0.1, 0.2, 0.3]).is_empty());
        assert_eq!(assembler.pending(), 3);

        let frames = assembler.push(&[0.4, 0.5, 0.6, 0.7, 0.8, 0.9]);
        assert_eq!(frames, vec![vec![0.1, 0.2, 0.3, 0.4], vec![0.5, 0.6, 0.7, 0.8]]);
        assert_eq!(assembler.pending(), 1);
    }

    #[test]
    fn muted_frames_skip_metering() {
        let muted = Arc::new(AtomicBool::new(true));
        let handler = FrameHandler::new(Arc::clone(&muted));
        let volume = handler.volume();
        let frame = AudioFrame::new(vec![0.5; 8], SAMPLE_RATE, Direction::Capture);

        assert!(handler.handle(&frame).is_none());
        assert!(volume.borrow().abs() < f32::EPSILON);

        muted.store(false, Ordering::Relaxed);
        let blob = handler.handle(&frame).unwrap();
        assert_eq!(blob.mime_type, "audio/pcm;rate=16000");
        assert!((*volume.borrow() - 0.5).abs() < 1e-6);

        handler.reset_volume();
        assert!(volume.borrow().abs() < f32::EPSILON);
    }

    #[test]
    fn wav_has_riff_header() {
        let wav = samples_to_wav(&[0.0, 0.5, -0.5], SAMPLE_RATE).unwrap();
        assert_eq!(&wav[..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
    }
}
