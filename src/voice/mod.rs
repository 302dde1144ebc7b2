//! Voice audio path
//!
//! Capture, PCM codec and scheduled playback, over the device traits in
//! [`device`]. The cpal backend is the production implementation.

pub mod capture;
pub mod codec;
pub mod device;
pub mod playback;

pub use capture::{FRAME_SIZE, FrameAssembler, FrameHandler, SAMPLE_RATE, samples_to_wav};
pub use codec::{AudioFrame, Direction, PcmBlob};
pub use device::{AudioBackend, AudioSink, AudioSource, CpalBackend};
pub use playback::{PLAYBACK_SAMPLE_RATE, PlaybackScheduler, ScheduledChunk};
