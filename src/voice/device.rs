//! Audio device seams and the cpal backend
//!
//! `cpal::Stream` is not `Send`, so each stream lives on its own thread
//! for as long as the owning handle is open.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, mpsc as std_mpsc};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BuildStreamError, SampleRate, StreamConfig, SupportedStreamConfigsError};
use tokio::sync::mpsc;

use super::capture::FrameAssembler;
use super::codec::{AudioFrame, Direction};
use crate::{Error, Result};

/// Microphone input producing fixed-size frames
pub trait AudioSource: Send {
    /// Rate of the frames this source produces
    fn sample_rate(&self) -> u32;

    /// Begin forwarding frames into `frames`
    ///
    /// # Errors
    ///
    /// Returns error if the source was already released
    fn start(&mut self, frames: mpsc::Sender<AudioFrame>) -> Result<()>;

    /// Stop forwarding and release the device; repeated calls are no-ops
    ///
    /// # Errors
    ///
    /// Returns error if the device could not be released cleanly
    fn stop(&mut self) -> Result<()>;
}

/// Speaker output with a sample clock and scheduled chunks
pub trait AudioSink: Send {
    fn sample_rate(&self) -> u32;

    /// Seconds of audio rendered since the sink was opened
    fn current_time(&self) -> f64;

    /// Queue `samples` to start playing at `start_time` on the sink clock
    ///
    /// # Errors
    ///
    /// Returns error if the sink was already closed
    fn schedule(&mut self, chunk_id: u64, start_time: f64, samples: Arc<[f32]>) -> Result<()>;

    /// Drop every playing and pending chunk
    fn cancel_all(&mut self);

    /// Release the output device; repeated calls are no-ops
    ///
    /// # Errors
    ///
    /// Returns error if the device could not be released cleanly
    fn close(&mut self) -> Result<()>;
}

/// Factory for audio devices
pub trait AudioBackend: Send + Sync {
    /// Acquire a mono input at `sample_rate`, cut into `frame_size` frames
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` if the platform refuses microphone
    /// access and `DeviceUnavailable` if no suitable input exists
    fn open_input(&self, sample_rate: u32, frame_size: usize) -> Result<Box<dyn AudioSource>>;

    /// Acquire an output at `sample_rate`
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnavailable` if no suitable output exists
    fn open_output(&self, sample_rate: u32) -> Result<Box<dyn AudioSink>>;
}

/// Audio backend using the platform's default cpal host
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl CpalBackend {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl AudioBackend for CpalBackend {
    fn open_input(&self, sample_rate: u32, frame_size: usize) -> Result<Box<dyn AudioSource>> {
        let target: Arc<Mutex<Option<mpsc::Sender<AudioFrame>>>> = Arc::new(Mutex::new(None));
        let callback_target = Arc::clone(&target);

        let thread = StreamThread::spawn("nexus-capture", move || {
            let host = cpal::default_host();
            let device = host
                .default_input_device()
                .ok_or_else(|| Error::DeviceUnavailable("no input device available".to_string()))?;

            let config: StreamConfig = device
                .supported_input_configs()
                .map_err(map_configs_error)?
                .find(|c| {
                    c.channels() == 1
                        && c.min_sample_rate() <= SampleRate(sample_rate)
                        && c.max_sample_rate() >= SampleRate(sample_rate)
                })
                .ok_or_else(|| {
                    Error::DeviceUnavailable(format!("no {sample_rate} Hz mono input config"))
                })?
                .with_sample_rate(SampleRate(sample_rate))
                .config();

            tracing::debug!(
                device = device.name().unwrap_or_default(),
                sample_rate,
                frame_size,
                "audio capture initialized"
            );

            let mut assembler = FrameAssembler::new(frame_size);
            device
                .build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        let Ok(guard) = callback_target.lock() else {
                            return;
                        };
                        let Some(frames) = guard.as_ref() else {
                            return;
                        };
                        for samples in assembler.push(data) {
                            let frame = AudioFrame::new(samples, sample_rate, Direction::Capture);
                            if frames.try_send(frame).is_err() {
                                tracing::debug!("capture channel full, dropping frame");
                            }
                        }
                    },
                    |err| {
                        tracing::error!(error = %err, "audio capture error");
                    },
                    None,
                )
                .map_err(map_build_error)
        })?;

        Ok(Box::new(CpalSource {
            sample_rate,
            target,
            thread: Some(thread),
        }))
    }

    fn open_output(&self, sample_rate: u32) -> Result<Box<dyn AudioSink>> {
        let timeline = Arc::new(Mutex::new(Timeline::new(sample_rate)));
        let callback_timeline = Arc::clone(&timeline);

        let thread = StreamThread::spawn("nexus-playback", move || {
            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or_else(|| {
                    Error::DeviceUnavailable("no output device available".to_string())
                })?;

            let supports = |c: &cpal::SupportedStreamConfigRange, channels: u16| {
                c.channels() == channels
                    && c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
            };

            let supported = device
                .supported_output_configs()
                .map_err(map_configs_error)?
                .find(|c| supports(c, 1))
                .or_else(|| {
                    // Fallback: try stereo
                    device
                        .supported_output_configs()
                        .ok()?
                        .find(|c| supports(c, 2))
                })
                .ok_or_else(|| {
                    Error::DeviceUnavailable(format!("no {sample_rate} Hz output config"))
                })?;

            let config: StreamConfig = supported.with_sample_rate(SampleRate(sample_rate)).config();
            let channels = usize::from(config.channels);

            tracing::debug!(
                device = device.name().unwrap_or_default(),
                sample_rate,
                channels,
                "audio playback initialized"
            );

            device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        match callback_timeline.lock() {
                            Ok(mut timeline) => timeline.render(data, channels),
                            Err(_) => data.fill(0.0),
                        }
                    },
                    |err| {
                        tracing::error!(error = %err, "audio playback error");
                    },
                    None,
                )
                .map_err(map_build_error)
        })?;

        Ok(Box::new(CpalSink {
            sample_rate,
            timeline,
            thread: Some(thread),
        }))
    }
}

/// Microphone handle backed by a cpal input stream
struct CpalSource {
    sample_rate: u32,
    target: Arc<Mutex<Option<mpsc::Sender<AudioFrame>>>>,
    thread: Option<StreamThread>,
}

impl AudioSource for CpalSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn start(&mut self, frames: mpsc::Sender<AudioFrame>) -> Result<()> {
        if self.thread.is_none() {
            return Err(Error::Audio("capture already released".to_string()));
        }
        let mut target = self
            .target
            .lock()
            .map_err(|_| Error::Audio("capture state poisoned".to_string()))?;
        *target = Some(frames);

        tracing::debug!("audio capture started");
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if let Ok(mut target) = self.target.lock() {
            target.take();
        }
        let Some(mut thread) = self.thread.take() else {
            return Ok(());
        };
        thread.stop()?;

        tracing::debug!("audio capture stopped");
        Ok(())
    }
}

/// Speaker handle backed by a cpal output stream
struct CpalSink {
    sample_rate: u32,
    timeline: Arc<Mutex<Timeline>>,
    thread: Option<StreamThread>,
}

impl AudioSink for CpalSink {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        self.timeline.lock().map_or(0.0, |t| t.current_time())
    }

    fn schedule(&mut self, chunk_id: u64, start_time: f64, samples: Arc<[f32]>) -> Result<()> {
        if self.thread.is_none() {
            return Err(Error::Audio("playback already closed".to_string()));
        }
        self.timeline
            .lock()
            .map_err(|_| Error::Audio("playback timeline poisoned".to_string()))?
            .schedule(chunk_id, start_time, samples);
        Ok(())
    }

    fn cancel_all(&mut self) {
        if let Ok(mut timeline) = self.timeline.lock() {
            timeline.cancel_all();
        }
    }

    fn close(&mut self) -> Result<()> {
        self.cancel_all();
        let Some(mut thread) = self.thread.take() else {
            return Ok(());
        };
        thread.stop()?;

        tracing::debug!("audio playback closed");
        Ok(())
    }
}

/// Thread that owns a playing stream until told to stop
struct StreamThread {
    stop: Option<std_mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl StreamThread {
    /// Build and play a stream on a new thread, waiting for the outcome
    fn spawn<F>(name: &str, build: F) -> Result<Self>
    where
        F: FnOnce() -> Result<cpal::Stream> + Send + 'static,
    {
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<()>>(1);
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let stream = match build() {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(Error::Audio(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Returns on explicit stop or when the handle is dropped
                let _ = stop_rx.recv();
                drop(stream);
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                stop: Some(stop_tx),
                handle: Some(handle),
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(Error::Audio(format!("{name} thread exited before starting")))
            }
        }
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| Error::Audio("audio thread panicked".to_string()))?;
        }
        Ok(())
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn is_permission_error(description: &str) -> bool {
    let description = description.to_ascii_lowercase();
    ["permission", "denied", "not authorized", "unauthorized"]
        .iter()
        .any(|needle| description.contains(needle))
}

fn map_build_error(err: BuildStreamError) -> Error {
    match err {
        BuildStreamError::DeviceNotAvailable | BuildStreamError::StreamConfigNotSupported => {
            Error::DeviceUnavailable(err.to_string())
        }
        BuildStreamError::BackendSpecific { err } if is_permission_error(&err.description) => {
            Error::PermissionDenied(err.description)
        }
        other => Error::Audio(other.to_string()),
    }
}

fn map_configs_error(err: SupportedStreamConfigsError) -> Error {
    match err {
        SupportedStreamConfigsError::DeviceNotAvailable => Error::DeviceUnavailable(err.to_string()),
        SupportedStreamConfigsError::BackendSpecific { err }
            if is_permission_error(&err.description) =>
        {
            Error::PermissionDenied(err.description)
        }
        other => Error::Audio(other.to_string()),
    }
}

/// A chunk placed on the output timeline
#[derive(Debug)]
struct TimelineChunk {
    id: u64,
    start_frame: u64,
    samples: Arc<[f32]>,
}

impl TimelineChunk {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Output clock plus the chunks still to be rendered, ordered by start
#[derive(Debug)]
struct Timeline {
    frames_played: u64,
    sample_rate: u32,
    chunks: VecDeque<TimelineChunk>,
}

impl Timeline {
    const fn new(sample_rate: u32) -> Self {
        Self {
            frames_played: 0,
            sample_rate,
            chunks: VecDeque::new(),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn current_time(&self) -> f64 {
        self.frames_played as f64 / f64::from(self.sample_rate)
    }

    /// Place a chunk on the timeline
    ///
    /// A start the clock has already passed is moved to the current frame,
    /// and a chunk landing inside the tail of the last one queued follows
    /// it, so no chunk loses its head.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn schedule(&mut self, id: u64, start_time: f64, samples: Arc<[f32]>) {
        let requested = (start_time * f64::from(self.sample_rate)).round().max(0.0) as u64;
        let mut start_frame = requested.max(self.frames_played);
        if let Some(last) = self.chunks.back()
            && last.start_frame <= start_frame
            && start_frame < last.end_frame()
        {
            start_frame = last.end_frame();
        }
        if start_frame != requested {
            tracing::debug!(chunk_id = id, requested, start_frame, "late chunk moved");
        }

        let index = self
            .chunks
            .iter()
            .position(|c| c.start_frame > start_frame)
            .unwrap_or(self.chunks.len());

        tracing::trace!(chunk_id = id, start_frame, len = samples.len(), "chunk scheduled");
        self.chunks.insert(
            index,
            TimelineChunk {
                id,
                start_frame,
                samples,
            },
        );
    }

    fn cancel_all(&mut self) {
        if !self.chunks.is_empty() {
            tracing::debug!(chunks = self.chunks.len(), "playback cancelled");
        }
        self.chunks.clear();
    }

    /// Fill an interleaved output buffer and advance the clock
    #[allow(clippy::cast_possible_truncation)]
    fn render(&mut self, out: &mut [f32], channels: usize) {
        for frame in out.chunks_mut(channels.max(1)) {
            let now = self.frames_played;
            while self.chunks.front().is_some_and(|c| c.end_frame() <= now) {
                if let Some(done) = self.chunks.pop_front() {
                    tracing::trace!(chunk_id = done.id, "chunk finished");
                }
            }

            let sample = self
                .chunks
                .iter()
                .take_while(|c| c.start_frame <= now)
                .find(|c| now < c.end_frame())
                .map_or(0.0, |c| c.samples[(now - c.start_frame) as usize]);

            frame.fill(sample);
            self.frames_played += 1;
        }
    }
}
