//! Gap-free playback scheduling
//!
//! Chunks arrive from the network faster or slower than real time. Each
//! one is placed right after the previous one on the sink clock, or at the
//! current sink time if the previous chunk already finished.

use super::codec::{self, AudioFrame};
use super::device::AudioSink;
use crate::{Error, Result};

/// Sample rate for playback (matches the remote's audio output)
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// A chunk handed to the sink
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledChunk {
    pub id: u64,
    /// Start on the sink clock, in seconds
    pub start_time: f64,
    /// Seconds
    pub duration: f64,
}

impl ScheduledChunk {
    #[must_use]
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }
}

/// Places decoded chunks back to back on an [`AudioSink`]
pub struct PlaybackScheduler {
    sink: Option<Box<dyn AudioSink>>,
    next_start_time: f64,
    active: Vec<ScheduledChunk>,
    next_id: u64,
}

impl std::fmt::Debug for PlaybackScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackScheduler")
            .field("open", &self.sink.is_some())
            .field("next_start_time", &self.next_start_time)
            .field("active", &self.active.len())
            .finish_non_exhaustive()
    }
}

impl PlaybackScheduler {
    #[must_use]
    pub fn new(sink: Box<dyn AudioSink>) -> Self {
        let next_start_time = sink.current_time();
        Self {
            sink: Some(sink),
            next_start_time,
            active: Vec::new(),
            next_id: 0,
        }
    }

    /// Schedule a decoded chunk right after the previous one
    ///
    /// Returns `None` for an empty chunk, which leaves the cursor alone.
    ///
    /// # Errors
    ///
    /// Returns error if the sink is closed or rejects the chunk
    pub fn enqueue(&mut self, frame: &AudioFrame) -> Result<Option<ScheduledChunk>> {
        let sink = self
            .sink
            .as_mut()
            .ok_or_else(|| Error::Audio("playback already closed".to_string()))?;

        if frame.is_empty() || frame.duration() <= 0.0 {
            return Ok(None);
        }

        let sink_rate = sink.sample_rate();
        let samples = if frame.sample_rate() == sink_rate {
            frame.shared_samples()
        } else {
            codec::resample_linear(frame.samples(), frame.sample_rate(), sink_rate).into()
        };

        // Measured on what the sink plays, not the source rate
        #[allow(clippy::cast_precision_loss)]
        let duration = samples.len() as f64 / f64::from(sink_rate);
        if duration <= 0.0 {
            return Ok(None);
        }

        let now = sink.current_time();
        let start_time = self.next_start_time.max(now);

        let id = self.next_id;
        self.next_id += 1;

        sink.schedule(id, start_time, samples)?;

        let chunk = ScheduledChunk {
            id,
            start_time,
            duration,
        };
        self.next_start_time = chunk.end_time();
        self.active.push(chunk);

        tracing::trace!(chunk_id = id, start_time, duration, "playback chunk scheduled");

        self.reap_at(now);
        Ok(Some(chunk))
    }

    /// Cancel everything and move the cursor back to the sink clock
    pub fn stop_all(&mut self) {
        let Some(sink) = self.sink.as_mut() else {
            return;
        };

        sink.cancel_all();
        if !self.active.is_empty() {
            tracing::debug!(chunks = self.active.len(), "playback stopped");
        }
        self.active.clear();
        self.next_start_time = sink.current_time();
    }

    /// Forget chunks the sink clock has passed
    pub fn reap_finished(&mut self) {
        if let Some(now) = self.sink.as_ref().map(|s| s.current_time()) {
            self.reap_at(now);
        }
    }

    fn reap_at(&mut self, now: f64) {
        self.active.retain(|chunk| chunk.end_time() > now);
    }

    /// Chunks still playing or waiting to play
    pub fn active_count(&mut self) -> usize {
        self.reap_finished();
        self.active.len()
    }

    #[must_use]
    pub const fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.sink.is_none()
    }

    /// Stop playback and release the sink; repeated calls are no-ops
    ///
    /// # Errors
    ///
    /// Returns error if the sink could not be released cleanly
    pub fn close(&mut self) -> Result<()> {
        self.stop_all();
        match self.sink.take() {
            Some(mut sink) => sink.close(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::voice::codec::Direction;

    #[derive(Default)]
    struct FakeState {
        now: f64,
        scheduled: Vec<(u64, f64, usize)>,
        cancels: usize,
        closes: usize,
    }

    struct FakeSink(Arc<Mutex<FakeState>>);

    impl AudioSink for FakeSink {
        fn sample_rate(&self) -> u32 {
            PLAYBACK_SAMPLE_RATE
        }

        fn current_time(&self) -> f64 {
            self.0.lock().unwrap().now
        }

        fn schedule(&mut self, chunk_id: u64, start_time: f64, samples: Arc<[f32]>) -> Result<()> {
            self.0
                .lock()
                .unwrap()
                .scheduled
                .push((chunk_id, start_time, samples.len()));
            Ok(())
        }

        fn cancel_all(&mut self) {
            self.0.lock().unwrap().cancels += 1;
        }

        fn close(&mut self) -> Result<()> {
            self.0.lock().unwrap().closes += 1;
            Ok(())
        }
    }

    fn scheduler(now: f64) -> (PlaybackScheduler, Arc<Mutex<FakeState>>) {
        let state = Arc::new(Mutex::new(FakeState {
            now,
            ..FakeState::default()
        }));
        let sink = FakeSink(Arc::clone(&state));
        (PlaybackScheduler::new(Box::new(sink)), state)
    }

    fn chunk(seconds: f64) -> AudioFrame {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let len = (seconds * f64::from(PLAYBACK_SAMPLE_RATE)) as usize;
        AudioFrame::new(vec![0.1; len], PLAYBACK_SAMPLE_RATE, Direction::Playback)
    }

    #[test]
    fn starts_are_contiguous_under_fixed_clock() {
        let (mut scheduler, _) = scheduler(2.0);

        let a = scheduler.enqueue(&chunk(0.5)).unwrap().unwrap();
        let b = scheduler.enqueue(&chunk(0.25)).unwrap().unwrap();
        let c = scheduler.enqueue(&chunk(1.0)).unwrap().unwrap();

        assert!((a.start_time - 2.0).abs() < 1e-9);
        assert!((b.start_time - a.end_time()).abs() < 1e-9);
        assert!((c.start_time - b.end_time()).abs() < 1e-9);
        assert!((scheduler.next_start_time() - 3.75).abs() < 1e-9);
    }

    #[test]
    fn late_chunk_starts_at_sink_time() {
        let (mut scheduler, state) = scheduler(0.0);
        scheduler.enqueue(&chunk(0.5)).unwrap();

        state.lock().unwrap().now = 3.0;
        let next = scheduler.enqueue(&chunk(0.5)).unwrap().unwrap();

        assert!((next.start_time - 3.0).abs() < 1e-9);
        assert_eq!(scheduler.active_count(), 1);
    }

    #[test]
    fn empty_chunk_does_not_move_cursor() {
        let (mut scheduler, state) = scheduler(1.0);
        scheduler.enqueue(&chunk(0.5)).unwrap();

        let empty = AudioFrame::new(Vec::new(), PLAYBACK_SAMPLE_RATE, Direction::Playback);
        assert!(scheduler.enqueue(&empty).unwrap().is_none());
        assert!((scheduler.next_start_time() - 1.5).abs() < 1e-9);
        assert_eq!(state.lock().unwrap().scheduled.len(), 1);
    }

    #[test]
    fn stop_all_resets_cursor_and_active_set() {
        let (mut scheduler, state) = scheduler(0.0);
        scheduler.enqueue(&chunk(1.0)).unwrap();
        scheduler.enqueue(&chunk(1.0)).unwrap();

        state.lock().unwrap().now = 0.4;
        scheduler.stop_all();

        assert_eq!(scheduler.active_count(), 0);
        assert!((scheduler.next_start_time() - 0.4).abs() < 1e-9);
        assert_eq!(state.lock().unwrap().cancels, 1);
    }

    #[test]
    fn resamples_to_sink_rate() {
        let (mut scheduler, state) = scheduler(0.0);
        let frame = AudioFrame::new(vec![0.2; 1600], 16_000, Direction::Playback);

        let scheduled = scheduler.enqueue(&frame).unwrap().unwrap();

        assert!((scheduled.duration - 0.1).abs() < 1e-9);
        assert_eq!(state.lock().unwrap().scheduled[0].2, 2400);
    }

    #[test]
    fn cursor_follows_resampled_length() {
        let (mut scheduler, state) = scheduler(0.0);
        // 7 samples at 16kHz round to 11 at 24kHz, not 10.5
        let odd = AudioFrame::new(vec![0.2; 7], 16_000, Direction::Playback);

        let first = scheduler.enqueue(&odd).unwrap().unwrap();
        let second = scheduler.enqueue(&odd).unwrap().unwrap();

        assert_eq!(state.lock().unwrap().scheduled[0].2, 11);
        let played = 11.0 / f64::from(PLAYBACK_SAMPLE_RATE);
        assert!((first.duration - played).abs() < 1e-12);
        assert!((second.start_time - played).abs() < 1e-12);
    }

    #[test]
    fn close_releases_sink_once() {
        let (mut scheduler, state) = scheduler(0.0);
        scheduler.close().unwrap();
        scheduler.close().unwrap();

        assert!(scheduler.is_closed());
        assert_eq!(state.lock().unwrap().closes, 1);
        assert!(scheduler.enqueue(&chunk(0.1)).is_err());
    }
}
