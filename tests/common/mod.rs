//! Shared test utilities
//!
//! An in-memory audio backend and a scripted transport, so sessions can
//! run without audio hardware or network.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use nexus_home::config::file::NexusConfigFile;
use nexus_home::session::{ClientMessage, ConnectRequest, Connection, ServerMessage, Setup, Transport};
use nexus_home::voice::{AudioBackend, AudioFrame, AudioSink, AudioSource};
use nexus_home::{Config, Error, Result};

/// Configuration with an API key and nothing else
pub fn test_config() -> Config {
    Config::from_parts(NexusConfigFile::default(), |key| {
        (key == "GEMINI_API_KEY").then(|| "test-key".to_string())
    })
    .expect("test config")
}

/// Configuration without an API key
pub fn keyless_config() -> Config {
    Config::from_parts(NexusConfigFile::default(), |_| None).expect("test config")
}

/// Poll `check` until it holds or two seconds pass
pub async fn eventually(what: &str, check: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Counts of device acquisitions and releases
#[derive(Debug, Default)]
pub struct AudioCounters {
    pub inputs_opened: AtomicUsize,
    pub input_starts: AtomicUsize,
    pub input_stops: AtomicUsize,
    pub outputs_opened: AtomicUsize,
    pub output_closes: AtomicUsize,
    pub scheduled: AtomicUsize,
    pub cancels: AtomicUsize,
}

impl AudioCounters {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// Audio backend that records what the session does with its devices
#[derive(Clone, Default)]
pub struct FakeBackend {
    pub counters: Arc<AudioCounters>,
    /// Refuse the microphone with `PermissionDenied`
    pub deny_input: bool,
    /// Make every microphone stop fail after counting it
    pub fail_input_stop: bool,
    capture: Arc<Mutex<Option<mpsc::Sender<AudioFrame>>>>,
}

impl FakeBackend {
    pub fn denying_input() -> Self {
        Self {
            deny_input: true,
            ..Self::default()
        }
    }

    /// Deliver a frame as if the microphone produced it
    pub fn push_frame(&self, frame: AudioFrame) -> bool {
        self.capture
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|tx| tx.try_send(frame).is_ok())
    }

    pub fn failing_input_stop() -> Self {
        Self {
            fail_input_stop: true,
            ..Self::default()
        }
    }

    pub fn capture_started(&self) -> bool {
        self.capture.lock().unwrap().is_some()
    }
}

impl AudioBackend for FakeBackend {
    fn open_input(&self, sample_rate: u32, _frame_size: usize) -> Result<Box<dyn AudioSource>> {
        if self.deny_input {
            return Err(Error::PermissionDenied("microphone access refused".to_string()));
        }
        self.counters.inputs_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSource {
            sample_rate,
            fail_stop: self.fail_input_stop,
            counters: Arc::clone(&self.counters),
            capture: Arc::clone(&self.capture),
        }))
    }

    fn open_output(&self, sample_rate: u32) -> Result<Box<dyn AudioSink>> {
        self.counters.outputs_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSink {
            sample_rate,
            counters: Arc::clone(&self.counters),
        }))
    }
}

struct FakeSource {
    sample_rate: u32,
    fail_stop: bool,
    counters: Arc<AudioCounters>,
    capture: Arc<Mutex<Option<mpsc::Sender<AudioFrame>>>>,
}

impl AudioSource for FakeSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn start(&mut self, frames: mpsc::Sender<AudioFrame>) -> Result<()> {
        self.counters.input_starts.fetch_add(1, Ordering::SeqCst);
        *self.capture.lock().unwrap() = Some(frames);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.counters.input_stops.fetch_add(1, Ordering::SeqCst);
        self.capture.lock().unwrap().take();
        if self.fail_stop {
            return Err(Error::Audio("input stream did not stop".to_string()));
        }
        Ok(())
    }
}

struct FakeSink {
    sample_rate: u32,
    counters: Arc<AudioCounters>,
}

impl AudioSink for FakeSink {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        0.0
    }

    fn schedule(&mut self, _chunk_id: u64, _start_time: f64, _samples: Arc<[f32]>) -> Result<()> {
        self.counters.scheduled.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn cancel_all(&mut self) {
        self.counters.cancels.fetch_add(1, Ordering::SeqCst);
    }

    fn close(&mut self) -> Result<()> {
        self.counters.output_closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

type Inbound = mpsc::UnboundedSender<Result<ServerMessage>>;

/// The remote side of a scripted connection
#[derive(Clone, Default)]
pub struct Remote {
    inbound: Arc<Mutex<Option<Inbound>>>,
    sent: Arc<Mutex<Vec<ClientMessage>>>,
    setup: Arc<Mutex<Option<Setup>>>,
    pub connects: Arc<AtomicUsize>,
    pub closes: Arc<AtomicUsize>,
}

impl Remote {
    /// Deliver a JSON message to the session
    pub fn send(&self, json: &str) {
        let message = ServerMessage::parse(json.as_bytes()).expect("valid server message");
        self.deliver(Ok(message));
    }

    /// Deliver a transport error
    pub fn fail(&self, error: Error) {
        self.deliver(Err(error));
    }

    fn deliver(&self, message: Result<ServerMessage>) {
        let inbound = self.inbound.lock().unwrap();
        inbound
            .as_ref()
            .expect("no open connection")
            .send(message)
            .expect("session stopped receiving");
    }

    /// End the inbound stream as a normal close would
    pub fn hang_up(&self) {
        self.inbound.lock().unwrap().take();
    }

    /// Messages the session sent after the setup
    pub fn sent(&self) -> Vec<ClientMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn setup(&self) -> Option<Setup> {
        self.setup.lock().unwrap().clone()
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// Transport that hands out connections driven by a [`Remote`]
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    pub remote: Remote,
    /// Fail every handshake
    pub refuse: bool,
}

impl ScriptedTransport {
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(&self, request: &ConnectRequest<'_>) -> Result<Box<dyn Connection>> {
        if self.refuse {
            return Err(Error::Connection("handshake refused".to_string()));
        }

        self.remote.connects.fetch_add(1, Ordering::SeqCst);
        *self.remote.setup.lock().unwrap() = Some(request.setup.clone());

        let (tx, rx) = mpsc::unbounded_channel();
        *self.remote.inbound.lock().unwrap() = Some(tx);

        Ok(Box::new(ScriptedConnection {
            inbound: rx,
            sent: Arc::clone(&self.remote.sent),
            closes: Arc::clone(&self.remote.closes),
        }))
    }
}

struct ScriptedConnection {
    inbound: mpsc::UnboundedReceiver<Result<ServerMessage>>,
    sent: Arc<Mutex<Vec<ClientMessage>>>,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<ServerMessage>> {
        self.inbound.recv().await
    }

    async fn close(&mut self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
