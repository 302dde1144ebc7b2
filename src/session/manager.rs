//! Voice session lifecycle and event loop
//!
//! A [`VoiceSession`] owns the microphone, the playback scheduler and the
//! connection. [`VoiceSession::run`] processes user commands, captured
//! frames and inbound messages one at a time on a single task.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::protocol::{ClientMessage, ServerMessage, Setup};
use super::state::SessionState;
use super::transport::{ConnectRequest, Connection, DEFAULT_ENDPOINT, Transport};
use crate::home::defaults::{DEFAULT_ASSISTANT_NAME, DEFAULT_MODEL};
use crate::home::{Device, DeviceStore};
use crate::tools::{ToolCall, ToolDispatcher, declarations};
use crate::voice::capture::FRAME_CHANNEL_CAPACITY;
use crate::voice::{
    AudioBackend, AudioFrame, AudioSource, Direction, FRAME_SIZE, FrameHandler,
    PLAYBACK_SAMPLE_RATE, PcmBlob, PlaybackScheduler, SAMPLE_RATE, codec,
};
use crate::{Error, Result};

/// Commands buffered between a handle and its session
const COMMAND_CHANNEL_CAPACITY: usize = 8;

/// Everything needed to start a session
#[derive(Debug)]
pub struct SessionConfig {
    pub api_key: Option<SecretString>,
    pub endpoint: String,
    pub model: String,
    /// Prebuilt voice; the remote picks one when unset
    pub voice_name: Option<String>,
    pub assistant_name: String,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub frame_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            voice_name: None,
            assistant_name: DEFAULT_ASSISTANT_NAME.to_string(),
            input_sample_rate: SAMPLE_RATE,
            output_sample_rate: PLAYBACK_SAMPLE_RATE,
            frame_size: FRAME_SIZE,
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::from(key.into()));
        self
    }

    fn validated_key(&self) -> Result<&SecretString> {
        self.api_key
            .as_ref()
            .filter(|key| !key.expose_secret().trim().is_empty())
            .ok_or_else(|| {
                Error::Config("no API key configured (set GEMINI_API_KEY)".to_string())
            })
    }
}

/// Requests from the front-end to a running session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    /// Cut off assistant speech
    Interrupt,
    Close,
}

/// Instruction text naming the assistant and listing every device
///
/// # Errors
///
/// Returns error if the device list cannot be serialized
pub fn system_instruction(assistant_name: &str, store: &DeviceStore) -> Result<String> {
    let snapshot = store.snapshot();
    let summaries: Vec<_> = snapshot.devices.iter().map(Device::summary).collect();
    let devices = serde_json::to_string(&summaries)?;

    Ok(format!(
        "You are {assistant_name}, a smart home assistant. You control devices. \
         The current devices are: {devices}. \
         When asked to change something, find the matching device ID and call updateDeviceState. \
         Be concise and friendly."
    ))
}

/// A realtime voice conversation with the remote model
pub struct VoiceSession {
    config: SessionConfig,
    state: watch::Sender<SessionState>,
    dispatcher: ToolDispatcher,
    capture: Option<Box<dyn AudioSource>>,
    playback: Option<PlaybackScheduler>,
    connection: Option<Box<dyn Connection>>,
    frames_tx: mpsc::Sender<AudioFrame>,
    frames_rx: mpsc::Receiver<AudioFrame>,
    frame_handler: FrameHandler,
    muted: Arc<AtomicBool>,
    /// Messages produced before the session opened
    outbound: VecDeque<ClientMessage>,
}

impl std::fmt::Debug for VoiceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceSession")
            .field("state", &self.state())
            .field("capture", &self.capture.is_some())
            .field("playback", &self.playback)
            .field("connected", &self.connection.is_some())
            .field("muted", &self.is_muted())
            .field("outbound", &self.outbound.len())
            .finish_non_exhaustive()
    }
}

enum Event {
    Command(Option<SessionCommand>),
    Frame(AudioFrame),
    Inbound(Option<Result<ServerMessage>>),
}

impl VoiceSession {
    /// Acquire audio devices and connect
    ///
    /// The API key is checked before anything is acquired. On any later
    /// failure everything acquired so far is released and the session ends
    /// `Errored`.
    ///
    /// # Errors
    ///
    /// Returns `Config` for a missing key, the backend's device errors, or
    /// the transport's connection errors
    pub async fn connect(
        config: SessionConfig,
        backend: &dyn AudioBackend,
        transport: &dyn Transport,
        store: DeviceStore,
    ) -> Result<Self> {
        config.validated_key()?;

        let mut session = Self::new(config, store.clone());
        session.transition(SessionState::Connecting);

        if let Err(e) = session.acquire(backend, transport, &store).await {
            tracing::error!(error = %e, "voice session failed to start");
            session.transition(SessionState::Errored);
            // Teardown failures are logged by release_all
            let _ = session.release_all().await;
            return Err(e);
        }

        Ok(session)
    }

    fn new(config: SessionConfig, store: DeviceStore) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        let (frames_tx, frames_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let muted = Arc::new(AtomicBool::new(false));

        Self {
            config,
            state,
            dispatcher: ToolDispatcher::new(store),
            capture: None,
            playback: None,
            connection: None,
            frames_tx,
            frames_rx,
            frame_handler: FrameHandler::new(Arc::clone(&muted)),
            muted,
            outbound: VecDeque::new(),
        }
    }

    async fn acquire(
        &mut self,
        backend: &dyn AudioBackend,
        transport: &dyn Transport,
        store: &DeviceStore,
    ) -> Result<()> {
        let sink = backend.open_output(self.config.output_sample_rate)?;
        self.playback = Some(PlaybackScheduler::new(sink));

        self.capture =
            Some(backend.open_input(self.config.input_sample_rate, self.config.frame_size)?);

        let mut setup = Setup::new(&self.config.model)
            .with_instruction(system_instruction(&self.config.assistant_name, store)?)
            .with_functions(declarations());
        if let Some(voice) = &self.config.voice_name {
            setup = setup.with_voice(voice.clone());
        }

        let request = ConnectRequest {
            endpoint: &self.config.endpoint,
            api_key: self.config.validated_key()?,
            setup: &setup,
        };
        let connection = transport.connect(&request).await?;
        self.connection = Some(connection);

        tracing::info!(model = %self.config.model, "voice session connecting");
        Ok(())
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Observe state transitions
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Observe the input level of unmuted frames
    #[must_use]
    pub fn volume(&self) -> watch::Receiver<f32> {
        self.frame_handler.volume()
    }

    #[must_use]
    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    /// Messages waiting for the session to open
    #[must_use]
    pub fn queued_outbound(&self) -> usize {
        self.outbound.len()
    }

    fn transition(&self, next: SessionState) -> bool {
        let current = self.state();
        if !current.can_transition_to(next) {
            tracing::warn!(from = %current, to = %next, "illegal session transition ignored");
            return false;
        }

        tracing::info!(from = %current, to = %next, "session state changed");
        self.state.send_replace(next);
        true
    }

    /// Process one inbound message
    ///
    /// # Errors
    ///
    /// Returns error if capture cannot start or a reply cannot be sent
    pub async fn handle_message(&mut self, message: ServerMessage) -> Result<()> {
        if message.is_setup_complete() {
            self.on_open().await?;
        }

        if message.is_interrupted() {
            tracing::debug!("remote interrupted the model turn");
            self.interrupt();
        }
        if message.server_content.as_ref().is_some_and(|c| c.turn_complete) {
            tracing::debug!("model turn complete");
        }

        for blob in message.audio_parts() {
            self.play(blob);
        }

        if let Some(batch) = message.tool_call {
            let calls: Vec<ToolCall> = batch.function_calls.into_iter().map(Into::into).collect();
            for response in self.dispatcher.dispatch_all(&calls) {
                self.enqueue_outbound(ClientMessage::tool_response(response))
                    .await?;
            }
        }

        if let Some(cancellation) = message.tool_call_cancellation {
            // Responses already sent cannot be recalled
            tracing::info!(ids = ?cancellation.ids, "remote cancelled tool calls");
        }

        if let Some(go_away) = message.go_away {
            tracing::warn!(time_left = ?go_away.time_left, "remote is about to end the session");
        }

        Ok(())
    }

    async fn on_open(&mut self) -> Result<()> {
        if !self.transition(SessionState::Open) {
            return Ok(());
        }

        if let Some(capture) = self.capture.as_mut() {
            capture.start(self.frames_tx.clone())?;
        }

        if !self.outbound.is_empty() {
            tracing::debug!(messages = self.outbound.len(), "flushing queued messages");
        }
        while let Some(message) = self.outbound.pop_front() {
            self.send_now(&message).await?;
        }

        Ok(())
    }

    fn play(&mut self, blob: &PcmBlob) {
        let Some(playback) = self.playback.as_mut() else {
            return;
        };

        match codec::decode(blob, self.config.output_sample_rate, Direction::Playback) {
            Ok(frame) => {
                if let Err(e) = playback.enqueue(&frame) {
                    tracing::warn!(error = %e, "failed to schedule audio chunk");
                }
            }
            Err(e) => tracing::warn!(error = %e, "dropping undecodable audio chunk"),
        }
    }

    async fn enqueue_outbound(&mut self, message: ClientMessage) -> Result<()> {
        if self.state() == SessionState::Open {
            self.send_now(&message).await
        } else {
            tracing::debug!(kind = message.kind(), "session not open, queueing message");
            self.outbound.push_back(message);
            Ok(())
        }
    }

    async fn send_now(&mut self, message: &ClientMessage) -> Result<()> {
        let connection = self
            .connection
            .as_mut()
            .ok_or_else(|| Error::Connection("not connected".to_string()))?;
        connection.send(message).await
    }

    /// Stream one encoded capture chunk; a no-op unless the session is open
    ///
    /// # Errors
    ///
    /// Returns `Connection` if the send fails
    pub async fn send_audio(&mut self, blob: PcmBlob) -> Result<()> {
        if self.state() != SessionState::Open {
            tracing::trace!(state = %self.state(), "dropping audio, session not open");
            return Ok(());
        }
        self.send_now(&ClientMessage::audio(blob)).await
    }

    /// Meter, encode and send a captured frame
    async fn handle_frame(&mut self, frame: &AudioFrame) -> Result<()> {
        match self.frame_handler.handle(frame) {
            Some(blob) => self.send_audio(blob).await,
            None => Ok(()),
        }
    }

    /// Stop assistant playback without ending the session
    pub fn interrupt(&mut self) {
        if let Some(playback) = self.playback.as_mut() {
            playback.stop_all();
        }
    }

    /// Drive the session until it closes or fails
    ///
    /// Dropping every command sender closes the session.
    ///
    /// # Errors
    ///
    /// Returns the error that moved the session to `Errored`, or a
    /// `ResourceRelease` error if teardown was incomplete
    pub async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) -> Result<()> {
        loop {
            if self.state().is_terminal() {
                return Ok(());
            }

            let event = tokio::select! {
                command = commands.recv() => Event::Command(command),
                Some(frame) = self.frames_rx.recv() => Event::Frame(frame),
                inbound = recv_inbound(&mut self.connection) => Event::Inbound(inbound),
            };

            match event {
                Event::Command(Some(SessionCommand::Interrupt)) => {
                    tracing::info!("playback interrupted by user");
                    self.interrupt();
                }
                Event::Command(Some(SessionCommand::Close) | None) => return self.close().await,
                Event::Frame(frame) => {
                    if let Err(e) = self.handle_frame(&frame).await {
                        return self.fail_with(e).await;
                    }
                }
                Event::Inbound(Some(Ok(message))) => {
                    if let Err(e) = self.handle_message(message).await {
                        return self.fail_with(e).await;
                    }
                }
                Event::Inbound(Some(Err(e))) => return self.fail_with(e).await,
                Event::Inbound(None) => {
                    tracing::info!("remote closed the session");
                    return self.close().await;
                }
            }
        }
    }

    async fn fail_with(&mut self, error: Error) -> Result<()> {
        tracing::error!(error = %error, "voice session failed");
        self.transition(SessionState::Errored);
        let _ = self.release_all().await;
        Err(error)
    }

    /// End the session and release every resource
    ///
    /// Valid from any state; calling it again after the session ended does
    /// nothing.
    ///
    /// # Errors
    ///
    /// Returns `ResourceRelease` if a teardown step failed; the session is
    /// `Closed` regardless
    pub async fn close(&mut self) -> Result<()> {
        if self.state().is_terminal() {
            return Ok(());
        }

        self.transition(SessionState::Closing);
        let released = self.release_all().await;
        self.transition(SessionState::Closed);
        released
    }

    /// Best-effort teardown; every step runs even if an earlier one fails
    async fn release_all(&mut self) -> Result<()> {
        let mut failures = Vec::new();

        if let Some(mut capture) = self.capture.take()
            && let Err(e) = capture.stop()
        {
            failures.push(format!("capture: {e}"));
        }

        if let Some(playback) = self.playback.as_mut() {
            playback.stop_all();
        }

        if let Some(mut connection) = self.connection.take()
            && let Err(e) = connection.close().await
        {
            failures.push(format!("connection: {e}"));
        }

        if let Some(mut playback) = self.playback.take()
            && let Err(e) = playback.close()
        {
            failures.push(format!("playback: {e}"));
        }

        self.outbound.clear();
        while self.frames_rx.try_recv().is_ok() {}
        self.frame_handler.reset_volume();

        if failures.is_empty() {
            tracing::debug!("session resources released");
            Ok(())
        } else {
            let failures = failures.join("; ");
            tracing::warn!(errors = %failures, "session teardown incomplete");
            Err(Error::ResourceRelease(failures))
        }
    }
}

async fn recv_inbound(connection: &mut Option<Box<dyn Connection>>) -> Option<Result<ServerMessage>> {
    match connection {
        Some(connection) => connection.recv().await,
        None => std::future::pending().await,
    }
}

/// Front-end handle to a session running on its own task
#[derive(Debug)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    state: watch::Receiver<SessionState>,
    volume: watch::Receiver<f32>,
    muted: Arc<AtomicBool>,
    task: JoinHandle<Result<()>>,
}

impl SessionHandle {
    /// Run `session` on a new task
    #[must_use]
    pub fn spawn(session: VoiceSession) -> Self {
        let (commands, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let state = session.state_changes();
        let volume = session.volume();
        let muted = Arc::clone(&session.muted);
        let task = tokio::spawn(session.run(rx));

        Self {
            commands,
            state,
            volume,
            muted,
            task,
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Latest input level
    #[must_use]
    pub fn volume(&self) -> f32 {
        *self.volume.borrow()
    }

    #[must_use]
    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
        tracing::info!(muted, "microphone mute changed");
    }

    /// Flip the mute flag, returning the new value
    pub fn toggle_mute(&self) -> bool {
        let muted = !self.muted.fetch_xor(true, Ordering::Relaxed);
        tracing::info!(muted, "microphone mute changed");
        muted
    }

    /// Stop assistant playback
    pub async fn interrupt(&self) {
        if self.commands.send(SessionCommand::Interrupt).await.is_err() {
            tracing::debug!("interrupt ignored, session already ended");
        }
    }

    /// Whether the session task has ended
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Ask the session to close and wait for it
    ///
    /// # Errors
    ///
    /// Returns the session's terminal error, if any
    pub async fn close(self) -> Result<()> {
        // Send fails only if the session already ended
        let _ = self.commands.send(SessionCommand::Close).await;
        self.join().await
    }

    /// Wait for the session to end on its own
    ///
    /// # Errors
    ///
    /// Returns the session's terminal error, if any
    pub async fn join(self) -> Result<()> {
        self.task
            .await
            .map_err(|e| Error::Io(std::io::Error::from(e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::home::initial_state;

    #[test]
    fn instruction_lists_every_device() {
        let store = DeviceStore::new(initial_state());
        let text = system_instruction("Nexus", &store).unwrap();

        assert!(text.starts_with("You are Nexus, a smart home assistant."));
        assert!(text.contains(r#"{"name":"Main Lights","id":"d1","type":"LIGHT"}"#));
        assert!(text.contains(r#""id":"d8""#));
    }

    #[test]
    fn blank_key_is_rejected() {
        let config = SessionConfig::default().with_api_key("   ");
        assert!(matches!(config.validated_key(), Err(Error::Config(_))));
        assert!(SessionConfig::default().validated_key().is_err());
        assert!(SessionConfig::default().with_api_key("k").validated_key().is_ok());
    }
}
