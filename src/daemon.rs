//! Daemon - the console front-end
//!
//! Owns the device store and at most one voice session, and maps user
//! input onto them.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, watch};

use crate::home::{ChangeSource, Device, DeviceChange, DeviceStore, DeviceType, DeviceValue, UpdateOutcome};
use crate::session::{LiveTransport, SessionHandle, SessionState, Transport, VoiceSession};
use crate::voice::{AudioBackend, CpalBackend};
use crate::{Config, Error, Result};

/// Console help for interactive mode
const HELP: &str = "\
  v              start a voice session
  m              toggle microphone mute
  x              interrupt assistant speech
  d              list devices
  t <id>         toggle a device
  s <id> <value> set a device value
  q              end the session and quit";

/// The NexusHome daemon - orchestrates the store and voice sessions
pub struct Daemon {
    config: Config,
    store: DeviceStore,
    backend: Arc<dyn AudioBackend>,
    transport: Arc<dyn Transport>,
    session: Option<SessionHandle>,
}

impl Daemon {
    /// Create a daemon with the cpal backend and websocket transport
    ///
    /// # Errors
    ///
    /// Returns error if the configured home file cannot be loaded
    pub fn new(config: Config) -> Result<Self> {
        let store = DeviceStore::new(config.load_home()?);
        let transport = LiveTransport::new(config.voice.connect_timeout);
        Ok(Self::with_parts(
            config,
            store,
            Arc::new(CpalBackend::new()),
            Arc::new(transport),
        ))
    }

    /// Create a daemon from explicit parts
    #[must_use]
    pub fn with_parts(
        config: Config,
        store: DeviceStore,
        backend: Arc<dyn AudioBackend>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            config,
            store,
            backend,
            transport,
            session: None,
        }
    }

    #[must_use]
    pub const fn store(&self) -> &DeviceStore {
        &self.store
    }

    /// State of the current session; `Idle` when there is none
    #[must_use]
    pub fn session_state(&self) -> SessionState {
        self.session
            .as_ref()
            .map_or(SessionState::Idle, SessionHandle::state)
    }

    /// Start a voice session
    ///
    /// # Errors
    ///
    /// Returns `SessionActive` if a session is still running, otherwise
    /// whatever prevented the session from connecting
    pub async fn start_session(&mut self) -> Result<()> {
        if self.session.as_ref().is_some_and(|s| !s.is_finished()) {
            return Err(Error::SessionActive);
        }
        self.reap_session().await;

        let session = VoiceSession::connect(
            self.config.session_config(),
            self.backend.as_ref(),
            self.transport.as_ref(),
            self.store.clone(),
        )
        .await?;

        self.session = Some(SessionHandle::spawn(session));
        Ok(())
    }

    /// End the current session, if any
    ///
    /// # Errors
    ///
    /// Returns the session's terminal error, if it failed
    pub async fn end_session(&mut self) -> Result<()> {
        match self.session.take() {
            Some(handle) => handle.close().await,
            None => Ok(()),
        }
    }

    /// Collect a session that ended on its own
    async fn reap_session(&mut self) {
        let Some(handle) = self.session.take_if(|s| s.is_finished()) else {
            return;
        };
        if let Err(e) = handle.join().await {
            if e.is_user_visible() {
                println!("voice session ended: {e}");
            }
            tracing::debug!(error = %e, "session ended with error");
        }
    }

    /// Flip mute on the current session; `None` without one
    #[must_use]
    pub fn toggle_mute(&self) -> Option<bool> {
        self.session.as_ref().map(SessionHandle::toggle_mute)
    }

    /// Cut off assistant speech
    pub async fn interrupt(&self) {
        if let Some(session) = &self.session {
            session.interrupt().await;
        }
    }

    /// Flip a device's power state
    pub fn toggle_device(&self, id: &str) -> UpdateOutcome {
        self.store.toggle(id, ChangeSource::User)
    }

    /// Set a device's value
    pub fn set_device_value(&self, id: &str, value: DeviceValue) -> UpdateOutcome {
        self.store.set_value(id, value, ChangeSource::User)
    }

    /// Run the interactive console until `q`, end of input or Ctrl-C
    ///
    /// # Errors
    ///
    /// Returns error if standard input cannot be read
    pub async fn run_console(mut self) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut changes = self.store.subscribe();
        let mut states = self.session.as_ref().map(SessionHandle::state_changes);

        println!("{HELP}");

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        break;
                    };
                    if !self.handle_line(line.trim()).await {
                        break;
                    }
                    states = self.session.as_ref().map(SessionHandle::state_changes);
                }
                change = changes.recv() => match change {
                    Ok(change) => print_change(&change),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "device change notifications lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {}
                },
                state = next_state(&mut states) => match state {
                    Some(state) => {
                        println!("voice session {state}");
                        if state.is_terminal() {
                            self.reap_session().await;
                        }
                    }
                    None => states = None,
                },
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutdown requested");
                    break;
                }
            }
        }

        if let Err(e) = self.end_session().await {
            tracing::warn!(error = %e, "session did not close cleanly");
        }
        Ok(())
    }

    /// Act on one console line; `false` to quit
    async fn handle_line(&mut self, line: &str) -> bool {
        let mut words = line.split_whitespace();
        match (words.next(), words.next(), words.next()) {
            (None, ..) => {}
            (Some("q"), ..) => return false,
            (Some("v"), ..) => match self.start_session().await {
                Ok(()) => println!("voice session started"),
                Err(e) => println!("{e}"),
            },
            (Some("m"), ..) => match self.toggle_mute() {
                Some(true) => println!("microphone muted"),
                Some(false) => println!("microphone live"),
                None => println!("no voice session"),
            },
            (Some("x"), ..) => self.interrupt().await,
            (Some("d"), ..) => print_devices(&self.store.list_devices()),
            (Some("t"), Some(id), _) => report(id, self.toggle_device(id)),
            (Some("s"), Some(id), Some(value)) => {
                report(id, self.set_device_value(id, parse_value(value)));
            }
            _ => println!("{HELP}"),
        }
        true
    }
}

async fn next_state(states: &mut Option<watch::Receiver<SessionState>>) -> Option<SessionState> {
    let Some(receiver) = states.as_mut() else {
        return std::future::pending().await;
    };
    if receiver.changed().await.is_ok() {
        Some(*receiver.borrow_and_update())
    } else {
        None
    }
}

fn report(id: &str, outcome: UpdateOutcome) {
    if outcome == UpdateOutcome::NotFound {
        println!("no device with id {id}");
    }
}

fn print_change(change: &DeviceChange) {
    let who = match change.source {
        ChangeSource::User => "you",
        ChangeSource::Assistant => "assistant",
    };
    println!("[{who}] {}", format_device(&change.device));
}

/// Parse a console value: a number if it looks like one, text otherwise
#[must_use]
pub fn parse_value(raw: &str) -> DeviceValue {
    raw.parse::<f64>()
        .map_or_else(|_| DeviceValue::from(raw), DeviceValue::Number)
}

/// Print devices one per line
pub fn print_devices(devices: &[Device]) {
    for device in devices {
        println!("{}", format_device(device));
    }
}

/// One-line description of a device
#[must_use]
pub fn format_device(device: &Device) -> String {
    let power = match (device.device_type, device.is_on) {
        (DeviceType::Lock, true) => "locked",
        (DeviceType::Lock, false) => "unlocked",
        (_, true) => "on",
        (_, false) => "off",
    };

    let mut line = format!(
        "{:<4} {:<16} {:<10} {:<8}",
        device.id, device.name, device.device_type, power
    );

    if device.device_type.supports_value()
        && let Some(value) = &device.value
    {
        let unit = device
            .meta
            .as_ref()
            .and_then(|m| m.unit.as_deref())
            .unwrap_or(match device.device_type {
                DeviceType::Thermostat => "",
                _ => "%",
            });
        line.push_str(&format!(" {value}{unit}"));
    }

    if let Some(battery) = device.meta.as_ref().and_then(|m| m.battery_level) {
        line.push_str(&format!(" (battery {battery}%)"));
    }

    line.trim_end().to_string()
}
