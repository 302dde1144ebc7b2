//! Realtime voice session with the remote model

pub mod manager;
pub mod protocol;
pub mod state;
pub mod transport;

pub use manager::{SessionCommand, SessionConfig, SessionHandle, VoiceSession, system_instruction};
pub use protocol::{ClientMessage, ServerMessage, Setup};
pub use state::SessionState;
pub use transport::{
    ConnectRequest, Connection, DEFAULT_CONNECT_TIMEOUT, DEFAULT_ENDPOINT, LiveTransport, Transport,
};
