//! NexusHome - smart-home control core with a realtime voice assistant
//!
//! This library provides:
//! - The device and room model with a copy-on-write device store
//! - Microphone capture, PCM16 codec and gap-free playback scheduling
//! - A realtime voice session streaming audio to a live model endpoint
//! - Function-call tools that let the model read and change devices
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                 Console front-end                     │
//! │   Daemon  │  start / end session  │  mute  │  devices │
//! └───────────────┬──────────────────────────┬───────────┘
//!                 │                          │
//! ┌───────────────▼──────────────┐  ┌────────▼───────────┐
//! │        Voice session          │  │    Device store    │
//! │ capture → codec → connection  │  │  (RwLock snapshot) │
//! │ connection → codec → playback │  └────────▲───────────┘
//! │ tool calls → dispatcher ──────┼───────────┘
//! └───────────────┬──────────────┘
//!                 │ websocket
//! ┌───────────────▼──────────────────────────────────────┐
//! │               Live model endpoint                     │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod daemon;
pub mod error;
pub mod home;
pub mod session;
pub mod tools;
pub mod voice;

pub use config::Config;
pub use daemon::Daemon;
pub use error::{Error, Result};
pub use home::{Device, DeviceStore, DeviceType, DeviceUpdate, DeviceValue, HomeState, Room};
pub use session::{SessionHandle, SessionState, VoiceSession};
pub use tools::{ToolCall, ToolDispatcher, ToolResponse, ToolResult};
