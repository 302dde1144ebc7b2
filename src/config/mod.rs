//! Configuration management for NexusHome

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::home::defaults::{DEFAULT_ASSISTANT_NAME, DEFAULT_MODEL};
use crate::home::{HomeState, initial_state};
use crate::session::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_ENDPOINT, SessionConfig};
use crate::{Error, Result};

use self::file::NexusConfigFile;

/// NexusHome configuration
#[derive(Debug)]
pub struct Config {
    /// Live API key (from `GEMINI_API_KEY` / `API_KEY` env or `[api] key`)
    pub api_key: Option<SecretString>,

    /// Voice session configuration
    pub voice: VoiceConfig,

    /// Home model configuration
    pub home: HomeConfig,
}

/// Voice session configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Model identifier
    pub model: String,

    /// Websocket endpoint
    pub endpoint: String,

    /// Prebuilt voice name
    pub voice_name: Option<String>,

    /// Name the assistant answers to
    pub assistant_name: String,

    /// Bound on the websocket handshake
    pub connect_timeout: Duration,
}

/// Home model configuration
#[derive(Debug, Clone, Default)]
pub struct HomeConfig {
    /// JSON home file; the stock home is used when unset
    pub state_file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment and config file
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is invalid
    pub fn load() -> Result<Self> {
        // Load optional TOML config file (env > toml > default)
        let fc = file::load_config_file();
        Self::from_parts(fc, |key| std::env::var(key).ok())
    }

    /// Layer `env` over the parsed file over defaults
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is invalid
    pub fn from_parts<F>(fc: NexusConfigFile, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Empty variables count as unset
        let env = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = env("GEMINI_API_KEY")
            .or_else(|| env("API_KEY"))
            .or(fc.api.key)
            .filter(|k| !k.trim().is_empty())
            .map(SecretString::from);

        let connect_timeout = match env("NEXUS_CONNECT_TIMEOUT") {
            Some(raw) => Some(raw.parse::<u64>().map_err(|_| {
                Error::Config(format!("NEXUS_CONNECT_TIMEOUT must be whole seconds, got {raw}"))
            })?),
            None => fc.voice.connect_timeout_secs,
        }
        .map_or(DEFAULT_CONNECT_TIMEOUT, Duration::from_secs);

        if connect_timeout.is_zero() {
            return Err(Error::Config("connect timeout must be positive".to_string()));
        }

        let voice = VoiceConfig {
            model: env("NEXUS_MODEL")
                .or(fc.voice.model)
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            endpoint: env("NEXUS_ENDPOINT")
                .or(fc.voice.endpoint)
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            voice_name: env("NEXUS_VOICE").or(fc.voice.voice_name),
            assistant_name: env("NEXUS_ASSISTANT_NAME")
                .or(fc.voice.assistant_name)
                .unwrap_or_else(|| DEFAULT_ASSISTANT_NAME.to_string()),
            connect_timeout,
        };

        let home = HomeConfig {
            state_file: env("NEXUS_HOME_FILE")
                .map(PathBuf::from)
                .or(fc.home.state_file),
        };

        tracing::debug!(
            model = %voice.model,
            has_api_key = api_key.is_some(),
            home_file = ?home.state_file,
            "configuration resolved"
        );

        Ok(Self {
            api_key,
            voice,
            home,
        })
    }

    /// Parameters for a new voice session
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            api_key: self
                .api_key
                .as_ref()
                .map(|k| SecretString::from(k.expose_secret().to_owned())),
            endpoint: self.voice.endpoint.clone(),
            model: self.voice.model.clone(),
            voice_name: self.voice.voice_name.clone(),
            assistant_name: self.voice.assistant_name.clone(),
            ..SessionConfig::default()
        }
    }

    /// The configured home file, or the stock home
    ///
    /// # Errors
    ///
    /// Returns error if the configured file cannot be loaded
    pub fn load_home(&self) -> Result<HomeState> {
        match &self.home.state_file {
            Some(path) => HomeState::load(path),
            None => Ok(initial_state()),
        }
    }
}
