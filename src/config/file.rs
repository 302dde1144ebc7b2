//! TOML configuration file loading
//!
//! Supports `~/.config/nexus/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct NexusConfigFile {
    /// Remote API credentials
    #[serde(default)]
    pub api: ApiFileConfig,

    /// Voice session configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Home model configuration
    #[serde(default)]
    pub home: HomeFileConfig,
}

/// API credentials
#[derive(Debug, Default, Deserialize)]
pub struct ApiFileConfig {
    pub key: Option<String>,
}

/// Voice session configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// Model identifier (e.g. "gemini-2.5-flash-native-audio-preview-09-2025")
    pub model: Option<String>,

    /// Websocket endpoint override
    pub endpoint: Option<String>,

    /// Prebuilt voice name (e.g. "Puck")
    pub voice_name: Option<String>,

    /// Name the assistant answers to
    pub assistant_name: Option<String>,

    /// Handshake timeout in seconds
    pub connect_timeout_secs: Option<u64>,
}

/// Home model configuration
#[derive(Debug, Default, Deserialize)]
pub struct HomeFileConfig {
    /// JSON file with rooms and devices, replacing the stock home
    pub state_file: Option<PathBuf>,
}

/// Load the TOML config file from the standard path
///
/// Returns `NexusConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> NexusConfigFile {
    let Some(path) = config_file_path() else {
        return NexusConfigFile::default();
    };

    if !path.exists() {
        return NexusConfigFile::default();
    }

    read_config_file(&path)
}

/// Parse a specific config file, falling back to defaults on any failure
pub fn read_config_file(path: &Path) -> NexusConfigFile {
    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                NexusConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            NexusConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/nexus/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("nexus").join("config.toml"))
}
