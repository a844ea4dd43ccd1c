//! Client configuration.
//!
//! Configuration is loaded from XDG directories:
//! - `~/.config/parley/config.toml` - Main configuration
//! - `~/.local/share/parley/` - Data storage

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to determine XDG directories")]
    NoProjectDirs,

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// REST collaborator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the platform REST API
    pub base_url: String,
    /// Page size for the chat list
    pub chat_page_size: u32,
    /// Page size for message history pages
    pub message_page_size: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.parley.example".into(),
            chat_page_size: 20,
            message_page_size: 50,
        }
    }
}

/// Realtime socket configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    /// WebSocket endpoint for the realtime channel
    pub url: String,
    /// When false, every send takes the REST fallback path
    pub realtime_enabled: bool,
    /// Reconnect attempts before giving up
    pub max_reconnect_attempts: u32,
    /// Initial reconnect backoff; doubles per attempt
    pub reconnect_backoff_ms: u64,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            url: "wss://api.parley.example/socket".into(),
            realtime_enabled: true,
            max_reconnect_attempts: 5,
            reconnect_backoff_ms: 500,
        }
    }
}

/// Typing indicator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TypingConfig {
    /// Seconds a typing indicator stays live without a renewing signal
    pub expiry_seconds: u64,
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self { expiry_seconds: 3 }
    }
}

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ClientConfig {
    pub api: ApiConfig,
    pub socket: SocketConfig,
    pub typing: TypingConfig,
}

impl ClientConfig {
    /// Load configuration from the XDG config directory, falling back to
    /// defaults when no file exists.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_file_path()?;

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path).map_err(|source| {
                ConfigError::Read {
                    path: config_path.clone(),
                    source,
                }
            })?;
            let config: ClientConfig =
                toml::from_str(&content).map_err(|source| ConfigError::Parse {
                    path: config_path.clone(),
                    source,
                })?;
            tracing::info!(path = %config_path.display(), "loaded configuration");
            Ok(config)
        } else {
            tracing::info!("no config file found, using defaults");
            Ok(ClientConfig::default())
        }
    }

    /// Save configuration to the XDG config directory.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_file_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content).map_err(|source| ConfigError::Write {
            path: config_path.clone(),
            source,
        })?;

        tracing::info!(path = %config_path.display(), "saved configuration");
        Ok(())
    }

    pub fn config_file_path() -> Result<PathBuf, ConfigError> {
        let dirs = Self::project_dirs()?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    fn project_dirs() -> Result<ProjectDirs, ConfigError> {
        ProjectDirs::from("example", "parley", "parley").ok_or(ConfigError::NoProjectDirs)
    }
}
