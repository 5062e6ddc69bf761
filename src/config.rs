//! Application configuration
//!
//! Loaded from a TOML file at startup. Every section has defaults, so a
//! missing file or a partial file is fine.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::engine::{ChannelMode, ClientConfig, VideoCodec};
use crate::error::{Error, Result};

/// Environment variable overriding `engine.app_id`
pub const APP_ID_ENV: &str = "CALLROOM_APP_ID";

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub session: SessionConfig,
    pub ui: UiConfig,
    pub logging: LoggingConfig,
}

/// Media engine settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Application id presented to the engine on join
    pub app_id: String,
    pub mode: ChannelMode,
    pub codec: VideoCodec,
}

impl EngineConfig {
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            mode: self.mode,
            codec: self.codec,
        }
    }
}

/// How the local identity is chosen at join time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityStrategy {
    /// Let the engine assign an identity that is unique in the channel
    #[default]
    Engine,
    /// Uniform random integer below `identity_range`, no collision check
    Random,
}

/// Call-session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub identity: IdentityStrategy,
    pub identity_range: u32,
    /// Abandon a join that has not completed after this many milliseconds
    pub join_timeout_ms: Option<u64>,
    /// Capacity of the command queue in front of the session actor
    pub command_queue: usize,
    /// Surface the local camera preview is rendered into
    pub local_preview_surface: Option<String>,
    /// Prefix for remote video surface ids
    pub surface_prefix: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            identity: IdentityStrategy::default(),
            identity_range: DEFAULT_IDENTITY_RANGE,
            join_timeout_ms: None,
            command_queue: DEFAULT_COMMAND_QUEUE,
            local_preview_surface: Some(LOCAL_PREVIEW_SURFACE.to_string()),
            surface_prefix: REMOTE_SURFACE_PREFIX.to_string(),
        }
    }
}

impl SessionConfig {
    pub fn join_timeout(&self) -> Option<Duration> {
        self.join_timeout_ms.map(Duration::from_millis)
    }
}

/// Control API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub bind_address: String,
    pub http_port: u16,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            http_port: DEFAULT_HTTP_PORT,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is not set
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Parse a TOML document
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Load from `path`, or the default location, falling back to defaults
    /// when the file does not exist. Applies environment overrides.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => Self::default_path(),
        };

        let mut config = match path {
            Some(path) if path.exists() => {
                tracing::debug!(path = %path.display(), "Loading configuration");
                Self::load(&path)?
            }
            _ => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// `<config dir>/callroom/config.toml` for the current platform
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "callroom").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Write as TOML to `path`, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    pub fn apply_env(&mut self) {
        if let Ok(app_id) = std::env::var(APP_ID_ENV) {
            if !app_id.trim().is_empty() {
                self.engine.app_id = app_id.trim().to_string();
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.session.command_queue == 0 {
            return Err(Error::Config("session.command_queue must be > 0".into()));
        }
        if self.session.identity_range == 0 {
            return Err(Error::Config("session.identity_range must be > 0".into()));
        }
        if self.session.surface_prefix.is_empty() {
            return Err(Error::Config("session.surface_prefix must not be empty".into()));
        }
        Ok(())
    }
}
