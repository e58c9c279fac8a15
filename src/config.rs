use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::mode::{InputModes, OutputModes};

/// Top-level server config, loaded from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Initial property values for every new session.
    pub defaults: SessionDefaults,
    /// Capacity limits.
    pub limits: Limits,
    /// Control-signal delivery tuning.
    pub broadcast: BroadcastConfig,
}

/// What a freshly created session starts out with.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionDefaults {
    pub title: String,
    /// Raw mode words; bits outside the valid masks are dropped when
    /// applied.
    pub input_mode: u32,
    pub output_mode: u32,
    pub input_code_page: u32,
    pub output_code_page: u32,
    /// Geometry of the initial active surface.
    pub rows: u16,
    pub cols: u16,
    /// Entries kept per history buffer.
    pub history_capacity: usize,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        SessionDefaults {
            title: "Console".to_string(),
            input_mode: InputModes::default().bits(),
            output_mode: OutputModes::default().bits(),
            input_code_page: 65001,
            output_code_page: 65001,
            rows: 25,
            cols: 80,
            history_capacity: 50,
        }
    }
}

/// Capacity limits. Zero means unlimited where noted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Live sessions across the whole registry; 0 = unlimited.
    pub max_sessions: usize,
    /// Attached connections per session; 0 = unlimited.
    pub max_members: usize,
    /// Slots in each connection's handle table.
    pub handle_table_capacity: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_sessions: 0,
            max_members: 64,
            handle_table_capacity: 256,
        }
    }
}

/// Control-signal delivery tuning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Courtesy wait per delivery before the broadcaster moves on.
    pub delivery_timeout_ms: u64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        BroadcastConfig {
            delivery_timeout_ms: 100,
        }
    }
}

impl BroadcastConfig {
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }
}

impl ServerConfig {
    /// Load config from a TOML file path. Returns None if the file
    /// doesn't exist.
    pub fn load(path: &std::path::Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?;
        Ok(Some(config))
    }

    /// Save config to a TOML file path.
    pub fn save(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        }
        let contents =
            toml::to_string_pretty(self).map_err(ConfigError::SerializeFailed)?;
        std::fs::write(path, contents)
            .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        Ok(())
    }
}

/// Errors that can occur when loading or saving config.
#[derive(Debug)]
pub enum ConfigError {
    ReadFailed(std::path::PathBuf, std::io::Error),
    ParseFailed(std::path::PathBuf, toml::de::Error),
    WriteFailed(std::path::PathBuf, std::io::Error),
    SerializeFailed(toml::ser::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadFailed(path, e) => {
                write!(f, "Failed to read config {}: {}", path.display(), e)
            }
            Self::ParseFailed(path, e) => {
                write!(f, "Failed to parse config {}: {}", path.display(), e)
            }
            Self::WriteFailed(path, e) => {
                write!(f, "Failed to write config {}: {}", path.display(), e)
            }
            Self::SerializeFailed(e) => write!(f, "Failed to serialize config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}
