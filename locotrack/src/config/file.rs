//! Configuration file handling for ~/.locotrack/config.ini.
//!
//! Settings structs live in [`super::settings`], constants in
//! [`super::defaults`], and parsing in [`super::parser`].

use std::path::{Path, PathBuf};

use ini::Ini;
use thiserror::Error;

use super::settings::{ConfigFile, IngestSettings, TrackerSettings};

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// The config file does not exist
    #[error("Config file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },

    /// A required key is absent or empty
    #[error("Missing configuration value: {section}.{key}")]
    MissingValue { section: String, key: String },

    /// The section needed by the requested role is absent
    #[error("Missing configuration section: [{0}]")]
    MissingSection(String),
}

impl ConfigFile {
    /// Load configuration from the default path (~/.locotrack/config.ini).
    pub fn load() -> Result<Self, ConfigFileError> {
        Self::load_from(&config_file_path())
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            return Err(ConfigFileError::NotFound(path.to_path_buf()));
        }

        let ini = Ini::load_from_file(path)?;
        super::parser::parse_ini(&ini)
    }

    /// The `[tracker]` section, required to run the tracker.
    pub fn tracker(&self) -> Result<&TrackerSettings, ConfigFileError> {
        self.tracker
            .as_ref()
            .ok_or_else(|| ConfigFileError::MissingSection("tracker".to_string()))
    }

    /// The `[ingest]` section, required to run the ingest service.
    pub fn ingest(&self) -> Result<&IngestSettings, ConfigFileError> {
        self.ingest
            .as_ref()
            .ok_or_else(|| ConfigFileError::MissingSection("ingest".to_string()))
    }
}

/// Get the path to the config directory (~/.locotrack).
pub fn config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".locotrack")
}

/// Get the path to the config file (~/.locotrack/config.ini).
pub fn config_file_path() -> PathBuf {
    config_directory().join("config.ini")
}
