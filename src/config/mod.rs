//! Configuration module
//!
//! Handles engine settings and their on-disk location

mod settings;

pub use settings::{ConnectionSettings, CoreConfig, LoggingSettings};

use directories::ProjectDirs;
use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File could not be read or written
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML could not be parsed
    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML could not be written
    #[error("Could not serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// JSON document could not be read or written
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML document could not be read
    #[error("Invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// No platform config directory
    #[error("Could not determine config directory")]
    NoConfigDir,
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "portpilot", "PortPilot")
}

/// Get the application configuration directory
pub fn config_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the application data directory
pub fn data_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().to_path_buf())
}

/// Get the log directory
pub fn log_dir() -> Option<PathBuf> {
    data_dir().map(|d| d.join("logs"))
}

/// Get the directory exported recordings go to
pub fn recordings_dir() -> Option<PathBuf> {
    data_dir().map(|d| d.join("recordings"))
}

/// Load a frame layout from a `.json`, `.yaml`/`.yml` or `.toml` file
pub fn load_frame_definition(path: &std::path::Path) -> Result<crate::core::protocol::FrameDefinition, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    let definition = match extension.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&content)?,
        "toml" => toml::from_str(&content)?,
        _ => serde_json::from_str(&content)?,
    };
    Ok(definition)
}
