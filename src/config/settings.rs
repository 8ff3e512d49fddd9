//! Engine settings

use super::ConfigError;
use crate::core::automation::{AutoResponseRule, AutomationEngine, ScheduledTask};
use crate::core::connection::ConnectionOptions;
use crate::core::protocol::{FrameCodec, FrameDefinition};
use crate::core::transport::TransportConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Complete configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Reader and lifecycle tuning
    pub connection: ConnectionSettings,
    /// Default line parameters
    pub transport: TransportConfig,
    /// Logging settings
    pub logging: LoggingSettings,
    /// Frame layouts registered at startup
    pub frames: Vec<FrameDefinition>,
    /// Auto-response rules installed at startup
    pub rules: Vec<AutoResponseRule>,
    /// Scheduled tasks installed at startup
    pub tasks: Vec<ScheduledTask>,
}

impl CoreConfig {
    /// Load config from the default location; a missing file yields defaults
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::default_path()?)
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::default_path()?)
    }

    /// `config.toml` in the platform config directory
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        super::config_dir()
            .map(|dir| dir.join("config.toml"))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Load from a specific file; a missing file yields defaults
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        debug!(path = %path.display(), "Config loaded");
        Ok(config)
    }

    /// Save to a specific file, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Register the configured frame layouts. Duplicates are skipped.
    pub fn register_frames(&self, codec: &FrameCodec) {
        for frame in &self.frames {
            if let Err(e) = codec.register(frame.clone()) {
                warn!(frame = %frame.name, error = %e, "Frame definition skipped");
            }
        }
    }

    /// Install the configured rules and tasks. Rejected entries are skipped.
    pub fn install_automation(&self, engine: &AutomationEngine) {
        for rule in &self.rules {
            if let Err(e) = engine.add_rule(rule.clone()) {
                warn!(rule = %rule.name, error = %e, "Rule skipped");
            }
        }
        for task in &self.tasks {
            if let Err(e) = engine.add_task(task.clone()) {
                warn!(task = %task.name, error = %e, "Task skipped");
            }
        }
    }
}

/// `[connection]` section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Reader sleep when no input is buffered
    pub poll_interval_ms: u64,
    /// How long a close waits for the reader
    pub close_grace_ms: u64,
    /// Event channel capacity
    pub event_capacity: usize,
    /// Largest chunk read at once
    pub read_chunk_max: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self::from(ConnectionOptions::default())
    }
}

impl From<ConnectionOptions> for ConnectionSettings {
    fn from(options: ConnectionOptions) -> Self {
        Self {
            poll_interval_ms: u64::try_from(options.poll_interval.as_millis()).unwrap_or(u64::MAX),
            close_grace_ms: u64::try_from(options.close_grace.as_millis()).unwrap_or(u64::MAX),
            event_capacity: options.event_capacity,
            read_chunk_max: options.read_chunk_max,
        }
    }
}

impl ConnectionSettings {
    /// Runtime options. Zero capacities are raised to 1.
    pub fn options(&self) -> ConnectionOptions {
        ConnectionOptions {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            close_grace: Duration::from_millis(self.close_grace_ms),
            event_capacity: self.event_capacity.max(1),
            read_chunk_max: self.read_chunk_max.max(1),
        }
    }
}

/// `[logging]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
    /// Directory for daily log files; console only when unset
    pub directory: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::automation::MatchKind;
    use crate::core::protocol::layout::sample_definition;

    #[test]
    fn test_defaults() {
        let config = CoreConfig::default();
        assert_eq!(config.connection.poll_interval_ms, 10);
        assert_eq!(config.connection.close_grace_ms, 3000);
        assert_eq!(config.connection.event_capacity, 1024);
        assert_eq!(config.connection.read_chunk_max, 4096);
        assert_eq!(config.transport.baud, 9600);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.connection.options(), ConnectionOptions::default());
    }

    #[test]
    fn test_partial_file() {
        let config: CoreConfig = toml::from_str(
            r#"
[connection]
poll_interval_ms = 5

[transport]
id = "/dev/ttyUSB0"
baud = 115200
parity = "Even"

[[rules]]
name = "at"
pattern = "41540d0a"
match_kind = "exact"
response = "4f4b0d0a"
"#,
        )
        .unwrap();

        assert_eq!(config.connection.poll_interval_ms, 5);
        assert_eq!(config.connection.close_grace_ms, 3000);
        assert_eq!(config.transport.id, "/dev/ttyUSB0");
        assert_eq!(config.transport.data_bits, 8);
        assert_eq!(config.rules[0].match_kind, MatchKind::Exact);
        assert_eq!(config.rules[0].response, b"OK\r\n".to_vec());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = CoreConfig::default();
        config.frames.push(sample_definition());
        config.tasks.push(ScheduledTask::new("poll", &[0x01, 0x03], Duration::from_millis(250)).repeat(5));
        config.save_to(&path).unwrap();

        let loaded = CoreConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = CoreConfig::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(loaded, CoreConfig::default());
    }

    #[test]
    fn test_bad_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "connection = 3").unwrap();
        assert!(matches!(CoreConfig::load_from(&path), Err(ConfigError::Parse(_))));
    }
}
