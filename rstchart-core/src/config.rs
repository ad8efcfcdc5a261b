//! Runtime configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via RSTCHART_CONFIG)
//! 3. Environment variables

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Which clock a new system uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockKind {
    /// Wall-clock time.
    #[default]
    System,
    /// Manually advanced with `System::advance`.
    Simulated,
}

impl std::str::FromStr for ClockKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "system" => Ok(ClockKind::System),
            "simulated" => Ok(ClockKind::Simulated),
            other => Err(ConfigError::ValidationError(format!(
                "unknown clock '{other}'"
            ))),
        }
    }
}

/// Actor runtime configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Warn when an action, delay or actor implementation is missing.
    pub dev_mode: bool,
    /// Buffer events sent before `start` instead of rejecting them.
    pub defer_events: bool,
    /// Warn when an event is sent to a stopped actor.
    pub warn_on_dropped: bool,
    /// Clock used by systems created from this config.
    pub clock: ClockKind,
    /// Queue length at which a mailbox logs that it is backing up.
    pub mailbox_warn_len: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            dev_mode: false,
            defer_events: true,
            warn_on_dropped: true,
            clock: ClockKind::System,
            mailbox_warn_len: 10_000,
        }
    }
}

impl RuntimeConfig {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("RSTCHART_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: RuntimeConfig = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("RSTCHART_DEV_MODE") {
            self.dev_mode = parse_flag(&v);
        }

        if let Ok(v) = std::env::var("RSTCHART_DEFER_EVENTS") {
            self.defer_events = parse_flag(&v);
        }

        if let Ok(v) = std::env::var("RSTCHART_WARN_ON_DROPPED") {
            self.warn_on_dropped = parse_flag(&v);
        }

        if let Ok(v) = std::env::var("RSTCHART_CLOCK") {
            match v.parse() {
                Ok(clock) => self.clock = clock,
                Err(e) => tracing::warn!(error = %e, "ignoring RSTCHART_CLOCK"),
            }
        }

        if let Ok(v) = std::env::var("RSTCHART_MAILBOX_WARN_LEN") {
            if let Ok(n) = v.parse() {
                self.mailbox_warn_len = n;
            }
        }
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mailbox_warn_len == 0 {
            return Err(ConfigError::ValidationError(
                "mailbox_warn_len must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_flag(value: &str) -> bool {
    value == "1" || value.to_lowercase() == "true"
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {}", .0.display(), .1)]
    IoError(PathBuf, #[source] std::io::Error),

    #[error("failed to parse config file '{}': {}", .0.display(), .1)]
    ParseError(PathBuf, String),

    #[error("configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();
        assert!(!config.dev_mode);
        assert!(config.defer_events);
        assert!(config.warn_on_dropped);
        assert_eq!(config.clock, ClockKind::System);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_partial() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "dev_mode: true\nclock: simulated").unwrap();

        let config = RuntimeConfig::from_file(file.path()).unwrap();
        assert!(config.dev_mode);
        assert_eq!(config.clock, ClockKind::Simulated);
        assert!(config.defer_events);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rstchart.yaml");
        let config = RuntimeConfig {
            warn_on_dropped: false,
            mailbox_warn_len: 64,
            ..Default::default()
        };
        config.save(&path).unwrap();

        let loaded = RuntimeConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_file_errors() {
        let err = RuntimeConfig::from_file("/nonexistent/rstchart.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::IoError(..)));

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "clock: sundial").unwrap();
        let err = RuntimeConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(..)));
    }

    #[test]
    fn test_validate() {
        let config = RuntimeConfig {
            mailbox_warn_len: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_clock_kind_parse() {
        assert_eq!("Simulated".parse::<ClockKind>().unwrap(), ClockKind::Simulated);
        assert!("sundial".parse::<ClockKind>().is_err());
        assert!(parse_flag("TRUE"));
        assert!(!parse_flag("no"));
    }
}
