//! Configuration settings for the carillon reminder engine.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub wizard: WizardConfig,
    pub scheduler: SchedulerConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::ReadFile)?;
        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default locations or use defaults.
    pub fn load() -> Result<Self> {
        let config_paths = [
            // Current directory
            PathBuf::from("config.toml"),
            PathBuf::from("carillon.toml"),
            // User config directory
            dirs::config_dir()
                .map(|p| p.join("carillon/config.toml"))
                .unwrap_or_default(),
            // Home directory
            dirs::home_dir()
                .map(|p| p.join(".carillon/config.toml"))
                .unwrap_or_default(),
        ];

        for path in &config_paths {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::from_file(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Config::default())
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<()> {
        if self.wizard.session_timeout_minutes == 0 {
            return Err(
                ConfigError::Invalid("wizard.session_timeout_minutes must be > 0".to_string())
                    .into(),
            );
        }
        if Tz::from_str(&self.wizard.default_timezone).is_err() {
            return Err(ConfigError::Invalid(format!(
                "wizard.default_timezone is not a known timezone: {}",
                self.wizard.default_timezone
            ))
            .into());
        }
        if self.scheduler.tick_interval_secs == 0 {
            return Err(
                ConfigError::Invalid("scheduler.tick_interval_secs must be > 0".to_string())
                    .into(),
            );
        }
        if self.storage.data_dir.is_empty() {
            return Err(ConfigError::MissingField("storage.data_dir".to_string()).into());
        }
        Ok(())
    }

    /// Expand the data directory path.
    pub fn data_dir(&self) -> PathBuf {
        let expanded = shellexpand::tilde(&self.storage.data_dir);
        PathBuf::from(expanded.as_ref())
    }

    /// The default timezone as a parsed [`Tz`].
    ///
    /// `validate()` has already checked the string, so a parse failure here
    /// means the config was mutated after loading; fall back to UTC.
    pub fn default_timezone(&self) -> Tz {
        Tz::from_str(&self.wizard.default_timezone).unwrap_or(Tz::UTC)
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for session files and the reminder store.
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.carillon".to_string(),
        }
    }
}

/// Wizard engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WizardConfig {
    /// Idle minutes after which a wizard session expires.
    pub session_timeout_minutes: u64,
    /// Timezone assumed for users without a profile timezone.
    pub default_timezone: String,
}

impl Default for WizardConfig {
    fn default() -> Self {
        Self {
            session_timeout_minutes: 15,
            default_timezone: "Europe/Moscow".to_string(),
        }
    }
}

/// Reminder scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between scheduler ticks.
    pub tick_interval_secs: u64,
    /// Minutes after the trigger time past which a due reminder is
    /// marked missed instead of delivered.
    pub grace_window_minutes: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 30,
            grace_window_minutes: 60,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
