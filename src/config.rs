//! Runtime settings.
//!
//! Layering, lowest to highest: built-in defaults, optional TOML file, `TALLY__*`
//! environment variables, then whatever the binary overrides from its command line.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::SettingsError;

pub const DEFAULT_SHEET_NAME: &str = "Processed_Data";
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MAX_EXECUTION_SECS: u64 = 360;
pub const DEFAULT_QUOTA_WARNING_THRESHOLD: f64 = 0.8;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub addr: String,
    pub data_dir: PathBuf,
    pub sheet_name: String,
    pub lock_timeout_ms: u64,
    /// Falls back to the execution budget when unset.
    pub lock_lease_ms: Option<u64>,
    pub max_execution_secs: u64,
    pub quota_warning_threshold: f64,
    pub strict_durability: bool, // true = fsync per append
    pub log_level: String,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8080".to_string(),
            data_dir: PathBuf::from("data"),
            sheet_name: DEFAULT_SHEET_NAME.to_string(),
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            lock_lease_ms: None,
            max_execution_secs: DEFAULT_MAX_EXECUTION_SECS,
            quota_warning_threshold: DEFAULT_QUOTA_WARNING_THRESHOLD,
            strict_durability: true,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

impl Settings {
    /// Loads defaults, then the file at `path` if given, then `TALLY__*` env vars.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        let settings: Settings = builder
            .add_source(
                Environment::with_prefix("TALLY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.lock_timeout_ms == 0 {
            return Err(SettingsError::Invalid {
                key: "lock_timeout_ms",
                reason: "must be greater than zero".into(),
            });
        }
        if self.lock_lease_ms == Some(0) {
            return Err(SettingsError::Invalid {
                key: "lock_lease_ms",
                reason: "must be greater than zero".into(),
            });
        }
        if self.max_execution_secs == 0 {
            return Err(SettingsError::Invalid {
                key: "max_execution_secs",
                reason: "must be greater than zero".into(),
            });
        }
        if !(self.quota_warning_threshold > 0.0 && self.quota_warning_threshold <= 1.0) {
            return Err(SettingsError::Invalid {
                key: "quota_warning_threshold",
                reason: format!("{} is outside (0, 1]", self.quota_warning_threshold),
            });
        }
        let name = self.sheet_name.as_str();
        if name.is_empty() || name == "." || name == ".." || name.contains(|c: char| matches!(c, '/' | '\\' | '\0')) {
            return Err(SettingsError::Invalid {
                key: "sheet_name",
                reason: format!("{name:?} is not a usable sheet name"),
            });
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn max_execution(&self) -> Duration {
        Duration::from_secs(self.max_execution_secs)
    }

    pub fn lock_lease(&self) -> Duration {
        self.lock_lease_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.max_execution())
    }

    /// Subset handed to the write coordinator.
    pub fn write_config(&self) -> WriteConfig {
        WriteConfig {
            sheet_name: self.sheet_name.clone(),
            lock_timeout: self.lock_timeout(),
            max_execution: self.max_execution(),
            quota_warning_threshold: self.quota_warning_threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteConfig {
    pub sheet_name: String,
    pub lock_timeout: Duration,
    pub max_execution: Duration,
    pub quota_warning_threshold: f64,
}

impl Default for WriteConfig {
    fn default() -> Self {
        Settings::default().write_config()
    }
}

/// Host sizing for the HTTP runtime.
#[derive(Debug, Clone)]
pub struct SystemProfile {
    pub logical_cores: usize,
    pub worker_threads: usize,
}

impl SystemProfile {
    pub fn detect() -> Self {
        let cores = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self {
            logical_cores: cores,
            // Writes are serialized anyway; 2 keeps one worker free for reads.
            worker_threads: cores.clamp(2, 8),
        }
    }
}
