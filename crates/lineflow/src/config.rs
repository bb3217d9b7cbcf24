//! Configuration for the connector

use crate::error::{ConnectorError, Result};
use lineflow_logging::LogRetention;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Connector-wide settings shared by every `read` call that uses them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Directory holding checkpoint files
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,

    /// Autocommit interval used when a caller does not pass one
    #[serde(default = "default_autocommit_ms")]
    pub default_autocommit_ms: u64,

    /// Rescan interval when autocommit is disabled
    #[serde(default = "default_idle_poll_interval_ms")]
    pub idle_poll_interval_ms: u64,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub follow_symlinks: bool,

    /// Include dot-files and dot-directories when listing
    #[serde(default = "default_include_hidden")]
    pub include_hidden: bool,

    /// Log file size and history for binaries that read this config
    #[serde(default)]
    pub logging: LogRetention,
}

/// Commit delivery retry settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Upper bound on random extra delay per attempt
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

fn default_checkpoint_dir() -> PathBuf {
    lineflow_logging::checkpoints_dir()
}

fn default_autocommit_ms() -> u64 {
    1_500
}

fn default_idle_poll_interval_ms() -> u64 {
    1_500
}

fn default_include_hidden() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_backoff_ms() -> u64 {
    50
}

fn default_max_backoff_ms() -> u64 {
    1_000
}

fn default_jitter_ms() -> u64 {
    50
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: default_checkpoint_dir(),
            default_autocommit_ms: default_autocommit_ms(),
            idle_poll_interval_ms: default_idle_poll_interval_ms(),
            retry: RetryConfig::default(),
            follow_symlinks: false,
            include_hidden: default_include_hidden(),
            logging: LogRetention::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

impl ConnectorConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ConnectorConfig =
            toml::from_str(&content).map_err(|e| ConnectorError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConnectorError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_autocommit_ms == 0 {
            return Err(ConnectorError::Config(
                "default_autocommit_ms must be positive".to_string(),
            ));
        }
        if self.idle_poll_interval_ms == 0 {
            return Err(ConnectorError::Config(
                "idle_poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.logging.max_file_bytes == 0 || self.logging.max_files == 0 {
            return Err(ConnectorError::Config(
                "logging.max_file_bytes and logging.max_files must be positive".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConnectorError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn idle_poll_interval(&self) -> Duration {
        Duration::from_millis(self.idle_poll_interval_ms)
    }
}
