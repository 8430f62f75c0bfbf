//! Configuration loading for the outbox.
//!
//! Configuration is loaded from a TOML file (default: `outbox.toml`). Every
//! field and every section is optional.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration for the outbox.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutboxConfig {
    /// Queue limits.
    #[serde(default)]
    pub queue: QueueConfig,
    /// Drain timing.
    #[serde(default)]
    pub sync: SyncConfig,
    /// Durable store locations.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Remote endpoint.
    #[serde(default)]
    pub transport: TransportConfig,
    /// Platform background sync.
    #[serde(default)]
    pub background: BackgroundConfig,
}

/// Queue configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Maximum retained messages, all statuses (default: 100).
    #[serde(default = "default_max_offline_messages")]
    pub max_offline_messages: usize,
    /// Attempts before a message becomes terminal `failed` (default: 3).
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
}

/// Drain timing configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Delay before re-draining residual failures (default: 30).
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    /// Per-send timeout (default: 10).
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
    /// Lifetime of the cross-context drain lease (default: 30).
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,
}

/// Storage configuration. Relative paths resolve against the data directory.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database (primary tier).
    #[serde(default = "default_database_path")]
    pub database: PathBuf,
    /// Path to the snapshot file (fallback tier).
    #[serde(default = "default_fallback_path")]
    pub fallback: PathBuf,
}

/// Remote transport configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransportConfig {
    /// Base URL of the message service. Messages are posted to
    /// `{endpoint}/messages`.
    pub endpoint: Option<String>,
}

/// Background sync configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BackgroundConfig {
    /// Register for background sync after offline enqueues (default: true).
    #[serde(default = "default_background_enabled")]
    pub enabled: bool,
    /// Tag used for registrations (default: "outbox-sync").
    #[serde(default = "default_background_tag")]
    pub tag: String,
}

// Default value functions
fn default_max_offline_messages() -> usize {
    100
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_secs() -> u64 {
    30
}

fn default_send_timeout_secs() -> u64 {
    10
}

fn default_lease_ttl_secs() -> u64 {
    30
}

fn default_database_path() -> PathBuf {
    PathBuf::from("outbox.db")
}

fn default_fallback_path() -> PathBuf {
    PathBuf::from("outbox.fallback")
}

fn default_background_enabled() -> bool {
    true
}

fn default_background_tag() -> String {
    "outbox-sync".to_string()
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_offline_messages: default_max_offline_messages(),
            retry_attempts: default_retry_attempts(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry_delay_secs: default_retry_delay_secs(),
            send_timeout_secs: default_send_timeout_secs(),
            lease_ttl_secs: default_lease_ttl_secs(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database_path(),
            fallback: default_fallback_path(),
        }
    }
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            enabled: default_background_enabled(),
            tag: default_background_tag(),
        }
    }
}

impl SyncConfig {
    /// Delay before a scheduled re-drain.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    /// Timeout applied to every transport call.
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    /// Drain lease lifetime in milliseconds.
    pub fn lease_ttl_ms(&self) -> i64 {
        (self.lease_ttl_secs as i64).saturating_mul(1000)
    }
}

impl StorageConfig {
    /// Primary database path under `data_dir`.
    pub fn database_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.database)
    }

    /// Fallback snapshot path under `data_dir`.
    pub fn fallback_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.fallback)
    }
}

impl OutboxConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.max_offline_messages == 0 {
            return Err(ConfigError::Invalid(
                "queue.max_offline_messages must be at least 1".into(),
            ));
        }
        if self.queue.retry_attempts == 0 {
            return Err(ConfigError::Invalid(
                "queue.retry_attempts must be at least 1".into(),
            ));
        }
        if self.sync.send_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "sync.send_timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
