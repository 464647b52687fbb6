//! Configuration data model.
//!
//! Every section defaults field by field so a partial file only overrides
//! what it names.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::defaults::{
    DEFAULT_API_BASE_URL, DEFAULT_API_TIMEOUT_SECS, DEFAULT_BACKOFF_BASE_SECS,
    DEFAULT_MIN_REFRESH_DELAY_SECS, DEFAULT_WATCH_POLL_SECS,
};
use crate::auth::{
    default_storage_path, BackoffPolicy, SessionSettings, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_REFRESH_BUFFER_SECS,
};

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub session: SessionConfig,
    pub storage: StorageConfig,
}

/// Learning-path server connection settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            timeout_secs: DEFAULT_API_TIMEOUT_SECS,
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Token refresh timing.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
    /// Refresh this many seconds before the token expires.
    pub refresh_buffer_secs: i64,
    pub min_refresh_delay_secs: u64,
    pub max_refresh_attempts: u32,
    pub backoff_base_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            refresh_buffer_secs: DEFAULT_REFRESH_BUFFER_SECS,
            min_refresh_delay_secs: DEFAULT_MIN_REFRESH_DELAY_SECS,
            max_refresh_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base_secs: DEFAULT_BACKOFF_BASE_SECS,
        }
    }
}

impl SessionConfig {
    pub fn settings(&self) -> SessionSettings {
        SessionSettings {
            refresh_buffer_secs: self.refresh_buffer_secs,
            min_refresh_delay: Duration::from_secs(self.min_refresh_delay_secs),
            backoff: BackoffPolicy {
                max_attempts: self.max_refresh_attempts,
                base_delay: Duration::from_secs(self.backoff_base_secs),
            },
        }
    }
}

/// Where the session record and refresh cookie are persisted.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct StorageConfig {
    /// Session file path; defaults to `~/.config/mapmylearn/session.json`.
    pub path: Option<PathBuf>,
    /// Encrypt stored values with a machine-bound key.
    pub encrypt: bool,
    pub watch_poll_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            encrypt: true,
            watch_poll_secs: DEFAULT_WATCH_POLL_SECS,
        }
    }
}

impl StorageConfig {
    pub fn resolved_path(&self) -> Option<PathBuf> {
        self.path.clone().or_else(default_storage_path)
    }

    pub fn watch_poll_interval(&self) -> Duration {
        Duration::from_secs(self.watch_poll_secs.max(1))
    }
}

/// Loaded config plus the file it came from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    /// `None` when only built-in defaults were used.
    pub source: Option<PathBuf>,
}
