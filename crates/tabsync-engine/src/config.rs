//! Engine configuration
//!
//! Loaded from TOML, then optionally overridden from the environment:
//!
//! | variable | field |
//! |---|---|
//! | `TABSYNC_CHANNEL_URL` | `channel_base_url` |
//! | `TABSYNC_USER_ID` | `user_id` |
//! | `TABSYNC_ROLE` | `role` |
//! | `TABSYNC_QUEUE_HIGH_WATER` | `queue.high_water_mark` |

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use tabsync_broadcast::BroadcastConfig;
use tabsync_core::ConfigError;
use tabsync_storage::QueueConfig;
use tabsync_transport::BackoffConfig;

use crate::lane::Topic;

/// Everything the engine needs that is supplied from outside
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Channel url without the topic; `/orders` and `/notifications` are appended
    pub channel_base_url: String,
    pub user_id: String,
    pub role: String,
    /// Seconds between snapshot refetches while connected; 0 disables
    pub resync_interval_secs: u64,
    /// Prefix of this tab's cache and queue keys
    pub cache_namespace: String,
    /// Directory for the durable medium; in-memory when unset
    pub storage_dir: Option<PathBuf>,
    pub backoff: BackoffConfig,
    pub queue: QueueConfig,
    pub broadcast: BroadcastConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            channel_base_url: "ws://localhost:8080/ws".to_string(),
            user_id: "anonymous".to_string(),
            role: "viewer".to_string(),
            resync_interval_secs: 60,
            cache_namespace: "tabsync".to_string(),
            storage_dir: None,
            backoff: BackoffConfig::default(),
            queue: QueueConfig::default(),
            broadcast: BroadcastConfig::default(),
        }
    }
}

impl SyncConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Read a TOML file, apply environment overrides and validate
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_toml_str(&text)?.with_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `TABSYNC_*` environment overrides
    pub fn with_env(self) -> Result<Self, ConfigError> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from `lookup`, keyed by environment variable name
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("TABSYNC_CHANNEL_URL") {
            self.channel_base_url = url;
        }
        if let Some(user_id) = lookup("TABSYNC_USER_ID") {
            self.user_id = user_id;
        }
        if let Some(role) = lookup("TABSYNC_ROLE") {
            self.role = role;
        }
        if let Some(high_water) = lookup("TABSYNC_QUEUE_HIGH_WATER") {
            self.queue.high_water_mark = high_water.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!(
                    "TABSYNC_QUEUE_HIGH_WATER is not a number: {}",
                    high_water
                ))
            })?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel_base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("channel_base_url is empty".into()));
        }
        if self.backoff.base_ms == 0 {
            return Err(ConfigError::Invalid("backoff.base_ms must be positive".into()));
        }
        if self.backoff.base_ms > self.backoff.max_ms {
            return Err(ConfigError::Invalid(format!(
                "backoff.base_ms ({}) exceeds backoff.max_ms ({})",
                self.backoff.base_ms, self.backoff.max_ms
            )));
        }
        if self.queue.high_water_mark == 0 {
            return Err(ConfigError::Invalid("queue.high_water_mark must be positive".into()));
        }
        if self.queue.ack_timeout_ms == 0 {
            return Err(ConfigError::Invalid("queue.ack_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn resync_interval(&self) -> Option<Duration> {
        (self.resync_interval_secs > 0).then(|| Duration::from_secs(self.resync_interval_secs))
    }

    /// Full channel url of one topic
    pub fn channel_url(&self, topic: Topic) -> String {
        format!(
            "{}/{}",
            self.channel_base_url.trim_end_matches('/'),
            topic.as_str()
        )
    }
}
