//! Watch session configuration
//!
//! Every field has a default, so an empty TOML document is a valid config:
//!
//! ```toml
//! buffer_size = 32768
//! recursive = true
//! batch_window_ms = 20
//! stop_timeout_ms = 2000
//! lossy_names = false
//! dedup_window_ms = 0
//! backend = "native"
//! poll_interval_ms = 3000
//!
//! [ignore]
//! use_ignore_file = true
//! skip_temporary = false
//! patterns = ["*.log"]
//! ```

use crate::error::ConfigError;
use crate::ignore::IgnoreConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Smallest accepted notification buffer
pub const MIN_BUFFER_SIZE: usize = 4 * 1024;
/// Largest accepted notification buffer
pub const MAX_BUFFER_SIZE: usize = 1024 * 1024;
/// Largest accepted batch window
pub const MAX_BATCH_WINDOW_MS: u64 = 1_000;
/// Accepted polling intervals
pub const MIN_POLL_INTERVAL_MS: u64 = 100;
pub const MAX_POLL_INTERVAL_MS: u64 = 60_000;

/// How a session receives changes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// The platform's own API: `ReadDirectoryChangesW` on Windows, the
    /// OS watcher elsewhere. Falls back to polling if it cannot be opened.
    #[default]
    Native,
    /// The OS watcher chosen by `notify`, falling back to polling
    Recommended,
    /// Periodic rescans only; works on network and cloud-synced folders
    Poll,
}

/// Configuration applied to every session a manager starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Notification buffer size in bytes
    pub buffer_size: usize,

    /// Watch subdirectories too
    pub recursive: bool,

    /// Window for coalescing notifications into one buffer (portable backend)
    pub batch_window_ms: u64,

    /// How long `stop` waits for the watch thread before detaching it
    pub stop_timeout_ms: u64,

    /// Replace unconvertible name sequences instead of skipping the event
    pub lossy_names: bool,

    /// Suppress repeats of (name, action) within this window; 0 disables
    pub dedup_window_ms: u64,

    /// Notification mechanism
    pub backend: Backend,

    /// Rescan interval when polling
    pub poll_interval_ms: u64,

    /// Ignore rules
    pub ignore: IgnoreConfig,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            buffer_size: 32 * 1024,
            recursive: true,
            batch_window_ms: 20,
            stop_timeout_ms: 2_000,
            lossy_names: false,
            dedup_window_ms: 0,
            backend: Backend::Native,
            poll_interval_ms: 3_000,
            ignore: IgnoreConfig::default(),
        }
    }
}

impl WatchConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_BUFFER_SIZE..=MAX_BUFFER_SIZE).contains(&self.buffer_size) {
            return Err(ConfigError::Invalid(format!(
                "buffer_size must be between {} and {}, got {}",
                MIN_BUFFER_SIZE, MAX_BUFFER_SIZE, self.buffer_size
            )));
        }

        if self.batch_window_ms > MAX_BATCH_WINDOW_MS {
            return Err(ConfigError::Invalid(format!(
                "batch_window_ms must be at most {}, got {}",
                MAX_BATCH_WINDOW_MS, self.batch_window_ms
            )));
        }

        if !(MIN_POLL_INTERVAL_MS..=MAX_POLL_INTERVAL_MS).contains(&self.poll_interval_ms) {
            return Err(ConfigError::Invalid(format!(
                "poll_interval_ms must be between {} and {}, got {}",
                MIN_POLL_INTERVAL_MS, MAX_POLL_INTERVAL_MS, self.poll_interval_ms
            )));
        }

        if self.stop_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "stop_timeout_ms must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn batch_window(&self) -> Duration {
        Duration::from_millis(self.batch_window_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn dedup_window(&self) -> Option<Duration> {
        (self.dedup_window_ms > 0).then(|| Duration::from_millis(self.dedup_window_ms))
    }

    /// Capacity of the portable backend's notification queue
    ///
    /// Sized like the native buffer, assuming ~64 bytes per record.
    pub fn queue_capacity(&self) -> usize {
        (self.buffer_size / 64).max(64)
    }
}
