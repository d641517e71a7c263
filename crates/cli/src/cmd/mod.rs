pub mod config;
pub mod watch;

use anyhow::{Context, Result};
use std::path::Path;
use watcher::WatchConfig;

/// Load the config file if one was given, defaults otherwise
pub fn load_config(path: Option<&Path>) -> Result<WatchConfig> {
    match path {
        Some(path) => WatchConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(WatchConfig::default()),
    }
}
