//! Directory change watching for dirwatch
//!
//! This crate opens a directory, receives change notifications from the OS
//! and delivers them as [`NormalizedEvent`]s to one consumer per session:
//! - One background thread per session, cancellable from any thread
//! - Binary notification buffer parsing with rename correlation
//! - UTF-8 path normalization with a skip-or-replace policy
//! - Panic and error isolation around the consumer
//! - Optional ignore rules and duplicate suppression
//!
//! ```no_run
//! use std::sync::Arc;
//! use watcher::{NormalizedEvent, WatchManager};
//!
//! let manager = WatchManager::default();
//! manager.start(1, "/srv/inbox", Arc::new(|event: &NormalizedEvent| -> anyhow::Result<()> {
//!     println!("{} {}", event.action, event.path);
//!     Ok(())
//! }))?;
//! # Ok::<(), watcher::WatchError>(())
//! ```

pub mod config;
pub mod correlate;
pub mod dedup;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod ignore;
pub mod manager;
pub mod normalize;
pub mod parse;
pub mod record;
pub mod session;
pub mod source;
pub mod stats;

pub use config::WatchConfig;
pub use dispatch::EventHandler;
pub use error::{ConfigError, EventError, ParseError, WaitError, WatchError};
pub use event::{ActionTag, NormalizedEvent, SessionId};
pub use ignore::{IgnoreConfig, IgnoreRules};
pub use manager::WatchManager;
pub use session::{SessionState, WatchSession, WatchStatus};
pub use stats::StatsSnapshot;
