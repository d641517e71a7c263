//! Cancellable blocking notification sources
//!
//! A source owns the OS directory handle. Its [`ChangeSource::wait`] blocks
//! the watch thread until the OS hands over a buffer of changes; the paired
//! [`Cancel`] handle lives with the session and interrupts that wait from
//! any other thread.
//!
//! Which source a session gets follows [`Backend`]. If the preferred
//! mechanism cannot be opened on an existing directory (network shares,
//! exhausted watch limits), the session falls back to polling.

#[cfg(windows)]
pub mod native;

pub mod portable;

use crate::config::{Backend, WatchConfig};
use crate::error::{ParseError, WaitError, WatchError};
use crate::parse;
use crate::record::ChangeRecord;
use crate::stats::SessionStats;
use portable::Mode;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// One buffer's worth of changes
#[derive(Debug, Default)]
pub struct Batch {
    /// Records in the order the OS reported them
    pub records: Vec<ChangeRecord>,
    /// Set when decoding stopped early on a malformed record
    pub malformed: Option<ParseError>,
}

impl Batch {
    /// Decode the first `valid_len` bytes of a raw notification buffer
    ///
    /// Records before a malformed one are kept.
    pub fn decode(buf: &[u8], valid_len: usize) -> Self {
        let mut batch = Self::default();
        for record in parse::parse(buf, valid_len) {
            match record {
                Ok(record) => batch.records.push(record),
                Err(e) => batch.malformed = Some(e),
            }
        }
        batch
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Outcome of one blocking wait
#[derive(Debug)]
pub enum Wait {
    Batch(Batch),
    /// The wait was interrupted through [`Cancel`]
    Cancelled,
}

/// Blocking side of a notification source, owned by the watch thread
pub trait ChangeSource: Send {
    /// Block until changes arrive or the wait is cancelled
    fn wait(&mut self) -> Result<Wait, WaitError>;
}

/// Interrupts a pending [`ChangeSource::wait`] and releases the OS handle
///
/// Must be idempotent: the session's `stop` and the watch thread's own
/// teardown may both call it.
pub trait Cancel: Send + Sync {
    fn cancel(&self);

    fn is_cancelled(&self) -> bool;
}

/// A freshly opened source and its cancellation handle
pub struct OpenedSource {
    pub source: Box<dyn ChangeSource>,
    pub cancel: Arc<dyn Cancel>,
}

/// Open the configured notification source on a canonical directory
pub fn open(
    root: &Path,
    config: &WatchConfig,
    stats: Arc<SessionStats>,
) -> Result<OpenedSource, WatchError> {
    let poll = || portable::open(root, config, stats.clone(), Mode::Poll);

    match config.backend {
        Backend::Poll => poll(),
        Backend::Recommended => with_fallback(
            || portable::open(root, config, stats.clone(), Mode::Recommended),
            poll,
        ),
        #[cfg(windows)]
        Backend::Native => with_fallback(|| native::open(root, config, stats.clone()), poll),
        #[cfg(not(windows))]
        Backend::Native => with_fallback(
            || portable::open(root, config, stats.clone(), Mode::Recommended),
            poll,
        ),
    }
}

/// Try `primary`; if the directory exists but cannot be watched that way, use `fallback`
fn with_fallback<P, F>(primary: P, fallback: F) -> Result<OpenedSource, WatchError>
where
    P: FnOnce() -> Result<OpenedSource, WatchError>,
    F: FnOnce() -> Result<OpenedSource, WatchError>,
{
    match primary() {
        Err(err) if can_fall_back(&err) => {
            warn!("{}; falling back to polling", err);
            fallback()
        }
        other => other,
    }
}

fn can_fall_back(err: &WatchError) -> bool {
    match err {
        WatchError::OpenFailed { source, .. } => !matches!(
            source.kind(),
            io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
        ),
        _ => false,
    }
}
