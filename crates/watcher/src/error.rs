//! Error taxonomy for watch sessions
//!
//! Only [`WatchError`] and [`ConfigError`] ever reach a caller. Everything
//! else is recovered inside the watch loop and surfaces through logging and
//! session statistics.

use crate::event::SessionId;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Synchronous failure of [`crate::WatchManager::start`]
#[derive(Debug, Error)]
pub enum WatchError {
    /// Bad input: empty path, control characters, not a directory
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Directory could not be opened for change notification
    #[error("cannot open {} for change notification (os error {})", .path.display(), os_code(.code))]
    OpenFailed {
        path: PathBuf,
        code: Option<i32>,
        #[source]
        source: io::Error,
    },

    /// A session with this identifier is already running
    #[error("session {0} is already running")]
    AlreadyRunning(SessionId),

    /// The consumer could not resolve its event entry point
    #[error("consumer for session {id} could not be resolved: {reason}")]
    HandlerUnresolved { id: SessionId, reason: String },

    /// The background thread could not be spawned
    #[error("failed to spawn watch thread: {0}")]
    Spawn(#[source] io::Error),
}

impl WatchError {
    pub(crate) fn open_failed(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::OpenFailed {
            path: path.into(),
            code: source.raw_os_error(),
            source,
        }
    }
}

fn os_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "unknown".to_string(), |c| c.to_string())
}

/// Failure of the blocking notification wait
///
/// Cancellation is not an error; any `WaitError` ends the session.
#[derive(Debug, Error)]
pub enum WaitError {
    #[error("notification wait failed (os error {}): {}", os_code(.code), .source)]
    Os {
        code: Option<i32>,
        #[source]
        source: io::Error,
    },

    #[error("notification backend failed: {0}")]
    Backend(String),

    #[error("notification backend disconnected")]
    Disconnected,
}

impl From<io::Error> for WaitError {
    fn from(source: io::Error) -> Self {
        Self::Os {
            code: source.raw_os_error(),
            source,
        }
    }
}

/// Per-event failure, recovered by skipping the event
#[derive(Debug, Error)]
pub enum EventError {
    /// Entry name could not be converted to UTF-8
    #[error("entry name is not valid unicode: {0}")]
    Encoding(String),

    /// The consumer's execution context could not be entered
    #[error("cannot enter consumer context: {0}")]
    Boundary(String),

    /// The consumer returned an error
    #[error("consumer failed: {0:#}")]
    Handler(anyhow::Error),

    /// The consumer panicked
    #[error("consumer panicked: {0}")]
    HandlerPanicked(String),
}

/// Malformed notification buffer
///
/// Parsing stops at the first malformed record; records before it are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("record header at offset {offset} exceeds buffer of {len} bytes")]
    TruncatedHeader { offset: usize, len: usize },

    #[error("record name at offset {offset} ({name_len} bytes) overruns buffer of {len} bytes")]
    NameOverrun {
        offset: usize,
        name_len: usize,
        len: usize,
    },

    #[error("record name at offset {offset} has odd byte length {name_len}")]
    OddNameLength { offset: usize, name_len: usize },
}

/// Configuration load or validation failure
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Result type for watch management operations
pub type Result<T, E = WatchError> = std::result::Result<T, E>;
