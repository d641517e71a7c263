//! Normalized change events handed to consumers

use chrono::{DateTime, Local, SecondsFormat};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Caller-supplied session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub i32);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for SessionId {
    fn from(id: i32) -> Self {
        Self(id)
    }
}

/// Canonical classification of a change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionTag {
    Create,
    Modify,
    Delete,
    /// Old half of a rename whose new half never arrived
    RenameOld,
    /// New half of a rename whose old half never arrived
    RenameNew,
    /// Both halves of a rename, correlated
    Rename,
    Unknown,
}

impl ActionTag {
    /// Wire string passed across the consumer boundary
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Modify => "MODIFY",
            Self::Delete => "DELETE",
            Self::RenameOld => "RENAME_OLD",
            Self::RenameNew => "RENAME_NEW",
            Self::Rename => "RENAME",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Whether the entry is known to be gone when the event is built
    pub fn is_removal(self) -> bool {
        matches!(self, Self::Delete | Self::RenameOld)
    }
}

impl fmt::Display for ActionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A change, ready for delivery
///
/// Built immediately before dispatch and dropped right after the consumer
/// returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub session_id: SessionId,
    /// Watched root joined with `name`
    pub path: String,
    /// Entry path relative to the watched root, as reported by the OS
    pub name: String,
    pub action: ActionTag,
    /// Previous name, set for [`ActionTag::Rename`] only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_path: Option<String>,
    /// Advisory size read after the notification; 0 when unavailable
    pub size: u64,
    /// Dispatch time, ISO-8601 with milliseconds in the local zone
    pub timestamp: String,
}

/// Format a dispatch timestamp
pub fn format_timestamp(at: DateTime<Local>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, false)
}

/// Current local time as a dispatch timestamp
pub fn now_timestamp() -> String {
    format_timestamp(Local::now())
}
