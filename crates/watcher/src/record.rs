//! Raw change records as decoded from a notification buffer

use std::ffi::OsString;

/// Action code carried by a single record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordAction {
    Created,
    Deleted,
    Modified,
    RenamedFrom,
    RenamedNew,
    Unknown(u32),
}

impl RecordAction {
    /// Decode a `FILE_ACTION_*` code
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => Self::Created,
            2 => Self::Deleted,
            3 => Self::Modified,
            4 => Self::RenamedFrom,
            5 => Self::RenamedNew,
            other => Self::Unknown(other),
        }
    }
}

/// Entry name in the encoding the OS delivered it in
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawName {
    /// UTF-16 code units, possibly ill-formed
    Wide(Vec<u16>),
    /// Platform string, possibly not UTF-8
    Native(OsString),
}

impl RawName {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Wide(units) => units.is_empty(),
            Self::Native(name) => name.is_empty(),
        }
    }
}

/// One change record, valid for the duration of one buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    pub action: RecordAction,
    /// Path relative to the watched root
    pub name: RawName,
    /// Byte offset from this record to the next; 0 for the last record
    pub next_entry_offset: u32,
}

impl ChangeRecord {
    /// Record that did not come from a byte buffer
    pub fn new(action: RecordAction, name: RawName) -> Self {
        Self {
            action,
            name,
            next_entry_offset: 0,
        }
    }
}
