//! Path and name normalization
//!
//! Pure functions: native names to UTF-8, root + name joining, and the
//! advisory size lookup.

use crate::error::EventError;
use crate::record::RawName;
use std::path::{Path, MAIN_SEPARATOR};

/// Convert a native name to UTF-8
///
/// With `lossy`, ill-formed sequences become U+FFFD instead of failing.
pub fn to_utf8(name: &RawName, lossy: bool) -> Result<String, EventError> {
    match name {
        RawName::Wide(units) if lossy => Ok(String::from_utf16_lossy(units)),
        RawName::Wide(units) => String::from_utf16(units)
            .map_err(|_| EventError::Encoding(String::from_utf16_lossy(units))),
        RawName::Native(name) if lossy => Ok(name.to_string_lossy().into_owned()),
        RawName::Native(name) => name
            .clone()
            .into_string()
            .map_err(|raw| EventError::Encoding(raw.to_string_lossy().into_owned())),
    }
}

fn is_separator(c: char) -> bool {
    c == '/' || c == MAIN_SEPARATOR
}

/// Join `dir` and `name` with exactly one platform separator between them
pub fn join_path(dir: &str, name: &str) -> String {
    let name = name.trim_start_matches(is_separator);
    if name.is_empty() {
        return dir.to_string();
    }

    let dir = dir.trim_end_matches(is_separator);
    let mut joined = String::with_capacity(dir.len() + 1 + name.len());
    joined.push_str(dir);
    joined.push(MAIN_SEPARATOR);
    joined.push_str(name);
    joined
}

/// UTF-8 form of a canonical root, without the `\\?\` verbatim prefix
/// that canonicalization adds on Windows for local drives
pub fn root_string(root: &Path) -> String {
    let text = root.to_string_lossy();
    match text.strip_prefix(r"\\?\") {
        Some(rest) if !rest.starts_with("UNC") => rest.to_string(),
        _ => text.into_owned(),
    }
}

/// Best-effort size of a regular file; 0 for anything else or on error
pub fn file_size(path: &Path) -> u64 {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => meta.len(),
        _ => 0,
    }
}
