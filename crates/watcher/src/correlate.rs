//! Rename correlation
//!
//! The OS reports a rename as two consecutive records: the old name, then
//! the new name. This adapter merges such a pair into one change and lets
//! an unpaired half through on its own.

use crate::event::ActionTag;
use crate::record::{ChangeRecord, RawName, RecordAction};
use std::iter::Peekable;

/// A change after rename correlation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalChange {
    pub action: ActionTag,
    /// Current name (the new name for a rename)
    pub name: RawName,
    /// Previous name, for [`ActionTag::Rename`]
    pub old_name: Option<RawName>,
}

impl LogicalChange {
    fn single(action: ActionTag, name: RawName) -> Self {
        Self {
            action,
            name,
            old_name: None,
        }
    }
}

/// Iterator adapter produced by [`correlate`]
#[derive(Debug)]
pub struct Correlate<I: Iterator<Item = ChangeRecord>> {
    records: Peekable<I>,
}

/// Merge rename pairs in a record stream
pub fn correlate<I>(records: I) -> Correlate<I::IntoIter>
where
    I: IntoIterator<Item = ChangeRecord>,
{
    Correlate {
        records: records.into_iter().peekable(),
    }
}

impl<I: Iterator<Item = ChangeRecord>> Iterator for Correlate<I> {
    type Item = LogicalChange;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.records.next()?;

        let change = match record.action {
            RecordAction::Created => LogicalChange::single(ActionTag::Create, record.name),
            RecordAction::Modified => LogicalChange::single(ActionTag::Modify, record.name),
            RecordAction::Deleted => LogicalChange::single(ActionTag::Delete, record.name),
            RecordAction::RenamedNew => LogicalChange::single(ActionTag::RenameNew, record.name),
            RecordAction::Unknown(_) => LogicalChange::single(ActionTag::Unknown, record.name),
            RecordAction::RenamedFrom => {
                // Only the immediately following record can complete the pair;
                // anything else is left in place for the next call.
                match self
                    .records
                    .next_if(|next| next.action == RecordAction::RenamedNew)
                {
                    Some(new) => LogicalChange {
                        action: ActionTag::Rename,
                        name: new.name,
                        old_name: Some(record.name),
                    },
                    None => LogicalChange::single(ActionTag::RenameOld, record.name),
                }
            }
        };

        Some(change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;

    fn rec(action: RecordAction, name: &str) -> ChangeRecord {
        ChangeRecord::new(action, RawName::Native(OsString::from(name)))
    }

    fn native(name: &str) -> RawName {
        RawName::Native(OsString::from(name))
    }

    #[test]
    fn test_rename_pair_is_merged() {
        let changes: Vec<_> = correlate(vec![
            rec(RecordAction::RenamedFrom, "a.txt"),
            rec(RecordAction::RenamedNew, "b.txt"),
        ])
        .collect();

        assert_eq!(
            changes,
            vec![LogicalChange {
                action: ActionTag::Rename,
                name: native("b.txt"),
                old_name: Some(native("a.txt")),
            }]
        );
    }

    #[test]
    fn test_orphan_old_name_at_end_of_buffer() {
        let changes: Vec<_> = correlate(vec![
            rec(RecordAction::Created, "x"),
            rec(RecordAction::RenamedFrom, "a.txt"),
        ])
        .collect();

        assert_eq!(changes.len(), 2);
        assert_eq!(changes[1].action, ActionTag::RenameOld);
        assert_eq!(changes[1].name, native("a.txt"));
        assert_eq!(changes[1].old_name, None);
    }

    #[test]
    fn test_record_after_orphan_is_processed_normally() {
        let changes: Vec<_> = correlate(vec![
            rec(RecordAction::RenamedFrom, "a.txt"),
            rec(RecordAction::Deleted, "c.txt"),
            rec(RecordAction::RenamedNew, "b.txt"),
        ])
        .collect();

        let actions: Vec<_> = changes.iter().map(|c| c.action).collect();
        assert_eq!(
            actions,
            vec![ActionTag::RenameOld, ActionTag::Delete, ActionTag::RenameNew]
        );
        assert_eq!(changes[1].name, native("c.txt"));
    }

    #[test]
    fn test_back_to_back_renames() {
        let changes: Vec<_> = correlate(vec![
            rec(RecordAction::RenamedFrom, "a"),
            rec(RecordAction::RenamedFrom, "b"),
            rec(RecordAction::RenamedNew, "c"),
        ])
        .collect();

        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].action, ActionTag::RenameOld);
        assert_eq!(changes[0].name, native("a"));
        assert_eq!(changes[1].action, ActionTag::Rename);
        assert_eq!(changes[1].old_name, Some(native("b")));
        assert_eq!(changes[1].name, native("c"));
    }

    #[test]
    fn test_unknown_and_plain_actions_map_to_tags() {
        let changes: Vec<_> = correlate(vec![
            rec(RecordAction::Created, "a"),
            rec(RecordAction::Modified, "a"),
            rec(RecordAction::Unknown(9), "a"),
            rec(RecordAction::Deleted, "a"),
        ])
        .collect();

        let actions: Vec<_> = changes.iter().map(|c| c.action).collect();
        assert_eq!(
            actions,
            vec![ActionTag::Create, ActionTag::Modify, ActionTag::Unknown, ActionTag::Delete]
        );
    }
}
