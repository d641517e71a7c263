//! Notification buffer parser
//!
//! Decodes the self-chaining record layout written by
//! `ReadDirectoryChangesW`:
//!
//! ```text
//! offset  size  field
//! 0       4     next entry offset (0 = last record)
//! 4       4     action code
//! 8       4     name length in bytes
//! 12      n     name, UTF-16LE, not terminated
//! ```
//!
//! All integers are little-endian. The parser never reads past the valid
//! length it is given and stops at the first malformed record.

use crate::error::ParseError;
use crate::record::{ChangeRecord, RawName, RecordAction};

/// Size of the fixed record header
pub const HEADER_LEN: usize = 12;

/// Lazy iterator over the records of one buffer
///
/// Yields at most one `Err`, after which the sequence ends.
#[derive(Debug, Clone)]
pub struct Records<'a> {
    buf: &'a [u8],
    offset: Option<usize>,
}

/// Parse the first `valid_len` bytes of `buf`
///
/// An empty buffer yields nothing.
pub fn parse(buf: &[u8], valid_len: usize) -> Records<'_> {
    let buf = &buf[..valid_len.min(buf.len())];
    Records {
        buf,
        offset: if buf.is_empty() { None } else { Some(0) },
    }
}

impl<'a> Records<'a> {
    fn read_u32(&self, at: usize) -> u32 {
        let bytes = [
            self.buf[at],
            self.buf[at + 1],
            self.buf[at + 2],
            self.buf[at + 3],
        ];
        u32::from_le_bytes(bytes)
    }

    fn decode_at(&self, offset: usize) -> Result<ChangeRecord, ParseError> {
        let len = self.buf.len();
        if offset.checked_add(HEADER_LEN).map_or(true, |end| end > len) {
            return Err(ParseError::TruncatedHeader { offset, len });
        }

        let next_entry_offset = self.read_u32(offset);
        let action = RecordAction::from_code(self.read_u32(offset + 4));
        let name_len = self.read_u32(offset + 8) as usize;

        let name_start = offset + HEADER_LEN;
        if name_start.checked_add(name_len).map_or(true, |end| end > len) {
            return Err(ParseError::NameOverrun {
                offset,
                name_len,
                len,
            });
        }
        if name_len % 2 != 0 {
            return Err(ParseError::OddNameLength { offset, name_len });
        }

        let units = self.buf[name_start..name_start + name_len]
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();

        Ok(ChangeRecord {
            action,
            name: RawName::Wide(units),
            next_entry_offset,
        })
    }
}

impl Iterator for Records<'_> {
    type Item = Result<ChangeRecord, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        let offset = self.offset.take()?;

        match self.decode_at(offset) {
            Ok(record) => {
                if record.next_entry_offset != 0 {
                    self.offset = offset.checked_add(record.next_entry_offset as usize);
                }
                Some(Ok(record))
            }
            Err(e) => Some(Err(e)),
        }
    }
}
