//! On-disk layout strategy
//!
//! A [`DataTable`](super::DataTable) owns the file, the common header and the
//! lifecycle; the layout owns the data region and the mapping from dense
//! logical positions to bytes. Layout operations take the open file and
//! report raw `io::Error`s; the table wraps them with the path.
//!
//! Malformed data is reported as `InvalidData` (or `UnexpectedEof` for
//! truncation) so the table can classify it as a corrupted source.

use std::fs::File;
use std::io::{self, Read, Write};

use serde::Serialize;

use crate::record::Record;

/// Which layout a table file uses, identified by its signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutKind {
    /// Fixed-size frames with an in-file free list
    Slotted,
    /// Append-only tagged records
    Tombstoned,
}

impl LayoutKind {
    /// The 7-byte file signature.
    pub fn signature(&self) -> &'static [u8; 7] {
        match self {
            LayoutKind::Slotted => b"EZDBFR1",
            LayoutKind::Tombstoned => b"EZDBFZ1",
        }
    }

    /// File extension, without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            LayoutKind::Slotted => "frt",
            LayoutKind::Tombstoned => "fzt",
        }
    }

    pub fn from_signature(signature: &[u8]) -> Option<Self> {
        [LayoutKind::Slotted, LayoutKind::Tombstoned]
            .into_iter()
            .find(|kind| kind.signature().as_slice() == signature)
    }
}

/// Storage strategy of a table file.
///
/// Positions passed in are always within `[0, count)`: the table checks
/// preconditions before delegating.
pub trait Layout<R: Record>: Send + 'static {
    const KIND: LayoutKind;

    /// Bytes appended to the common header.
    const HEADER_FIELDS_LEN: usize;

    /// A layout with an empty data region.
    fn empty() -> Self;

    fn read_header_fields(&mut self, reader: &mut dyn Read) -> io::Result<()>;

    fn write_header_fields(&self, writer: &mut dyn Write) -> io::Result<()>;

    /// Forgets every record. The data region starts at `data_offset`.
    fn reset(&mut self, data_offset: u64);

    /// Rebuilds the in-memory state from the data region.
    ///
    /// Called once per open, after the header fields were read.
    fn load(&mut self, file: &mut File, data_offset: u64) -> io::Result<()>;

    /// Number of live records.
    fn count(&self) -> usize;

    fn get(&mut self, file: &mut File, position: usize) -> io::Result<R>;

    /// Stores `record`, returns its logical position.
    fn insert(&mut self, file: &mut File, record: &R) -> io::Result<usize>;

    /// Overwrites the record at `position`, returns its logical position
    /// afterwards, which may differ.
    fn replace(&mut self, file: &mut File, position: usize, record: &R) -> io::Result<usize>;

    fn delete(&mut self, file: &mut File, position: usize) -> io::Result<()>;
}

pub(crate) fn invalid_data(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}
