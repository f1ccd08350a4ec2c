//! Table file header
//!
//! # Format
//!
//! ```text
//! +------------------+
//! | Signature        | (7 bytes, selects the layout)
//! +------------------+
//! | Data Offset      | (i64 LE, = header length)
//! +------------------+
//! | Data Version     | (u32 LE, application stamp)
//! +------------------+
//! | Created          | (i64 ticks)
//! | Last Access      | (i64 ticks)
//! | Last Write       | (i64 ticks)
//! +------------------+
//! | Auto ID          | (u32 LE, last handed-out id)
//! +------------------+
//! | Layout Fields    | (layout specific)
//! +------------------+
//! ```
//!
//! The header is kept in memory while the table is connected and written
//! back on flush when dirty.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use chrono::{DateTime, Timelike, Utc};
use serde::Serialize;

use super::layout::LayoutKind;
use super::slotted::SlottedFields;
use super::tombstoned::TombstonedFields;
use crate::codec::{self, LittleEndian, ReadBytesExt, WriteBytesExt};
use crate::error::{TableError, TableResult};

/// Length of the layout-independent part of the header.
pub const COMMON_HEADER_LEN: usize = 7 + 8 + 4 + 8 * 3 + 4;

const DATA_OFFSET_AT: usize = 7;

/// Current time at the precision the file keeps (100 ns).
pub(crate) fn now() -> DateTime<Utc> {
    let t = Utc::now();
    t.with_nanosecond(t.nanosecond() / 100 * 100).unwrap_or(t)
}

/// Metadata snapshot of a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SourceInfo {
    pub data_version: u32,
    pub created: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
    pub last_write: DateTime<Utc>,
}

/// In-memory copy of the common header
#[derive(Debug, Clone)]
pub struct FileHeader {
    kind: LayoutKind,
    data_offset: u64,
    data_version: u32,
    created: DateTime<Utc>,
    last_access: DateTime<Utc>,
    last_write: DateTime<Utc>,
    auto_id: u32,
    dirty: bool,
}

impl FileHeader {
    /// Defaults for a new file. Dirty until first written.
    pub fn new(kind: LayoutKind, fields_len: usize) -> Self {
        let created = now();
        Self {
            kind,
            data_offset: (COMMON_HEADER_LEN + fields_len) as u64,
            data_version: 0,
            created,
            last_access: created,
            last_write: created,
            auto_id: 0,
            dirty: true,
        }
    }

    /// Reads and validates the header at the start of `file`.
    ///
    /// `read_fields` consumes the layout fields. Any failure is reported as
    /// a corrupted source naming `path`.
    pub(crate) fn read_from(
        file: &mut File,
        path: &Path,
        kind: LayoutKind,
        fields_len: usize,
        read_fields: impl FnOnce(&mut dyn Read) -> io::Result<()>,
    ) -> TableResult<Self> {
        let total = COMMON_HEADER_LEN + fields_len;
        let mut buf = vec![0u8; total];
        file.seek(SeekFrom::Start(0))
            .and_then(|_| file.read_exact(&mut buf))
            .map_err(|e| TableError::corrupted(path, "truncated header", Some(e)))?;

        let found = &buf[..DATA_OFFSET_AT];
        if found != kind.signature().as_slice() {
            return Err(TableError::corrupted(
                path,
                format!(
                    "signature mismatch: expected {}, found {}",
                    String::from_utf8_lossy(kind.signature()),
                    String::from_utf8_lossy(found)
                ),
                None,
            ));
        }

        let mut reader = &buf[DATA_OFFSET_AT..];
        let mut header = Self::decode_common(kind, &mut reader)
            .map_err(|e| TableError::corrupted(path, "invalid header", Some(e)))?;

        if header.data_offset != total as u64 {
            return Err(TableError::corrupted_at(
                path,
                DATA_OFFSET_AT as u64,
                format!(
                    "data offset {} does not match header length {}",
                    header.data_offset, total
                ),
            ));
        }

        read_fields(&mut reader)
            .map_err(|e| TableError::corrupted(path, "invalid layout header fields", Some(e)))?;

        header.dirty = false;
        Ok(header)
    }

    fn decode_common(kind: LayoutKind, reader: &mut dyn Read) -> io::Result<Self> {
        let data_offset = reader.read_i64::<LittleEndian>()?;
        let data_offset = u64::try_from(data_offset).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("negative data offset {}", data_offset),
            )
        })?;

        Ok(Self {
            kind,
            data_offset,
            data_version: reader.read_u32::<LittleEndian>()?,
            created: codec::read_time(reader)?,
            last_access: codec::read_time(reader)?,
            last_write: codec::read_time(reader)?,
            auto_id: reader.read_u32::<LittleEndian>()?,
            dirty: false,
        })
    }

    /// Writes the header at the start of `file` and clears the dirty flag.
    ///
    /// The data offset is recomputed from what was written.
    pub(crate) fn write_to(
        &mut self,
        file: &mut File,
        write_fields: impl FnOnce(&mut dyn Write) -> io::Result<()>,
    ) -> io::Result<()> {
        let mut buf: Vec<u8> = Vec::with_capacity(64);
        buf.write_all(self.kind.signature())?;
        buf.write_i64::<LittleEndian>(0)?;
        buf.write_u32::<LittleEndian>(self.data_version)?;
        codec::write_time(&mut buf, self.created)?;
        codec::write_time(&mut buf, self.last_access)?;
        codec::write_time(&mut buf, self.last_write)?;
        buf.write_u32::<LittleEndian>(self.auto_id)?;
        write_fields(&mut buf)?;

        let data_offset = buf.len() as u64;
        buf[DATA_OFFSET_AT..DATA_OFFSET_AT + 8].copy_from_slice(&(data_offset as i64).to_le_bytes());

        file.seek(SeekFrom::Start(0))?;
        file.write_all(&buf)?;

        self.data_offset = data_offset;
        self.dirty = false;
        Ok(())
    }

    pub fn data_offset(&self) -> u64 {
        self.data_offset
    }

    pub fn data_version(&self) -> u32 {
        self.data_version
    }

    pub fn set_data_version(&mut self, version: u32) {
        self.data_version = version;
        self.dirty = true;
    }

    pub fn auto_id(&self) -> u32 {
        self.auto_id
    }

    /// Increments and returns the auto-id counter.
    pub fn next_auto_id(&mut self) -> u32 {
        self.auto_id += 1;
        self.dirty = true;
        self.auto_id
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Marks layout fields as changed.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn touch_read(&mut self) {
        self.last_access = now();
        self.dirty = true;
    }

    pub fn touch_write(&mut self) {
        let t = now();
        self.last_access = t;
        self.last_write = t;
        self.dirty = true;
    }

    /// Resets the counters on clear. Timestamps are kept.
    pub fn reset_counters(&mut self) {
        self.data_version = 0;
        self.auto_id = 0;
        self.dirty = true;
    }

    pub fn source_info(&self) -> SourceInfo {
        SourceInfo {
            data_version: self.data_version,
            created: self.created,
            last_access: self.last_access,
            last_write: self.last_write,
        }
    }
}

/// Header dump of a table file, as printed by `tabledb inspect`.
#[derive(Debug, Clone, Serialize)]
pub struct HeaderReport {
    pub layout: LayoutKind,
    pub data_offset: u64,
    pub data_version: u32,
    pub created: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
    pub last_write: DateTime<Utc>,
    pub auto_id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slots_count: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub free_list_head: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stored_records: Option<i64>,
    pub file_len: u64,
}

/// Reads the header of any table file without decoding records.
pub fn inspect(path: &Path) -> TableResult<HeaderReport> {
    let mut file = File::open(path).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            TableError::corrupted(path, "table file not found", Some(e))
        } else {
            TableError::io_error(format!("failed to open {}", path.display()), e)
        }
    })?;
    let file_len = file
        .metadata()
        .map_err(|e| TableError::io_error("failed to read file metadata", e))?
        .len();

    let mut signature = [0u8; 7];
    file.read_exact(&mut signature)
        .map_err(|e| TableError::corrupted(path, "truncated header", Some(e)))?;
    let kind = LayoutKind::from_signature(&signature).ok_or_else(|| {
        TableError::corrupted(
            path,
            format!("unknown signature {}", String::from_utf8_lossy(&signature)),
            None,
        )
    })?;

    let mut slotted = None;
    let mut tombstoned = None;
    let header = match kind {
        LayoutKind::Slotted => FileHeader::read_from(&mut file, path, kind, SlottedFields::LEN, |r| {
            slotted = Some(SlottedFields::read(r)?);
            Ok(())
        })?,
        LayoutKind::Tombstoned => {
            FileHeader::read_from(&mut file, path, kind, TombstonedFields::LEN, |r| {
                tombstoned = Some(TombstonedFields::read(r)?);
                Ok(())
            })?
        }
    };

    Ok(HeaderReport {
        layout: kind,
        data_offset: header.data_offset,
        data_version: header.data_version,
        created: header.created,
        last_access: header.last_access,
        last_write: header.last_write,
        auto_id: header.auto_id,
        slots_count: slotted.map(|f| f.slots_count),
        free_list_head: slotted.map(|f| f.free_head),
        stored_records: tombstoned.map(|f| f.stored_records),
        file_len,
    })
}
