//! File-backed table shared by both layouts
//!
//! `DataTable` owns the file handle, the header and the connection
//! lifecycle; the [`Layout`] owns the data region. Every operation runs under
//! the table gate, so a caller holding [`RecordAccess::lock`] sees a stable
//! table across several calls.
//!
//! Precondition failures panic. Faults from disk are returned as
//! [`TableError`]: `InvalidData`/`UnexpectedEof` become corrupted-source
//! errors, anything else an I/O error.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::header::{FileHeader, SourceInfo};
use super::layout::Layout;
use crate::error::{TableError, TableResult};
use crate::lifecycle::{Lifecycle, Release};
use crate::observability::{log_event_with_fields, Event, ObservationScope};
use crate::position::descending_distinct;
use crate::provider::{RecordAccess, Records};
use crate::record::{Record, RecordId};
use crate::sync::{Gate, ScopedLock};

/// How connecting treats the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenMode {
    /// Open the file, create it when missing.
    #[default]
    OpenOrCreate,
    /// The file must exist.
    Open,
    /// The file must not exist.
    Create,
}

/// Storage contract shared by every table, whatever its layout.
///
/// Object safe: providers hold an `Arc<dyn Table<R>>`. All operations
/// except the lifecycle ones require a connected table.
pub trait Table<R: Record>: RecordAccess<R> {
    fn table_id(&self) -> u32;

    fn path(&self) -> &Path;

    /// First connect opens (or creates) the file and loads it.
    fn connect(&self) -> TableResult<()>;

    /// Flushes; the last disconnect also closes the file. Faults are logged.
    fn disconnect(&self);

    fn is_connected(&self) -> bool;

    fn connection_count(&self) -> usize;

    fn insert(&self, record: &R) -> TableResult<usize>;

    fn insert_many(&self, records: &[R]) -> TableResult<Vec<usize>>;

    /// Returns the position of the record after the replace.
    fn replace(&self, position: usize, record: &R) -> TableResult<usize>;

    fn delete(&self, position: usize) -> TableResult<()>;

    /// Deletes the distinct positions, highest first.
    fn delete_many(&self, positions: &[usize]) -> TableResult<()>;

    /// Drops every record and resets the header counters.
    fn clear(&self) -> TableResult<()>;

    /// Writes the header if dirty, then syncs the file.
    fn flush(&self) -> TableResult<()>;

    fn next_auto_id(&self) -> RecordId;

    fn data_version(&self) -> u32;

    fn set_data_version(&self, version: u32);

    fn source_info(&self) -> SourceInfo;
}

struct TableState<L> {
    lifecycle: Lifecycle,
    file: Option<File>,
    header: Option<FileHeader>,
    layout: L,
}

/// A table file with layout `L`.
pub struct DataTable<R: Record, L: Layout<R>> {
    table_id: u32,
    path: PathBuf,
    mode: OpenMode,
    gate: Gate,
    state: Mutex<TableState<L>>,
    _record: PhantomData<fn() -> R>,
}

fn check_position(position: usize, count: usize) {
    assert!(
        position < count,
        "position {} out of range (count {})",
        position,
        count
    );
}

impl<R: Record, L: Layout<R>> DataTable<R, L> {
    /// A disconnected table; nothing touches the disk before `connect`.
    pub fn new(table_id: u32, path: impl Into<PathBuf>, mode: OpenMode) -> Self {
        Self {
            table_id,
            path: path.into(),
            mode,
            gate: Gate::new(),
            state: Mutex::new(TableState {
                lifecycle: Lifecycle::new(),
                file: None,
                header: None,
                layout: L::empty(),
            }),
            _record: PhantomData,
        }
    }

    /// Connecting fails unless the file exists.
    pub fn open(table_id: u32, path: impl Into<PathBuf>) -> Self {
        Self::new(table_id, path, OpenMode::Open)
    }

    /// Connecting fails if the file exists.
    pub fn create(table_id: u32, path: impl Into<PathBuf>) -> Self {
        Self::new(table_id, path, OpenMode::Create)
    }

    pub fn open_or_create(table_id: u32, path: impl Into<PathBuf>) -> Self {
        Self::new(table_id, path, OpenMode::OpenOrCreate)
    }

    pub fn open_mode(&self) -> OpenMode {
        self.mode
    }

    /// Runs `op` on the open file under the table gate.
    fn with_open<T>(&self, op: impl FnOnce(&mut File, &mut FileHeader, &mut L) -> T) -> T {
        let _gate = self.gate.lock();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        assert!(
            state.lifecycle.is_connected(),
            "table {} is not connected",
            self.path.display()
        );
        match (state.file.as_mut(), state.header.as_mut()) {
            (Some(file), Some(header)) => op(file, header, &mut state.layout),
            _ => unreachable!("connected table without an open file"),
        }
    }

    fn fault(&self, context: &str, err: io::Error) -> TableError {
        match err.kind() {
            io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => {
                let path = self.path.display().to_string();
                log_event_with_fields(
                    Event::CorruptionDetected,
                    &[("path", &path), ("reason", &err.to_string())],
                );
                TableError::corrupted(&self.path, context, Some(err))
            }
            _ => TableError::io_error(format!("{}: {}", context, self.path.display()), err),
        }
    }

    fn open_file(&self, layout: &mut L) -> TableResult<(File, FileHeader)> {
        match OpenOptions::new().read(true).write(true).open(&self.path) {
            Ok(file) if self.mode != OpenMode::Create => self.load_file(file, layout),
            Ok(_) => Err(TableError::io_error(
                format!("failed to create {}", self.path.display()),
                io::Error::new(io::ErrorKind::AlreadyExists, "table file already exists"),
            )),
            Err(e) if e.kind() == io::ErrorKind::NotFound => match self.mode {
                OpenMode::Open => Err(TableError::corrupted(&self.path, "table file not found", Some(e))),
                OpenMode::Create | OpenMode::OpenOrCreate => self.create_file(layout),
            },
            Err(e) => Err(TableError::io_error(
                format!("failed to open {}", self.path.display()),
                e,
            )),
        }
    }

    fn load_file(&self, mut file: File, layout: &mut L) -> TableResult<(File, FileHeader)> {
        let path = self.path.display().to_string();
        let scope = ObservationScope::with_fields("TABLE_LOAD", &[("path", &path)]);

        let loaded = FileHeader::read_from(&mut file, &self.path, L::KIND, L::HEADER_FIELDS_LEN, |r| {
            layout.read_header_fields(r)
        })
        .and_then(|header| {
            layout
                .load(&mut file, header.data_offset())
                .map_err(|e| TableError::corrupted(&self.path, "failed to load records", Some(e)))?;
            Ok(header)
        });

        match loaded {
            Ok(header) => {
                let count = layout.count().to_string();
                scope.complete_with_fields(&[("records", &count)]);
                log_event_with_fields(Event::TableOpened, &[("path", &path), ("records", &count)]);
                Ok((file, header))
            }
            Err(err) => {
                scope.fail(err.message());
                log_event_with_fields(
                    Event::CorruptionDetected,
                    &[("path", &path), ("reason", &err.to_string())],
                );
                Err(err)
            }
        }
    }

    fn create_file(&self, layout: &mut L) -> TableResult<(File, FileHeader)> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&self.path)
            .map_err(|e| TableError::io_error(format!("failed to create {}", self.path.display()), e))?;

        let mut header = FileHeader::new(L::KIND, L::HEADER_FIELDS_LEN);
        layout.reset(header.data_offset());

        let written = header
            .write_to(&mut file, |w| layout.write_header_fields(w))
            .and_then(|_| file.sync_data());
        if let Err(e) = written {
            drop(file);
            let _ = fs::remove_file(&self.path);
            return Err(TableError::io_error(
                format!("failed to write header of {}", self.path.display()),
                e,
            ));
        }

        let path = self.path.display().to_string();
        log_event_with_fields(Event::TableCreated, &[("path", &path)]);
        Ok((file, header))
    }

    fn flush_open(file: &mut File, header: &mut FileHeader, layout: &L) -> io::Result<()> {
        if header.is_dirty() {
            header.write_to(file, |w| layout.write_header_fields(w))?;
        }
        file.sync_data()
    }
}

impl<R: Record, L: Layout<R>> RecordAccess<R> for DataTable<R, L> {
    fn count(&self) -> usize {
        self.with_open(|_, _, layout| layout.count())
    }

    fn get(&self, position: usize) -> TableResult<R> {
        self.with_open(|file, header, layout| {
            check_position(position, layout.count());
            let record = layout
                .get(file, position)
                .map_err(|e| self.fault("failed to read record", e))?;
            header.touch_read();
            Ok(record)
        })
    }

    fn get_many(&self, positions: &[usize]) -> TableResult<Vec<R>> {
        self.with_open(|file, header, layout| {
            let count = layout.count();
            for position in positions {
                check_position(*position, count);
            }
            let records = positions
                .iter()
                .map(|p| layout.get(file, *p).map_err(|e| self.fault("failed to read record", e)))
                .collect::<TableResult<Vec<R>>>()?;
            header.touch_read();
            Ok(records)
        })
    }

    fn enumerate_from(&self, first: usize) -> Records<'_, R> {
        Records::new(self, first)
    }

    fn lock(&self) -> ScopedLock<'_> {
        self.gate.lock()
    }

    fn try_lock(&self) -> Option<ScopedLock<'_>> {
        self.gate.try_lock()
    }
}

impl<R: Record, L: Layout<R>> Table<R> for DataTable<R, L> {
    fn table_id(&self) -> u32 {
        self.table_id
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> TableResult<()> {
        let _gate = self.gate.lock();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if !state.lifecycle.begin_connect() {
            return Ok(());
        }

        match self.open_file(&mut state.layout) {
            Ok((file, header)) => {
                state.file = Some(file);
                state.header = Some(header);
                state.lifecycle.finish_connect();
                Ok(())
            }
            Err(err) => {
                state.layout = L::empty();
                state.lifecycle.abort_connect();
                Err(err)
            }
        }
    }

    fn disconnect(&self) {
        let _gate = self.gate.lock();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let release = state.lifecycle.begin_disconnect();
        if release == Release::NotConnected {
            return;
        }

        let path = self.path.display().to_string();
        if let (Some(file), Some(header)) = (state.file.as_mut(), state.header.as_mut()) {
            if let Err(e) = Self::flush_open(file, header, &state.layout) {
                log_event_with_fields(
                    Event::TeardownFault,
                    &[("path", &path), ("error", &e.to_string())],
                );
            }
        }

        if release == Release::Last {
            state.file = None;
            state.header = None;
            state.layout = L::empty();
            state.lifecycle.finish_disconnect();
            log_event_with_fields(Event::TableClosed, &[("path", &path)]);
        }
    }

    fn is_connected(&self) -> bool {
        self.state.lock().lifecycle.is_connected()
    }

    fn connection_count(&self) -> usize {
        self.state.lock().lifecycle.connections()
    }

    fn insert(&self, record: &R) -> TableResult<usize> {
        self.with_open(|file, header, layout| {
            let position = layout
                .insert(file, record)
                .map_err(|e| self.fault("failed to insert record", e))?;
            header.touch_write();
            Ok(position)
        })
    }

    fn insert_many(&self, records: &[R]) -> TableResult<Vec<usize>> {
        self.with_open(|file, header, layout| {
            let mut positions = Vec::with_capacity(records.len());
            for record in records {
                let position = layout
                    .insert(file, record)
                    .map_err(|e| self.fault("failed to insert record", e))?;
                header.touch_write();
                positions.push(position);
            }
            Ok(positions)
        })
    }

    fn replace(&self, position: usize, record: &R) -> TableResult<usize> {
        self.with_open(|file, header, layout| {
            check_position(position, layout.count());
            let moved_to = layout
                .replace(file, position, record)
                .map_err(|e| self.fault("failed to replace record", e))?;
            header.touch_write();
            Ok(moved_to)
        })
    }

    fn delete(&self, position: usize) -> TableResult<()> {
        self.with_open(|file, header, layout| {
            check_position(position, layout.count());
            layout
                .delete(file, position)
                .map_err(|e| self.fault("failed to delete record", e))?;
            header.touch_write();
            Ok(())
        })
    }

    fn delete_many(&self, positions: &[usize]) -> TableResult<()> {
        let positions = descending_distinct(positions);
        self.with_open(|file, header, layout| {
            if let Some(highest) = positions.first() {
                check_position(*highest, layout.count());
            }
            for position in &positions {
                layout
                    .delete(file, *position)
                    .map_err(|e| self.fault("failed to delete record", e))?;
                header.touch_write();
            }
            Ok(())
        })
    }

    fn clear(&self) -> TableResult<()> {
        self.with_open(|file, header, layout| {
            let data_offset = header.data_offset();
            header.reset_counters();
            layout.reset(data_offset);
            header.touch_write();
            file.set_len(data_offset)
                .map_err(|e| self.fault("failed to truncate table", e))?;

            let path = self.path.display().to_string();
            log_event_with_fields(Event::TableCleared, &[("path", &path)]);
            Ok(())
        })
    }

    fn flush(&self) -> TableResult<()> {
        self.with_open(|file, header, layout| {
            Self::flush_open(file, header, layout).map_err(|e| self.fault("failed to flush table", e))?;
            let path = self.path.display().to_string();
            log_event_with_fields(Event::TableFlushed, &[("path", &path)]);
            Ok(())
        })
    }

    fn next_auto_id(&self) -> RecordId {
        self.with_open(|_, header, _| header.next_auto_id())
    }

    fn data_version(&self) -> u32 {
        self.with_open(|_, header, _| header.data_version())
    }

    fn set_data_version(&self, version: u32) {
        self.with_open(|_, header, _| header.set_data_version(version))
    }

    fn source_info(&self) -> SourceInfo {
        self.with_open(|_, header, _| header.source_info())
    }
}

impl<R: Record, L: Layout<R>> Drop for DataTable<R, L> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let (Some(file), Some(header)) = (state.file.as_mut(), state.header.as_mut()) {
            if let Err(e) = Self::flush_open(file, header, &state.layout) {
                let path = self.path.display().to_string();
                log_event_with_fields(
                    Event::TeardownFault,
                    &[("path", &path), ("error", &e.to_string())],
                );
            }
        }
    }
}
