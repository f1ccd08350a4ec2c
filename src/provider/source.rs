//! Positional record access and the record-source contract

use std::sync::Arc;

use super::events::{SourceHandler, SubscriptionId};
use crate::error::TableResult;
use crate::record::{Record, RecordId};
use crate::storage::SourceInfo;
use crate::sync::ScopedLock;

/// Read access by dense logical position, shared by tables and sources.
pub trait RecordAccess<R: Record>: Send + Sync {
    /// Number of records.
    fn count(&self) -> usize;

    /// Decodes the record at `position`.
    ///
    /// # Panics
    ///
    /// Panics if `position >= count()` or the structure is not connected.
    fn get(&self, position: usize) -> TableResult<R>;

    /// Records at `positions`, in the order requested.
    fn get_many(&self, positions: &[usize]) -> TableResult<Vec<R>>;

    /// Iterates from `first` to the end, re-locking for every item.
    fn enumerate_from(&self, first: usize) -> Records<'_, R>;

    fn enumerate(&self) -> Records<'_, R> {
        self.enumerate_from(0)
    }

    /// Exclusive scoped lock, blocking.
    fn lock(&self) -> ScopedLock<'_>;

    /// Exclusive scoped lock, `None` if another thread holds it.
    fn try_lock(&self) -> Option<ScopedLock<'_>>;
}

/// A connectable, observable, writable record source.
///
/// Implemented by [`TableProvider`](super::TableProvider) over a table and
/// by [`FilteredSource`](crate::index::FilteredSource) over another source.
/// Every structural mutation is announced to subscribers through the
/// two-phase protocol of [`SourceEvent`](super::SourceEvent).
pub trait RecordSource<R: Record>: RecordAccess<R> {
    /// Increments the connection count; the first connect opens.
    fn connect(&self) -> TableResult<()>;

    /// Decrements the connection count; the last disconnect closes.
    /// Never fails: teardown faults are logged.
    fn disconnect(&self);

    fn is_connected(&self) -> bool;

    fn connection_count(&self) -> usize;

    fn can_read(&self) -> bool {
        self.is_connected()
    }

    fn can_write(&self) -> bool {
        self.is_connected()
    }

    /// Returns the position the record landed at.
    fn insert(&self, record: &R) -> TableResult<usize>;

    /// Returns each record's position at the moment it was inserted.
    fn insert_many(&self, records: &[R]) -> TableResult<Vec<usize>>;

    /// Returns the record's position after the replace.
    fn replace(&self, position: usize, record: &R) -> TableResult<usize>;

    fn delete(&self, position: usize) -> TableResult<()>;

    /// Deletes the distinct positions, highest first.
    fn delete_many(&self, positions: &[usize]) -> TableResult<()>;

    fn clear(&self) -> TableResult<()>;

    fn next_auto_id(&self) -> RecordId;

    fn data_version(&self) -> u32;

    fn set_data_version(&self, version: u32);

    fn source_info(&self) -> SourceInfo;

    fn auto_flush(&self) -> bool;

    fn set_auto_flush(&self, enabled: bool);

    fn subscribe(&self, handler: Arc<SourceHandler<R>>) -> SubscriptionId;

    fn unsubscribe(&self, id: SubscriptionId) -> bool;
}

/// Iterator over a source, stopping at the current count.
///
/// Each step takes the source lock, so concurrent mutations between steps
/// are visible (positions may shift under the iterator).
pub struct Records<'a, R: Record> {
    source: &'a dyn RecordAccess<R>,
    next: usize,
}

impl<'a, R: Record> Records<'a, R> {
    pub fn new<S: RecordAccess<R>>(source: &'a S, first: usize) -> Self {
        Self {
            source,
            next: first,
        }
    }

    /// Position of the next record.
    pub fn position(&self) -> usize {
        self.next
    }
}

impl<R: Record> Iterator for Records<'_, R> {
    type Item = TableResult<R>;

    fn next(&mut self) -> Option<Self::Item> {
        let _lock = self.source.lock();
        if self.next >= self.source.count() {
            return None;
        }
        let record = self.source.get(self.next);
        self.next += 1;
        Some(record)
    }
}
