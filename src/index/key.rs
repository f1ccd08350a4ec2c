//! Primary-key index: record id -> position

use std::collections::HashMap;
use std::sync::Arc;

use super::events::IndexHandler;
use super::maintained::{IndexMap, Maintained};
use crate::error::{TableError, TableResult};
use crate::provider::{RecordSource, SubscriptionId};
use crate::record::{Record, RecordId};
use crate::sync::ScopedLock;

#[derive(Debug, Default)]
pub(crate) struct KeyMap {
    positions: HashMap<RecordId, usize>,
}

impl KeyMap {
    fn shift(&mut self, from: usize, up: bool) {
        for position in self.positions.values_mut() {
            if up && *position >= from {
                *position += 1;
            } else if !up && *position > from {
                *position -= 1;
            }
        }
    }
}

impl<R: Record> IndexMap<R> for KeyMap {
    fn emptied(&self) -> Self {
        Self::default()
    }

    fn load(&mut self, position: usize, record: &R) -> TableResult<()> {
        match self.positions.insert(record.id(), position) {
            Some(first) => Err(TableError::duplicate_key(record.id(), first, position)),
            None => Ok(()),
        }
    }

    fn insert(&mut self, position: usize, record: &R) {
        self.shift(position, true);
        let previous = self.positions.insert(record.id(), position);
        assert!(previous.is_none(), "record id {} is already indexed", record.id());
    }

    fn remove(&mut self, position: usize, record: &R) {
        let removed = self.positions.remove(&record.id());
        assert_eq!(
            removed,
            Some(position),
            "record id {} is not indexed at position {}",
            record.id(),
            position
        );
        self.shift(position, false);
    }

    fn replace(&mut self, position: usize, old: &R, new: &R) {
        if old.id() != new.id() {
            self.positions.remove(&old.id());
            let previous = self.positions.insert(new.id(), position);
            assert!(previous.is_none(), "record id {} is already indexed", new.id());
        }
    }
}

/// Maps every record id of a source to its current position.
///
/// Built by a full scan on connect, then kept in step with the source's
/// change notifications. Dropping the index releases its connection.
pub struct KeyIndex<R: Record> {
    inner: Arc<Maintained<R, KeyMap>>,
}

impl<R: Record> KeyIndex<R> {
    pub fn new(source: Arc<dyn RecordSource<R>>) -> Self {
        Self {
            inner: Maintained::new("key index", source, KeyMap::default()),
        }
    }

    pub fn source(&self) -> &Arc<dyn RecordSource<R>> {
        self.inner.source()
    }

    /// Connects the source and scans it on the first call.
    ///
    /// Fails with `TABLEDB_DUPLICATE_KEY` if two records share an id.
    pub fn connect(&self) -> TableResult<()> {
        self.inner.connect()
    }

    pub fn disconnect(&self) {
        self.inner.disconnect()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.connection_count()
    }

    /// Whether the last rescan failed.
    pub fn is_stale(&self) -> bool {
        self.inner.is_stale()
    }

    /// Rescans the source, clearing a stale state on success.
    pub fn reload(&self) -> TableResult<()> {
        self.inner.reload()
    }

    /// Position of the record with `id`.
    pub fn index_of(&self, id: RecordId) -> Option<usize> {
        self.inner.with_map(|map| map.positions.get(&id).copied())
    }

    pub fn contains(&self, id: RecordId) -> bool {
        self.index_of(id).is_some()
    }

    /// The record with `id`, read from the source.
    pub fn get(&self, id: RecordId) -> TableResult<Option<R>> {
        let _lock = self.inner.source().lock();
        match self.index_of(id) {
            Some(position) => self.inner.source().get(position).map(Some),
            None => Ok(None),
        }
    }

    /// Indexed ids, ascending.
    pub fn ids(&self) -> Vec<RecordId> {
        let mut ids: Vec<RecordId> = self.inner.with_map(|map| map.positions.keys().copied().collect());
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.inner.with_map(|map| map.positions.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn lock(&self) -> ScopedLock<'_> {
        self.inner.lock()
    }

    pub fn try_lock(&self) -> Option<ScopedLock<'_>> {
        self.inner.try_lock()
    }

    pub fn subscribe(&self, handler: Arc<IndexHandler<R>>) -> SubscriptionId {
        self.inner.observers().subscribe(handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.observers().unsubscribe(id)
    }
}
