//! Record provider over a table
//!
//! Wraps every table mutation in the two-phase notification protocol:
//!
//! ```text
//! lock -> pre-event -> table mutation -> auto-flush -> post-event -> unlock
//! ```
//!
//! If a pre-handler fails or the table mutation fails, dependents are sent
//! `Invalidated` (they may hold state captured in the pre phase) and the
//! error is returned.

use std::sync::Arc;

use parking_lot::Mutex;

use super::events::{Observers, SourceEvent, SourceHandler, SubscriptionId};
use super::source::{RecordAccess, RecordSource, Records};
use crate::error::{TableError, TableResult};
use crate::lifecycle::{Lifecycle, Release};
use crate::observability::{log_event_with_fields, Event, Logger};
use crate::position::descending_distinct;
use crate::record::{Record, RecordId};
use crate::storage::{SourceInfo, Table};
use crate::sync::{Gate, ScopedLock};

struct ProviderState {
    lifecycle: Lifecycle,
    auto_flush: bool,
}

/// Observable record source backed by a [`Table`].
pub struct TableProvider<R: Record> {
    table: Arc<dyn Table<R>>,
    gate: Gate,
    state: Mutex<ProviderState>,
    observers: Observers<SourceHandler<R>>,
}

impl<R: Record> TableProvider<R> {
    pub fn new(table: Arc<dyn Table<R>>) -> Self {
        Self {
            table,
            gate: Gate::new(),
            state: Mutex::new(ProviderState {
                lifecycle: Lifecycle::new(),
                auto_flush: false,
            }),
            observers: Observers::new(),
        }
    }

    pub fn table(&self) -> &Arc<dyn Table<R>> {
        &self.table
    }

    /// Flushes the underlying table.
    pub fn flush(&self) -> TableResult<()> {
        let _lock = self.lock();
        self.assert_connected();
        self.table.flush()
    }

    fn assert_connected(&self) {
        let state = self.state.lock();
        assert!(
            state.lifecycle.is_connected(),
            "provider of {} is not connected ({})",
            self.table.path().display(),
            state.lifecycle.state()
        );
    }

    fn check_position(&self, position: usize) {
        let count = self.table.count();
        assert!(
            position < count,
            "position {} out of range (count {})",
            position,
            count
        );
    }

    /// Tells dependents to resync after an interrupted mutation.
    fn abort(&self, err: TableError) -> TableError {
        if let Err(resync) = self.observers.emit(&SourceEvent::Invalidated) {
            Logger::error(
                "RESYNC_FAILED",
                &[("error", &resync.to_string()), ("cause", &err.to_string())],
            );
        }
        err
    }

    fn flush_if_auto(&self) -> TableResult<()> {
        if self.state.lock().auto_flush {
            self.table.flush()
        } else {
            Ok(())
        }
    }

    /// Post phase: subscribers always hear about an applied mutation, even
    /// when the auto-flush failed.
    fn finish(&self, event: &SourceEvent<'_, R>) -> TableResult<()> {
        let flushed = self.flush_if_auto();
        let notified = self.observers.emit(event);
        flushed.and(notified)
    }
}

impl<R: Record> RecordAccess<R> for TableProvider<R> {
    fn count(&self) -> usize {
        self.assert_connected();
        self.table.count()
    }

    fn get(&self, position: usize) -> TableResult<R> {
        self.assert_connected();
        self.table.get(position)
    }

    fn get_many(&self, positions: &[usize]) -> TableResult<Vec<R>> {
        self.assert_connected();
        self.table.get_many(positions)
    }

    fn enumerate_from(&self, first: usize) -> Records<'_, R> {
        Records::new(self, first)
    }

    fn lock(&self) -> ScopedLock<'_> {
        self.gate.lock().then(self.table.lock())
    }

    fn try_lock(&self) -> Option<ScopedLock<'_>> {
        let outer = self.gate.try_lock()?;
        let inner = self.table.try_lock()?;
        Some(outer.then(inner))
    }
}

impl<R: Record> RecordSource<R> for TableProvider<R> {
    fn connect(&self) -> TableResult<()> {
        let _lock = self.lock();
        if !self.state.lock().lifecycle.begin_connect() {
            return Ok(());
        }

        let connected = self.table.connect();
        let mut state = self.state.lock();
        match connected {
            Ok(()) => {
                state.lifecycle.finish_connect();
                drop(state);
                let path = self.table.path().display().to_string();
                log_event_with_fields(Event::SourceConnected, &[("path", &path)]);
                Ok(())
            }
            Err(err) => {
                state.lifecycle.abort_connect();
                Err(err)
            }
        }
    }

    fn disconnect(&self) {
        let _lock = self.lock();
        if self.state.lock().lifecycle.begin_disconnect() != Release::Last {
            return;
        }

        self.table.disconnect();
        self.state.lock().lifecycle.finish_disconnect();

        let path = self.table.path().display().to_string();
        log_event_with_fields(Event::SourceDisconnected, &[("path", &path)]);
    }

    fn is_connected(&self) -> bool {
        self.state.lock().lifecycle.is_connected()
    }

    fn connection_count(&self) -> usize {
        self.state.lock().lifecycle.connections()
    }

    fn insert(&self, record: &R) -> TableResult<usize> {
        let _lock = self.lock();
        self.assert_connected();

        let position = self.table.insert(record).map_err(|e| self.abort(e))?;
        self.finish(&SourceEvent::Inserted { position, record })?;
        Ok(position)
    }

    fn insert_many(&self, records: &[R]) -> TableResult<Vec<usize>> {
        let _lock = self.lock();
        self.assert_connected();
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let positions = self.table.insert_many(records).map_err(|e| self.abort(e))?;
        self.finish(&SourceEvent::InsertedMany {
            positions: &positions,
            records,
        })?;
        Ok(positions)
    }

    fn replace(&self, position: usize, record: &R) -> TableResult<usize> {
        let _lock = self.lock();
        self.assert_connected();
        self.check_position(position);

        self.observers
            .emit(&SourceEvent::Replacing { position, record })
            .map_err(|e| self.abort(e))?;
        let moved_to = self
            .table
            .replace(position, record)
            .map_err(|e| self.abort(e))?;
        self.finish(&SourceEvent::Replaced {
            previous: position,
            position: moved_to,
            record,
        })?;
        Ok(moved_to)
    }

    fn delete(&self, position: usize) -> TableResult<()> {
        let _lock = self.lock();
        self.assert_connected();
        self.check_position(position);

        self.observers
            .emit(&SourceEvent::Deleting { position })
            .map_err(|e| self.abort(e))?;
        self.table.delete(position).map_err(|e| self.abort(e))?;
        self.finish(&SourceEvent::Deleted { position })
    }

    fn delete_many(&self, positions: &[usize]) -> TableResult<()> {
        let _lock = self.lock();
        self.assert_connected();

        let positions = descending_distinct(positions);
        let Some(highest) = positions.first() else {
            return Ok(());
        };
        self.check_position(*highest);

        self.observers
            .emit(&SourceEvent::DeletingMany {
                positions: &positions,
            })
            .map_err(|e| self.abort(e))?;
        self.table
            .delete_many(&positions)
            .map_err(|e| self.abort(e))?;
        self.finish(&SourceEvent::DeletedMany {
            positions: &positions,
        })
    }

    fn clear(&self) -> TableResult<()> {
        let _lock = self.lock();
        self.assert_connected();

        self.table.clear().map_err(|e| self.abort(e))?;
        self.finish(&SourceEvent::Invalidated)
    }

    fn next_auto_id(&self) -> RecordId {
        self.assert_connected();
        self.table.next_auto_id()
    }

    fn data_version(&self) -> u32 {
        self.assert_connected();
        self.table.data_version()
    }

    fn set_data_version(&self, version: u32) {
        self.assert_connected();
        self.table.set_data_version(version)
    }

    fn source_info(&self) -> SourceInfo {
        self.assert_connected();
        self.table.source_info()
    }

    fn auto_flush(&self) -> bool {
        self.state.lock().auto_flush
    }

    fn set_auto_flush(&self, enabled: bool) {
        self.state.lock().auto_flush = enabled;
    }

    fn subscribe(&self, handler: Arc<SourceHandler<R>>) -> SubscriptionId {
        self.observers.subscribe(handler)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::source_handler;
    use crate::record::testing::{Item, Note};
    use crate::storage::{SlottedTable, TombstonedTable};
    use tempfile::TempDir;

    fn slotted(temp: &TempDir) -> TableProvider<Item> {
        let table = SlottedTable::<Item>::open_or_create(1, temp.path().join("t.frt"));
        let provider = TableProvider::new(Arc::new(table));
        provider.connect().unwrap();
        provider
    }

    /// Records event names, and the source count seen by each handler call.
    fn recorder(provider: &TableProvider<Item>) -> Arc<Mutex<Vec<String>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        provider.subscribe(source_handler(move |event: &SourceEvent<'_, Item>| {
            let line = match event {
                SourceEvent::Deleting { position } | SourceEvent::Deleted { position } => {
                    format!("{}:{}", event.name(), position)
                }
                SourceEvent::DeletingMany { positions } | SourceEvent::DeletedMany { positions } => {
                    format!("{}:{:?}", event.name(), positions)
                }
                SourceEvent::Inserted { position, record } => {
                    format!("{}:{}:{}", event.name(), position, record.id)
                }
                SourceEvent::InsertedMany { positions, .. } => format!("{}:{:?}", event.name(), positions),
                SourceEvent::Replacing { position, .. } => format!("{}:{}", event.name(), position),
                SourceEvent::Replaced { previous, position, .. } => {
                    format!("{}:{}->{}", event.name(), previous, position)
                }
                SourceEvent::Invalidated => event.name().to_string(),
            };
            sink.lock().push(line);
            Ok(())
        }));
        log
    }

    #[test]
    fn test_two_phase_order() {
        let temp = TempDir::new().unwrap();
        let provider = slotted(&temp);
        let log = recorder(&provider);

        provider.insert(&Item::new(1, 0, "a")).unwrap();
        provider.insert(&Item::new(2, 0, "b")).unwrap();
        provider.replace(0, &Item::new(1, 5, "a")).unwrap();
        provider.delete(1).unwrap();

        assert_eq!(
            *log.lock(),
            vec![
                "inserted:0:1",
                "inserted:1:2",
                "replacing:0",
                "replaced:0->0",
                "deleting:1",
                "deleted:1",
            ]
        );
    }

    #[test]
    fn test_pre_handler_sees_old_state() {
        let temp = TempDir::new().unwrap();
        let provider = Arc::new(slotted(&temp));
        provider.insert(&Item::new(7, 70, "old")).unwrap();

        let seen = Arc::new(Mutex::new(None));
        let (sink, weak) = (Arc::clone(&seen), Arc::downgrade(&provider));
        provider.subscribe(source_handler(move |event: &SourceEvent<'_, Item>| {
            if let SourceEvent::Replacing { position, .. } = event {
                let provider = weak.upgrade().unwrap();
                *sink.lock() = Some(provider.get(*position)?);
            }
            Ok(())
        }));

        provider.replace(0, &Item::new(7, 71, "new")).unwrap();
        assert_eq!(seen.lock().clone().unwrap().value, 70);
        assert_eq!(provider.get(0).unwrap().value, 71);
    }

    #[test]
    fn test_delete_many_normalized() {
        let temp = TempDir::new().unwrap();
        let provider = slotted(&temp);
        for id in 1..=4 {
            provider.insert(&Item::new(id, 0, "")).unwrap();
        }
        let log = recorder(&provider);

        provider.delete_many(&[0, 2, 0]).unwrap();
        assert_eq!(*log.lock(), vec!["deleting_many:[2, 0]", "deleted_many:[2, 0]"]);

        let ids: Vec<u32> = provider.enumerate().map(|r| r.unwrap().id).collect();
        assert_eq!(ids, vec![2, 4]);
    }

    #[test]
    fn test_failing_pre_handler_aborts_mutation() {
        let temp = TempDir::new().unwrap();
        let provider = slotted(&temp);
        provider.insert(&Item::new(1, 0, "")).unwrap();

        provider.subscribe(source_handler(|event: &SourceEvent<'_, Item>| match event {
            SourceEvent::Deleting { .. } => Err(TableError::config("vetoed")),
            _ => Ok(()),
        }));
        let log = recorder(&provider);

        assert!(provider.delete(0).is_err());
        assert_eq!(provider.count(), 1);
        assert_eq!(*log.lock(), vec!["deleting:0", "invalidated"]);
    }

    #[test]
    fn test_clear_invalidates() {
        let temp = TempDir::new().unwrap();
        let provider = slotted(&temp);
        provider.insert(&Item::new(1, 0, "")).unwrap();
        let log = recorder(&provider);

        provider.clear().unwrap();
        assert_eq!(provider.count(), 0);
        assert_eq!(*log.lock(), vec!["invalidated"]);
    }

    #[test]
    fn test_tombstoned_replace_reports_move() {
        let temp = TempDir::new().unwrap();
        let table = TombstonedTable::<Note>::open_or_create(1, temp.path().join("t.fzt"));
        let provider = TableProvider::new(Arc::new(table));
        provider.connect().unwrap();
        provider.insert(&Note::new(1, "a")).unwrap();
        provider.insert(&Note::new(2, "b")).unwrap();

        let moves = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&moves);
        provider.subscribe(source_handler(move |event: &SourceEvent<'_, Note>| {
            if let SourceEvent::Replaced { previous, position, .. } = event {
                sink.lock().push((*previous, *position));
            }
            Ok(())
        }));

        assert_eq!(provider.replace(0, &Note::new(1, "A")).unwrap(), 1);
        assert_eq!(*moves.lock(), vec![(0, 1)]);
    }

    #[test]
    fn test_auto_flush_writes_header() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("t.frt");
        let provider = slotted(&temp);
        provider.set_auto_flush(true);
        provider.insert(&Item::new(1, 0, "")).unwrap();

        let report = crate::storage::inspect(&path).unwrap();
        assert_eq!(report.slots_count, Some(1));
    }

    #[test]
    fn test_ref_counted_connect() {
        let temp = TempDir::new().unwrap();
        let provider = slotted(&temp);
        provider.connect().unwrap();
        assert_eq!(provider.connection_count(), 2);
        assert_eq!(provider.table().connection_count(), 1);

        provider.disconnect();
        assert!(provider.can_read());
        provider.disconnect();
        assert!(!provider.can_write());
        assert!(!provider.table().is_connected());
    }

    #[test]
    fn test_try_lock_from_other_thread() {
        let temp = TempDir::new().unwrap();
        let provider = Arc::new(slotted(&temp));
        let _held = provider.lock();

        let other = Arc::clone(&provider);
        let acquired = std::thread::spawn(move || other.try_lock().is_some())
            .join()
            .unwrap();
        assert!(!acquired);
    }
}
