//! Filtered view over another record source
//!
//! A [`FilteredSource`] exposes the records of its source that pass a
//! predicate, renumbered densely:
//!
//! ```text
//! source positions   0  1  2  3  4  5
//! passes filter      y  n  y  y  n  y
//! view positions     0     1  2     3
//! ```
//!
//! The [`AggregationMode`] picks what is stored: the passing source positions
//! (`Accepted`) or the failing ones (`Rejected`). Store whichever set is
//! expected to stay smaller; the view is the same either way.
//!
//! Source notifications are translated to view positions and forwarded only
//! when they touch the view. A replace that flips the predicate surfaces as a
//! delete or an insert one level up.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::TableResult;
use crate::lifecycle::{Lifecycle, Release};
use crate::observability::{log_event_with_fields, Event, ObservationScope};
use crate::position::{PositionSet, SetMode};
use crate::provider::{
    source_handler, Observers, RecordAccess, RecordSource, Records, SourceEvent, SourceHandler,
    SubscriptionId,
};
use crate::record::{Record, RecordId};
use crate::storage::SourceInfo;
use crate::sync::{Gate, ScopedLock};

/// Which source positions a [`FilteredSource`] keeps track of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMode {
    /// Store the positions passing the filter.
    #[default]
    Accepted,
    /// Store the positions failing the filter.
    Rejected,
}

impl AggregationMode {
    fn set_mode(self) -> SetMode {
        match self {
            AggregationMode::Accepted => SetMode::Included,
            AggregationMode::Rejected => SetMode::Excluded,
        }
    }

    /// Whether a record with this filter outcome has its position stored.
    fn stores(self, passes: bool) -> bool {
        match self {
            AggregationMode::Accepted => passes,
            AggregationMode::Rejected => !passes,
        }
    }
}

type Predicate<R> = dyn Fn(&R) -> bool + Send + Sync;

struct Selection {
    positions: PositionSet,
    source_len: usize,
}

impl Selection {
    fn new(mode: AggregationMode) -> Self {
        Self {
            positions: PositionSet::new(mode.set_mode()),
            source_len: 0,
        }
    }

    fn len(&self) -> usize {
        self.positions.view_len(self.source_len)
    }

    fn view_of(&self, src: usize) -> Option<usize> {
        self.positions
            .is_selected(src)
            .then(|| self.positions.to_view(src))
    }

    fn source_inserted(&mut self, src: usize, stored: bool) {
        self.positions.shift_up_from(src);
        if stored {
            self.positions.insert(src);
        }
        self.source_len += 1;
    }

    fn source_deleted(&mut self, src: usize) {
        self.positions.remove_and_shift_down(src);
        self.source_len -= 1;
    }

    fn source_replaced(&mut self, src: usize, stored: bool) {
        if stored {
            self.positions.insert(src);
        } else {
            self.positions.remove(src);
        }
    }
}

struct FilterState {
    lifecycle: Lifecycle,
    selection: Selection,
    stale: bool,
    subscription: Option<SubscriptionId>,
    /// View positions reported by the last insert notification.
    landed: Vec<usize>,
}

/// Record source restricted to the records passing a predicate.
///
/// Writes go through to the underlying source, translated from view
/// positions; written records must pass the predicate.
pub struct FilteredSource<R: Record> {
    source: Arc<dyn RecordSource<R>>,
    filter: Arc<Predicate<R>>,
    mode: AggregationMode,
    gate: Gate,
    state: Mutex<FilterState>,
    observers: Observers<SourceHandler<R>>,
    this: Weak<Self>,
}

impl<R: Record> FilteredSource<R> {
    pub fn new<F>(source: Arc<dyn RecordSource<R>>, filter: F, mode: AggregationMode) -> Arc<Self>
    where
        F: Fn(&R) -> bool + Send + Sync + 'static,
    {
        Arc::new_cyclic(|this| Self {
            source,
            filter: Arc::new(filter),
            mode,
            gate: Gate::new(),
            state: Mutex::new(FilterState {
                lifecycle: Lifecycle::new(),
                selection: Selection::new(mode),
                stale: false,
                subscription: None,
                landed: Vec::new(),
            }),
            observers: Observers::new(),
            this: this.clone(),
        })
    }

    pub fn source(&self) -> &Arc<dyn RecordSource<R>> {
        &self.source
    }

    pub fn aggregation_mode(&self) -> AggregationMode {
        self.mode
    }

    /// Whether `record` belongs in the view.
    pub fn accepts(&self, record: &R) -> bool {
        (self.filter)(record)
    }

    /// Whether the source record at `src` is part of the view.
    pub fn is_selected(&self, src: usize) -> bool {
        self.with_selection(|selection| selection.positions.is_selected(src))
    }

    /// View position of the selected source position `src`.
    pub fn to_view(&self, src: usize) -> usize {
        self.with_selection(|selection| selection.positions.to_view(src))
    }

    /// Source position of the view position `view`.
    pub fn to_source(&self, view: usize) -> usize {
        self.with_selection(|selection| {
            let len = selection.len();
            assert!(view < len, "view position {} out of range (count {})", view, len);
            selection.positions.to_source(view)
        })
    }

    pub fn is_stale(&self) -> bool {
        self.state.lock().stale
    }

    /// Rescans the source and tells subscribers to resync.
    pub fn reload(&self) -> TableResult<()> {
        let _lock = self.lock();
        self.state.lock().lifecycle.assert_connected("filtered source");
        self.rebuild()?;
        self.observers.emit(&SourceEvent::Invalidated)
    }

    fn with_selection<T>(&self, read: impl FnOnce(&Selection) -> T) -> T {
        let state = self.state.lock();
        state.lifecycle.assert_connected("filtered source");
        assert!(!state.stale, "filtered source is stale and must be reloaded");
        read(&state.selection)
    }

    fn assert_ready(&self) {
        self.with_selection(|_| ());
    }

    fn assert_accepted(&self, record: &R) {
        assert!(
            self.accepts(record),
            "record {} does not pass the filter of this view",
            record.id()
        );
    }

    fn take_landed(&self) -> Vec<usize> {
        std::mem::take(&mut self.state.lock().landed)
    }

    fn scan(&self) -> TableResult<Selection> {
        let scope = ObservationScope::with_fields("VIEW_BUILD", &[("mode", self.mode_name())]);
        let count = self.source.count();

        let built = (0..count).try_fold(Vec::new(), |mut stored, src| -> TableResult<Vec<usize>> {
            let record = self.source.get(src)?;
            if self.mode.stores(self.accepts(&record)) {
                stored.push(src);
            }
            Ok(stored)
        });

        match built {
            Ok(stored) => {
                let selection = Selection {
                    positions: PositionSet::from_unsorted(self.mode.set_mode(), stored),
                    source_len: count,
                };
                let records = selection.len().to_string();
                scope.complete_with_fields(&[("records", &records)]);
                log_event_with_fields(
                    Event::IndexBuilt,
                    &[("index", "filtered source"), ("records", &records)],
                );
                Ok(selection)
            }
            Err(err) => {
                scope.fail(&err.to_string());
                Err(err)
            }
        }
    }

    fn rebuild(&self) -> TableResult<()> {
        match self.scan() {
            Ok(selection) => {
                let mut state = self.state.lock();
                state.selection = selection;
                state.stale = false;
                Ok(())
            }
            Err(err) => {
                let mut state = self.state.lock();
                state.selection = Selection::new(self.mode);
                state.stale = true;
                Err(err)
            }
        }
    }

    fn mode_name(&self) -> &'static str {
        match self.mode {
            AggregationMode::Accepted => "accepted",
            AggregationMode::Rejected => "rejected",
        }
    }

    fn on_source_event(&self, event: &SourceEvent<'_, R>) -> TableResult<()> {
        if self.state.lock().stale && !matches!(event, SourceEvent::Invalidated) {
            return Ok(());
        }

        match event {
            SourceEvent::Deleting { position } => {
                let view = self.state.lock().selection.view_of(*position);
                match view {
                    Some(view) => self.observers.emit(&SourceEvent::Deleting { position: view }),
                    None => Ok(()),
                }
            }
            SourceEvent::Deleted { position } => {
                let view = {
                    let mut state = self.state.lock();
                    let view = state.selection.view_of(*position);
                    state.selection.source_deleted(*position);
                    view
                };
                match view {
                    Some(view) => self.observers.emit(&SourceEvent::Deleted { position: view }),
                    None => Ok(()),
                }
            }
            SourceEvent::DeletingMany { positions } => {
                let views = self.views_of(positions);
                if views.is_empty() {
                    return Ok(());
                }
                self.observers
                    .emit(&SourceEvent::DeletingMany { positions: &views })
            }
            SourceEvent::DeletedMany { positions } => {
                let views = {
                    let mut state = self.state.lock();
                    let views: Vec<usize> = positions
                        .iter()
                        .filter_map(|src| state.selection.view_of(*src))
                        .collect();
                    for src in positions.iter() {
                        state.selection.source_deleted(*src);
                    }
                    views
                };
                if views.is_empty() {
                    return Ok(());
                }
                self.observers
                    .emit(&SourceEvent::DeletedMany { positions: &views })
            }
            SourceEvent::Inserted { position, record } => {
                let passes = self.accepts(record);
                let view = {
                    let mut state = self.state.lock();
                    state.selection.source_inserted(*position, self.mode.stores(passes));
                    let view = state.selection.view_of(*position);
                    state.landed = view.into_iter().collect();
                    view
                };
                match view {
                    Some(view) => self.observers.emit(&SourceEvent::Inserted {
                        position: view,
                        record,
                    }),
                    None => Ok(()),
                }
            }
            SourceEvent::InsertedMany { positions, records } => {
                let mut kept = Vec::new();
                let views = {
                    let mut state = self.state.lock();
                    let mut views = Vec::new();
                    for (src, record) in positions.iter().zip(records.iter()) {
                        let passes = self.accepts(record);
                        state.selection.source_inserted(*src, self.mode.stores(passes));
                        if passes {
                            views.push(state.selection.positions.to_view(*src));
                            kept.push(record.clone());
                        }
                    }
                    state.landed = views.clone();
                    views
                };
                if views.is_empty() {
                    return Ok(());
                }
                self.observers.emit(&SourceEvent::InsertedMany {
                    positions: &views,
                    records: &kept,
                })
            }
            SourceEvent::Replacing { position, record } => {
                let view = self.state.lock().selection.view_of(*position);
                match view {
                    Some(view) if self.accepts(record) => self.observers.emit(&SourceEvent::Replacing {
                        position: view,
                        record,
                    }),
                    Some(view) => self.observers.emit(&SourceEvent::Deleting { position: view }),
                    None => Ok(()),
                }
            }
            SourceEvent::Replaced {
                previous,
                position,
                record,
            } => self.on_source_replaced(*previous, *position, record),
            SourceEvent::Invalidated => {
                self.rebuild()?;
                log_event_with_fields(Event::IndexInvalidated, &[("index", "filtered source")]);
                self.observers.emit(&SourceEvent::Invalidated)
            }
        }
    }

    fn on_source_replaced(&self, previous: usize, position: usize, record: &R) -> TableResult<()> {
        let passes = self.accepts(record);
        let stored = self.mode.stores(passes);

        let (before, after) = {
            let mut state = self.state.lock();
            let before = state.selection.view_of(previous);
            if previous == position {
                state.selection.source_replaced(position, stored);
            } else {
                state.selection.source_deleted(previous);
                state.selection.source_inserted(position, stored);
            }
            let after = state.selection.view_of(position);
            state.landed = after.into_iter().collect();
            (before, after)
        };

        match (before, after) {
            (Some(previous), Some(position)) => self.observers.emit(&SourceEvent::Replaced {
                previous,
                position,
                record,
            }),
            (Some(previous), None) => self.observers.emit(&SourceEvent::Deleted { position: previous }),
            (None, Some(position)) => self.observers.emit(&SourceEvent::Inserted { position, record }),
            (None, None) => Ok(()),
        }
    }

    fn views_of(&self, positions: &[usize]) -> Vec<usize> {
        let state = self.state.lock();
        positions
            .iter()
            .filter_map(|src| state.selection.view_of(*src))
            .collect()
    }
}

impl<R: Record> RecordAccess<R> for FilteredSource<R> {
    fn count(&self) -> usize {
        self.with_selection(Selection::len)
    }

    // Only the source lock: handlers read the view while the source is
    // mid-mutation, and taking our gate there would invert the lock order.
    fn get(&self, position: usize) -> TableResult<R> {
        let _lock = self.source.lock();
        let src = self.to_source(position);
        self.source.get(src)
    }

    fn get_many(&self, positions: &[usize]) -> TableResult<Vec<R>> {
        let _lock = self.source.lock();
        let sources: Vec<usize> = positions.iter().map(|view| self.to_source(*view)).collect();
        self.source.get_many(&sources)
    }

    fn enumerate_from(&self, first: usize) -> Records<'_, R> {
        Records::new(self, first)
    }

    fn lock(&self) -> ScopedLock<'_> {
        self.gate.lock().then(self.source.lock())
    }

    fn try_lock(&self) -> Option<ScopedLock<'_>> {
        let outer = self.gate.try_lock()?;
        let inner = self.source.try_lock()?;
        Some(outer.then(inner))
    }
}

impl<R: Record> RecordSource<R> for FilteredSource<R> {
    fn connect(&self) -> TableResult<()> {
        let _lock = self.lock();
        if !self.state.lock().lifecycle.begin_connect() {
            return Ok(());
        }

        let attached = self.source.connect().and_then(|()| {
            self.rebuild().map_err(|err| {
                self.source.disconnect();
                err
            })
        });
        if let Err(err) = attached {
            self.state.lock().lifecycle.abort_connect();
            return Err(err);
        }

        let this = self.this.clone();
        let id = self.source.subscribe(source_handler(move |event: &SourceEvent<'_, R>| {
            match this.upgrade() {
                Some(view) => view.on_source_event(event),
                None => Ok(()),
            }
        }));

        let mut state = self.state.lock();
        state.subscription = Some(id);
        state.lifecycle.finish_connect();
        drop(state);

        log_event_with_fields(Event::SourceConnected, &[("index", "filtered source")]);
        Ok(())
    }

    fn disconnect(&self) {
        let _lock = self.lock();
        if self.state.lock().lifecycle.begin_disconnect() != Release::Last {
            return;
        }

        let subscription = {
            let mut state = self.state.lock();
            state.selection = Selection::new(self.mode);
            state.subscription.take()
        };
        if let Some(id) = subscription {
            self.source.unsubscribe(id);
        }
        self.source.disconnect();
        self.state.lock().lifecycle.finish_disconnect();

        log_event_with_fields(Event::SourceDisconnected, &[("index", "filtered source")]);
    }

    fn is_connected(&self) -> bool {
        self.state.lock().lifecycle.is_connected()
    }

    fn connection_count(&self) -> usize {
        self.state.lock().lifecycle.connections()
    }

    fn insert(&self, record: &R) -> TableResult<usize> {
        self.assert_accepted(record);
        let _lock = self.lock();
        self.assert_ready();

        self.source.insert(record)?;
        let landed = self.take_landed();
        Ok(landed[0])
    }

    fn insert_many(&self, records: &[R]) -> TableResult<Vec<usize>> {
        records.iter().for_each(|record| self.assert_accepted(record));
        let _lock = self.lock();
        self.assert_ready();
        if records.is_empty() {
            return Ok(Vec::new());
        }

        self.source.insert_many(records)?;
        Ok(self.take_landed())
    }

    fn replace(&self, position: usize, record: &R) -> TableResult<usize> {
        self.assert_accepted(record);
        let _lock = self.lock();
        let src = self.to_source(position);

        self.source.replace(src, record)?;
        let landed = self.take_landed();
        Ok(landed[0])
    }

    fn delete(&self, position: usize) -> TableResult<()> {
        let _lock = self.lock();
        let src = self.to_source(position);
        self.source.delete(src)
    }

    fn delete_many(&self, positions: &[usize]) -> TableResult<()> {
        let _lock = self.lock();
        let sources: Vec<usize> = positions.iter().map(|view| self.to_source(*view)).collect();
        self.source.delete_many(&sources)
    }

    /// Clears the whole underlying source, not only the view.
    fn clear(&self) -> TableResult<()> {
        let _lock = self.lock();
        self.assert_ready();
        self.source.clear()
    }

    fn next_auto_id(&self) -> RecordId {
        self.source.next_auto_id()
    }

    fn data_version(&self) -> u32 {
        self.source.data_version()
    }

    fn set_data_version(&self, version: u32) {
        self.source.set_data_version(version)
    }

    fn source_info(&self) -> SourceInfo {
        self.source.source_info()
    }

    fn auto_flush(&self) -> bool {
        self.source.auto_flush()
    }

    fn set_auto_flush(&self, enabled: bool) {
        self.source.set_auto_flush(enabled)
    }

    fn subscribe(&self, handler: Arc<SourceHandler<R>>) -> SubscriptionId {
        self.observers.subscribe(handler)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }
}

impl<R: Record> Drop for FilteredSource<R> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if state.lifecycle.is_connected() {
            if let Some(id) = state.subscription.take() {
                self.source.unsubscribe(id);
            }
            self.source.disconnect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::KeyIndex;
    use crate::provider::TableProvider;
    use crate::record::testing::Item;
    use crate::storage::SlottedTable;
    use tempfile::TempDir;

    fn provider(temp: &TempDir) -> Arc<TableProvider<Item>> {
        let table = SlottedTable::<Item>::open_or_create(1, temp.path().join("view.frt"));
        let provider = Arc::new(TableProvider::new(Arc::new(table)));
        provider.connect().unwrap();
        provider
    }

    fn even_view(provider: &Arc<TableProvider<Item>>, mode: AggregationMode) -> Arc<FilteredSource<Item>> {
        let view = FilteredSource::new(
            provider.clone() as Arc<dyn RecordSource<Item>>,
            |item: &Item| item.value % 2 == 0,
            mode,
        );
        view.connect().unwrap();
        view
    }

    fn recorder(view: &FilteredSource<Item>) -> Arc<Mutex<Vec<String>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        view.subscribe(source_handler(move |event: &SourceEvent<'_, Item>| {
            let line = match event {
                SourceEvent::Deleting { position }
                | SourceEvent::Deleted { position }
                | SourceEvent::Inserted { position, .. }
                | SourceEvent::Replacing { position, .. } => format!("{}:{}", event.name(), position),
                SourceEvent::Replaced { previous, position, .. } => {
                    format!("{}:{}->{}", event.name(), previous, position)
                }
                SourceEvent::DeletingMany { positions }
                | SourceEvent::DeletedMany { positions }
                | SourceEvent::InsertedMany { positions, .. } => format!("{}:{:?}", event.name(), positions),
                SourceEvent::Invalidated => event.name().to_string(),
            };
            sink.lock().push(line);
            Ok(())
        }));
        log
    }

    fn values(view: &FilteredSource<Item>) -> Vec<i32> {
        view.enumerate().map(|r| r.unwrap().value).collect()
    }

    #[test]
    fn test_both_modes_expose_passing_records() {
        let temp = TempDir::new().unwrap();
        let provider = provider(&temp);
        for (id, value) in [(1, 0), (2, 1), (3, 2), (4, 4), (5, 5)] {
            provider.insert(&Item::new(id, value, "")).unwrap();
        }

        for mode in [AggregationMode::Accepted, AggregationMode::Rejected] {
            let view = even_view(&provider, mode);
            assert_eq!(view.count(), 3);
            assert_eq!(values(&view), vec![0, 2, 4]);
            assert_eq!(view.to_source(1), 2);
            assert_eq!(view.to_view(3), 2);
            assert!(!view.is_selected(1));
        }
    }

    #[test]
    fn test_source_inserts_and_deletes_translate() {
        let temp = TempDir::new().unwrap();
        let provider = provider(&temp);
        let view = even_view(&provider, AggregationMode::Accepted);
        let log = recorder(&view);

        provider.insert(&Item::new(1, 2, "")).unwrap();
        provider.insert(&Item::new(2, 3, "")).unwrap();
        provider.insert(&Item::new(3, 4, "")).unwrap();
        provider.delete(1).unwrap();
        provider.delete(1).unwrap();

        assert_eq!(
            *log.lock(),
            vec!["inserted:0", "inserted:1", "deleting:1", "deleted:1"]
        );
        assert_eq!(values(&view), vec![2]);
    }

    #[test]
    fn test_replace_toggles_surface_once() {
        let temp = TempDir::new().unwrap();
        let provider = provider(&temp);
        provider.insert(&Item::new(1, 0, "")).unwrap();
        provider.insert(&Item::new(2, 1, "")).unwrap();
        let view = even_view(&provider, AggregationMode::Rejected);
        let log = recorder(&view);

        provider.replace(0, &Item::new(1, 2, "")).unwrap(); // kept -> kept
        provider.replace(0, &Item::new(1, 3, "")).unwrap(); // kept -> dropped
        provider.replace(1, &Item::new(2, 4, "")).unwrap(); // dropped -> kept
        provider.replace(0, &Item::new(1, 5, "")).unwrap(); // dropped -> dropped

        assert_eq!(
            *log.lock(),
            vec![
                "replacing:0",
                "replaced:0->0",
                "deleting:0",
                "deleted:0",
                "inserted:0",
            ]
        );
        assert_eq!(view.count(), 1);
    }

    #[test]
    fn test_writes_through_view() {
        let temp = TempDir::new().unwrap();
        let provider = provider(&temp);
        provider.insert(&Item::new(1, 1, "")).unwrap();
        let view = even_view(&provider, AggregationMode::Accepted);

        assert_eq!(view.insert(&Item::new(2, 2, "")).unwrap(), 0);
        assert_eq!(view.insert_many(&[Item::new(3, 4, ""), Item::new(4, 6, "")]).unwrap(), vec![1, 2]);
        assert_eq!(view.replace(1, &Item::new(3, 8, "")).unwrap(), 1);

        view.delete_many(&[0, 2]).unwrap();
        assert_eq!(values(&view), vec![8]);
        assert_eq!(provider.count(), 2);

        view.delete(0).unwrap();
        assert_eq!(view.count(), 0);
        assert_eq!(provider.get(0).unwrap().id, 1);
    }

    #[test]
    #[should_panic(expected = "does not pass the filter")]
    fn test_write_of_rejected_record_panics() {
        let temp = TempDir::new().unwrap();
        let provider = provider(&temp);
        let view = even_view(&provider, AggregationMode::Accepted);
        let _ = view.insert(&Item::new(1, 1, ""));
    }

    #[test]
    fn test_index_over_view() {
        let temp = TempDir::new().unwrap();
        let provider = provider(&temp);
        let view = even_view(&provider, AggregationMode::Accepted);
        let index = KeyIndex::new(view.clone() as Arc<dyn RecordSource<Item>>);
        index.connect().unwrap();

        for (id, value) in [(1, 0), (2, 1), (3, 2)] {
            provider.insert(&Item::new(id, value, "")).unwrap();
        }
        assert_eq!(index.ids(), vec![1, 3]);
        assert_eq!(index.index_of(3), Some(1));

        provider.replace(0, &Item::new(1, 7, "")).unwrap();
        assert_eq!(index.ids(), vec![3]);
        assert_eq!(index.index_of(3), Some(0));

        provider.replace(1, &Item::new(2, 10, "")).unwrap();
        assert_eq!(index.index_of(2), Some(0));
        assert_eq!(index.index_of(3), Some(1));
    }

    #[test]
    fn test_clear_reaches_source() {
        let temp = TempDir::new().unwrap();
        let provider = provider(&temp);
        provider.insert(&Item::new(1, 1, "")).unwrap();
        let view = even_view(&provider, AggregationMode::Accepted);
        let log = recorder(&view);

        view.clear().unwrap();
        assert_eq!(provider.count(), 0);
        assert_eq!(*log.lock(), vec!["invalidated"]);
    }

    #[test]
    fn test_disconnect_releases_source() {
        let temp = TempDir::new().unwrap();
        let provider = provider(&temp);
        let view = even_view(&provider, AggregationMode::Accepted);
        assert_eq!(provider.connection_count(), 2);

        view.disconnect();
        assert!(!view.is_connected());
        assert_eq!(provider.connection_count(), 1);
        provider.insert(&Item::new(1, 0, "")).unwrap();
    }
}
