//! Incremental maintenance shared by the key and attribute indexes
//!
//! A [`Maintained`] index owns a position map `M`, subscribes to its source
//! and replays every change notification on the map:
//!
//! ```text
//! Deleting / DeletingMany / Replacing  -> capture old records (source still has them)
//! Deleted / DeletedMany                -> remove captured records, shift down
//! Inserted / InsertedMany              -> shift up, add
//! Replaced                             -> swap in place, or remove + add on a move
//! Invalidated                          -> full rescan, publish Reset
//! ```
//!
//! If a rescan fails the index turns stale: queries panic until `reload`
//! succeeds.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::events::{IndexEvent, IndexHandler};
use super::pending::PendingRecords;
use crate::error::TableResult;
use crate::lifecycle::{Lifecycle, Release};
use crate::observability::{log_event_with_fields, Event, ObservationScope};
use crate::provider::{source_handler, Observers, RecordSource, SourceEvent, SubscriptionId};
use crate::record::Record;
use crate::sync::{Gate, ScopedLock};

/// Position bookkeeping of one index flavour.
pub(crate) trait IndexMap<R: Record>: Send + 'static {
    /// An empty map configured like `self`.
    fn emptied(&self) -> Self
    where
        Self: Sized;

    /// Adds the record found at `position` by a full scan (ascending order).
    fn load(&mut self, position: usize, record: &R) -> TableResult<()>;

    /// Shifts positions `>= position` up, then adds the record.
    fn insert(&mut self, position: usize, record: &R);

    /// Drops the record, then shifts positions `> position` down.
    fn remove(&mut self, position: usize, record: &R);

    /// Swaps `old` for `new` at an unchanged position.
    fn replace(&mut self, position: usize, old: &R, new: &R);
}

struct IndexState<R, M> {
    lifecycle: Lifecycle,
    map: M,
    pending: PendingRecords<R>,
    subscription: Option<SubscriptionId>,
    stale: bool,
}

pub(crate) struct Maintained<R: Record, M> {
    kind: &'static str,
    source: Arc<dyn RecordSource<R>>,
    gate: Gate,
    state: Mutex<IndexState<R, M>>,
    observers: Observers<IndexHandler<R>>,
    this: Weak<Self>,
}

impl<R: Record, M: IndexMap<R>> Maintained<R, M> {
    pub fn new(kind: &'static str, source: Arc<dyn RecordSource<R>>, map: M) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            kind,
            source,
            gate: Gate::new(),
            state: Mutex::new(IndexState {
                lifecycle: Lifecycle::new(),
                map,
                pending: PendingRecords::new(),
                subscription: None,
                stale: false,
            }),
            observers: Observers::new(),
            this: this.clone(),
        })
    }

    pub fn source(&self) -> &Arc<dyn RecordSource<R>> {
        &self.source
    }

    pub fn observers(&self) -> &Observers<IndexHandler<R>> {
        &self.observers
    }

    pub fn lock(&self) -> ScopedLock<'_> {
        self.gate.lock().then(self.source.lock())
    }

    pub fn try_lock(&self) -> Option<ScopedLock<'_>> {
        let outer = self.gate.try_lock()?;
        let inner = self.source.try_lock()?;
        Some(outer.then(inner))
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().lifecycle.is_connected()
    }

    pub fn connection_count(&self) -> usize {
        self.state.lock().lifecycle.connections()
    }

    pub fn is_stale(&self) -> bool {
        self.state.lock().stale
    }

    /// Reads the map of a connected, up-to-date index.
    ///
    /// # Panics
    ///
    /// Panics if the index is disconnected or stale.
    pub fn with_map<T>(&self, read: impl FnOnce(&M) -> T) -> T {
        let state = self.state.lock();
        state.lifecycle.assert_connected(self.kind);
        assert!(!state.stale, "{} is stale and must be reloaded", self.kind);
        read(&state.map)
    }

    pub fn connect(&self) -> TableResult<()> {
        let _lock = self.lock();
        if !self.state.lock().lifecycle.begin_connect() {
            return Ok(());
        }

        match self.attach() {
            Ok(()) => {
                self.state.lock().lifecycle.finish_connect();
                Ok(())
            }
            Err(err) => {
                self.state.lock().lifecycle.abort_connect();
                Err(err)
            }
        }
    }

    pub fn disconnect(&self) {
        let _lock = self.lock();
        if self.state.lock().lifecycle.begin_disconnect() != Release::Last {
            return;
        }

        self.detach();
        self.state.lock().lifecycle.finish_disconnect();
    }

    /// Drops every entry and rescans the source.
    pub fn reload(&self) -> TableResult<()> {
        let _lock = self.lock();
        self.state.lock().lifecycle.assert_connected(self.kind);
        self.rebuild()
    }

    fn attach(&self) -> TableResult<()> {
        self.source.connect()?;

        let map = match self.scan() {
            Ok(map) => map,
            Err(err) => {
                self.source.disconnect();
                return Err(err);
            }
        };

        let this = self.this.clone();
        let id = self.source.subscribe(source_handler(move |event: &SourceEvent<'_, R>| {
            match this.upgrade() {
                Some(index) => index.on_source_event(event),
                None => Ok(()),
            }
        }));

        let mut state = self.state.lock();
        state.map = map;
        state.stale = false;
        state.subscription = Some(id);
        Ok(())
    }

    fn detach(&self) {
        let subscription = {
            let mut state = self.state.lock();
            state.map = state.map.emptied();
            state.pending.clear();
            state.subscription.take()
        };
        if let Some(id) = subscription {
            self.source.unsubscribe(id);
        }
        self.source.disconnect();

        log_event_with_fields(Event::SourceDisconnected, &[("index", self.kind)]);
    }

    fn scan(&self) -> TableResult<M> {
        let scope = ObservationScope::with_fields("INDEX_BUILD", &[("index", self.kind)]);
        let empty = self.state.lock().map.emptied();
        let count = self.source.count();

        let built = (0..count).try_fold(empty, |mut map, position| -> TableResult<M> {
            let record = self.source.get(position)?;
            map.load(position, &record)?;
            Ok(map)
        });

        match built {
            Ok(map) => {
                let records = count.to_string();
                scope.complete_with_fields(&[("records", &records)]);
                log_event_with_fields(Event::IndexBuilt, &[("index", self.kind), ("records", &records)]);
                Ok(map)
            }
            Err(err) => {
                scope.fail(&err.to_string());
                Err(err)
            }
        }
    }

    fn rebuild(&self) -> TableResult<()> {
        self.state.lock().pending.clear();

        match self.scan() {
            Ok(map) => {
                {
                    let mut state = self.state.lock();
                    state.map = map;
                    state.stale = false;
                }
                log_event_with_fields(Event::IndexInvalidated, &[("index", self.kind)]);
                self.observers.notify(&IndexEvent::Reset);
                Ok(())
            }
            Err(err) => {
                let mut state = self.state.lock();
                state.map = state.map.emptied();
                state.stale = true;
                Err(err)
            }
        }
    }

    fn on_source_event(&self, event: &SourceEvent<'_, R>) -> TableResult<()> {
        if self.state.lock().stale && !matches!(event, SourceEvent::Invalidated) {
            return Ok(());
        }

        match event {
            SourceEvent::Deleting { position } | SourceEvent::Replacing { position, .. } => {
                let old = self.source.get(*position)?;
                self.state.lock().pending.put(*position, old);
            }
            SourceEvent::DeletingMany { positions } => {
                let olds = self.source.get_many(positions)?;
                let mut state = self.state.lock();
                for (position, old) in positions.iter().zip(olds) {
                    state.pending.put(*position, old);
                }
            }
            SourceEvent::Deleted { position } => {
                let old = {
                    let mut state = self.state.lock();
                    let old = state.pending.take(*position);
                    state.map.remove(*position, &old);
                    debug_assert!(state.pending.is_empty());
                    old
                };
                self.observers.notify(&IndexEvent::Deleted(&old));
            }
            SourceEvent::DeletedMany { positions } => {
                let olds = {
                    let mut state = self.state.lock();
                    let olds = state.pending.take_many(positions);
                    // descending order keeps the remaining positions valid
                    for (position, old) in positions.iter().zip(&olds) {
                        state.map.remove(*position, old);
                    }
                    debug_assert!(state.pending.is_empty());
                    olds
                };
                self.observers.notify(&IndexEvent::DeletedMany(&olds));
            }
            SourceEvent::Inserted { position, record } => {
                self.state.lock().map.insert(*position, record);
                self.observers.notify(&IndexEvent::Inserted(record));
            }
            SourceEvent::InsertedMany { positions, records } => {
                {
                    let mut state = self.state.lock();
                    for (position, record) in positions.iter().zip(records.iter()) {
                        state.map.insert(*position, record);
                    }
                }
                self.observers.notify(&IndexEvent::InsertedMany(records));
            }
            SourceEvent::Replaced {
                previous,
                position,
                record,
            } => {
                {
                    let mut state = self.state.lock();
                    let old = state.pending.take(*previous);
                    if previous == position {
                        state.map.replace(*position, &old, record);
                    } else {
                        state.map.remove(*previous, &old);
                        state.map.insert(*position, record);
                    }
                    debug_assert!(state.pending.is_empty());
                }
                self.observers.notify(&IndexEvent::Replaced(record));
            }
            SourceEvent::Invalidated => self.rebuild()?,
        }
        Ok(())
    }
}

impl<R: Record, M> Drop for Maintained<R, M> {
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
