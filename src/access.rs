//! Access paths: shared, connected handles per table
//!
//! An [`AccessPath`] hands out one connected provider and one connected
//! [`KeyIndex`] per table identifier, opening them through a
//! [`SourceCatalog`] on first request. Each cache is bounded: when a new
//! entry would exceed the capacity, the least recently handed out entries
//! that nobody else holds are disconnected and dropped.
//!
//! Eviction never touches a handle still referenced outside the cache, so a
//! cache may temporarily grow past its capacity.

use std::fs;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::StoreConfig;
use crate::error::{TableError, TableResult};
use crate::index::KeyIndex;
use crate::observability::{log_event_with_fields, Event};
use crate::provider::{RecordSource, TableProvider};
use crate::record::Record;
use crate::storage::{DataTable, Layout, OpenMode};
use crate::sync::Gate;

/// Capacity used when none (or zero) is configured.
pub const DEFAULT_CAPACITY: usize = 8;

/// Opens the source of a table identifier.
pub trait SourceCatalog<R: Record>: Send + Sync {
    /// A new, not yet connected source.
    fn open_source(&self, table_id: u32) -> TableResult<Arc<dyn RecordSource<R>>>;
}

/// Tables stored as files under a configured directory, all with layout `L`.
pub struct StoreCatalog<R, L> {
    config: StoreConfig,
    _layout: PhantomData<fn() -> (R, L)>,
}

impl<R: Record, L: Layout<R>> StoreCatalog<R, L> {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            _layout: PhantomData,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }
}

impl<R: Record, L: Layout<R>> SourceCatalog<R> for StoreCatalog<R, L> {
    fn open_source(&self, table_id: u32) -> TableResult<Arc<dyn RecordSource<R>>> {
        let path = self.config.table_path(table_id, L::KIND);
        if self.config.open_mode == OpenMode::Open && !path.exists() {
            return Err(TableError::unknown_source(table_id));
        }

        fs::create_dir_all(&self.config.data_dir).map_err(|e| {
            TableError::io_error(
                format!("failed to create {}", self.config.data_dir.display()),
                e,
            )
        })?;

        let table = DataTable::<R, L>::new(table_id, path, self.config.open_mode);
        let provider = TableProvider::new(Arc::new(table));
        provider.set_auto_flush(self.config.auto_flush);
        Ok(Arc::new(provider))
    }
}

struct Entry<T: ?Sized> {
    table_id: u32,
    handle: Arc<T>,
    handed_out: u64,
}

/// Bounded list of handles, least recently handed out first to go.
struct Shelf<T: ?Sized> {
    entries: Vec<Entry<T>>,
}

impl<T: ?Sized> Shelf<T> {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    fn fetch(&mut self, table_id: u32, tick: u64) -> Option<Arc<T>> {
        let entry = self.entries.iter_mut().find(|e| e.table_id == table_id)?;
        entry.handed_out = tick;
        Some(Arc::clone(&entry.handle))
    }

    /// Removes unreferenced entries, oldest first, until one more fits.
    fn make_room(&mut self, capacity: usize) -> Vec<(u32, Arc<T>)> {
        let mut evicted = Vec::new();
        while self.entries.len() >= capacity {
            let victim = self
                .entries
                .iter()
                .enumerate()
                .filter(|(_, e)| Arc::strong_count(&e.handle) == 1)
                .min_by_key(|(_, e)| e.handed_out)
                .map(|(at, _)| at);
            match victim {
                Some(at) => {
                    let entry = self.entries.remove(at);
                    evicted.push((entry.table_id, entry.handle));
                }
                None => break,
            }
        }
        evicted
    }

    fn drain(&mut self) -> Vec<(u32, Arc<T>)> {
        self.entries
            .drain(..)
            .map(|e| (e.table_id, e.handle))
            .collect()
    }
}

struct PathState<R: Record> {
    providers: Shelf<dyn RecordSource<R>>,
    indexes: Shelf<KeyIndex<R>>,
    tick: u64,
    closed: bool,
}

impl<R: Record> PathState<R> {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}

/// Cache of connected providers and key indexes, keyed by table identifier.
pub struct AccessPath<R: Record> {
    catalog: Box<dyn SourceCatalog<R>>,
    capacity: usize,
    gate: Gate,
    state: Mutex<PathState<R>>,
}

impl<R: Record> AccessPath<R> {
    /// `capacity` 0 means [`DEFAULT_CAPACITY`].
    pub fn new(catalog: impl SourceCatalog<R> + 'static, capacity: usize) -> Self {
        Self {
            catalog: Box::new(catalog),
            capacity: if capacity == 0 { DEFAULT_CAPACITY } else { capacity },
            gate: Gate::new(),
            state: Mutex::new(PathState {
                providers: Shelf::new(),
                indexes: Shelf::new(),
                tick: 0,
                closed: false,
            }),
        }
    }

    /// Access path over the table files of `config`, all with layout `L`.
    pub fn from_config<L: Layout<R>>(config: StoreConfig) -> Self {
        let capacity = config.capacity();
        Self::new(StoreCatalog::<R, L>::new(config), capacity)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The connected provider of `table_id`.
    pub fn provider(&self, table_id: u32) -> TableResult<Arc<dyn RecordSource<R>>> {
        let _lock = self.gate.lock();
        self.assert_open();

        {
            let mut state = self.state.lock();
            let tick = state.next_tick();
            if let Some(provider) = state.providers.fetch(table_id, tick) {
                return Ok(provider);
            }
        }

        let provider = self.catalog.open_source(table_id)?;
        provider.connect()?;

        let evicted = {
            let mut state = self.state.lock();
            let evicted = state.providers.make_room(self.capacity);
            let tick = state.next_tick();
            state.providers.entries.push(Entry {
                table_id,
                handle: Arc::clone(&provider),
                handed_out: tick,
            });
            evicted
        };
        for (id, source) in evicted {
            source.disconnect();
            log_evicted("provider", id);
        }
        Ok(provider)
    }

    /// The connected key index of `table_id`, over its cached provider.
    pub fn key_index(&self, table_id: u32) -> TableResult<Arc<KeyIndex<R>>> {
        let _lock = self.gate.lock();
        self.assert_open();

        {
            let mut state = self.state.lock();
            let tick = state.next_tick();
            if let Some(index) = state.indexes.fetch(table_id, tick) {
                return Ok(index);
            }
        }

        let index = Arc::new(KeyIndex::new(self.provider(table_id)?));
        index.connect()?;

        let evicted = {
            let mut state = self.state.lock();
            let evicted = state.indexes.make_room(self.capacity);
            let tick = state.next_tick();
            state.indexes.entries.push(Entry {
                table_id,
                handle: Arc::clone(&index),
                handed_out: tick,
            });
            evicted
        };
        for (id, index) in evicted {
            index.disconnect();
            log_evicted("key index", id);
        }
        Ok(index)
    }

    /// Number of cached providers.
    pub fn len(&self) -> usize {
        self.state.lock().providers.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of cached key indexes.
    pub fn index_count(&self) -> usize {
        self.state.lock().indexes.entries.len()
    }

    /// Whether a provider of `table_id` is cached.
    pub fn contains(&self, table_id: u32) -> bool {
        self.state
            .lock()
            .providers
            .entries
            .iter()
            .any(|e| e.table_id == table_id)
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Disconnects every cached index, then every provider.
    ///
    /// Handles still held elsewhere stay usable until their own connections
    /// are released. Idempotent.
    pub fn close(&self) {
        let _lock = self.gate.lock();
        let (indexes, providers) = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            (state.indexes.drain(), state.providers.drain())
        };

        for (_, index) in indexes {
            index.disconnect();
        }
        for (_, provider) in providers {
            provider.disconnect();
        }
    }

    fn assert_open(&self) {
        assert!(!self.state.lock().closed, "access path is closed");
    }
}

impl<R: Record> Drop for AccessPath<R> {
    fn drop(&mut self) {
        self.close();
    }
}

fn log_evicted(kind: &str, table_id: u32) {
    let table_id = table_id.to_string();
    log_event_with_fields(Event::CacheEvicted, &[("kind", kind), ("table_id", &table_id)]);
}
