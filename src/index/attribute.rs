//! Attribute index: attribute value -> positions sharing it
//!
//! Every position of the source sits in exactly one bucket, the one of its
//! record's current attribute. Buckets are kept sorted so lookups come back
//! in source order. Empty buckets are dropped.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use super::events::IndexHandler;
use super::maintained::{IndexMap, Maintained};
use crate::error::TableResult;
use crate::provider::{RecordSource, SubscriptionId};
use crate::record::Record;
use crate::sync::ScopedLock;

type Selector<R, A> = dyn Fn(&R) -> A + Send + Sync;

pub(crate) struct AttributeMap<R, A> {
    selector: Arc<Selector<R, A>>,
    buckets: HashMap<A, Vec<usize>>,
    tracked: usize,
}

impl<R, A: Eq + Hash> AttributeMap<R, A> {
    fn add(&mut self, attribute: A, position: usize) {
        let bucket = self.buckets.entry(attribute).or_default();
        let at = bucket.partition_point(|p| *p < position);
        bucket.insert(at, position);
    }

    fn take(&mut self, attribute: &A, position: usize) {
        let Some(bucket) = self.buckets.get_mut(attribute) else {
            panic!("position {} has no attribute bucket", position);
        };
        match bucket.binary_search(&position) {
            Ok(at) => {
                bucket.remove(at);
            }
            Err(_) => panic!("position {} is missing from its attribute bucket", position),
        }
        if bucket.is_empty() {
            self.buckets.remove(attribute);
        }
    }
}

impl<R, A> IndexMap<R> for AttributeMap<R, A>
where
    R: Record,
    A: Eq + Hash + Clone + Send + 'static,
{
    fn emptied(&self) -> Self {
        Self {
            selector: Arc::clone(&self.selector),
            buckets: HashMap::new(),
            tracked: 0,
        }
    }

    fn load(&mut self, position: usize, record: &R) -> TableResult<()> {
        let attribute = (self.selector)(record);
        self.buckets.entry(attribute).or_default().push(position);
        self.tracked += 1;
        Ok(())
    }

    fn insert(&mut self, position: usize, record: &R) {
        // appending needs no renumbering
        if position < self.tracked {
            for bucket in self.buckets.values_mut() {
                for p in bucket.iter_mut().filter(|p| **p >= position) {
                    *p += 1;
                }
            }
        }
        self.add((self.selector)(record), position);
        self.tracked += 1;
    }

    fn remove(&mut self, position: usize, record: &R) {
        self.take(&(self.selector)(record), position);
        for bucket in self.buckets.values_mut() {
            for p in bucket.iter_mut().filter(|p| **p > position) {
                *p -= 1;
            }
        }
        self.tracked -= 1;
    }

    fn replace(&mut self, position: usize, old: &R, new: &R) {
        let before = (self.selector)(old);
        let after = (self.selector)(new);
        if before != after {
            self.take(&before, position);
            self.add(after, position);
        }
    }
}

/// Groups the positions of a source by an attribute derived from each record.
pub struct AttributeIndex<R: Record, A> {
    inner: Arc<Maintained<R, AttributeMap<R, A>>>,
}

impl<R, A> AttributeIndex<R, A>
where
    R: Record,
    A: Eq + Hash + Clone + Send + 'static,
{
    pub fn new<F>(source: Arc<dyn RecordSource<R>>, selector: F) -> Self
    where
        F: Fn(&R) -> A + Send + Sync + 'static,
    {
        let map = AttributeMap {
            selector: Arc::new(selector),
            buckets: HashMap::new(),
            tracked: 0,
        };
        Self {
            inner: Maintained::new("attribute index", source, map),
        }
    }

    pub fn source(&self) -> &Arc<dyn RecordSource<R>> {
        self.inner.source()
    }

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

    pub fn is_stale(&self) -> bool {
        self.inner.is_stale()
    }

    pub fn reload(&self) -> TableResult<()> {
        self.inner.reload()
    }

    /// Positions whose record has `attribute`, ascending.
    pub fn positions_of(&self, attribute: &A) -> Vec<usize> {
        self.inner
            .with_map(|map| map.buckets.get(attribute).cloned().unwrap_or_default())
    }

    /// Records having `attribute`, in source order.
    pub fn get(&self, attribute: &A) -> TableResult<Vec<R>> {
        let _lock = self.inner.source().lock();
        let positions = self.positions_of(attribute);
        self.inner.source().get_many(&positions)
    }

    /// Distinct attributes present, in no particular order.
    pub fn attributes(&self) -> Vec<A> {
        self.inner.with_map(|map| map.buckets.keys().cloned().collect())
    }

    pub fn contains(&self, attribute: &A) -> bool {
        self.inner.with_map(|map| map.buckets.contains_key(attribute))
    }

    /// Number of distinct attributes.
    pub fn attribute_count(&self) -> usize {
        self.inner.with_map(|map| map.buckets.len())
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
