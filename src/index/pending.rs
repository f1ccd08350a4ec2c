//! Records captured between a pre and a post notification

use std::collections::HashMap;

use crate::record::Record;

/// Old records keyed by source position.
///
/// Filled by `Deleting`/`DeletingMany`/`Replacing` while the source still
/// holds them, drained by the matching post event. Empty between mutations.
#[derive(Debug)]
pub struct PendingRecords<R> {
    records: HashMap<usize, R>,
}

impl<R: Record> Default for PendingRecords<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Record> PendingRecords<R> {
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
        }
    }

    pub fn put(&mut self, position: usize, record: R) {
        self.records.insert(position, record);
    }

    /// Removes the record captured for `position`.
    ///
    /// # Panics
    ///
    /// Panics if no pre notification captured it.
    pub fn take(&mut self, position: usize) -> R {
        match self.records.remove(&position) {
            Some(record) => record,
            None => panic!("no pending record at position {}", position),
        }
    }

    /// Drains the records of `positions`, in that order.
    pub fn take_many(&mut self, positions: &[usize]) -> Vec<R> {
        positions.iter().map(|p| self.take(*p)).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Forgets everything, after an aborted mutation.
    pub fn clear(&mut self) {
        self.records.clear();
    }
}
