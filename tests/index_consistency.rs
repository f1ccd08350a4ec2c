//! Index Consistency Tests
//!
//! Every index stacked on a provider must agree with it after each mutation,
//! whatever the interleaving and whatever the table layout:
//! - key index: id -> current position
//! - attribute index: each position in exactly one bucket
//! - filtered source: exactly the passing records, in source order

mod common;

use std::sync::Arc;

use common::{create_temp_dir, ids, slotted_provider, Part};
use parking_lot::Mutex;
use proptest::prelude::*;
use tabledb::index::{AggregationMode, AttributeIndex, FilteredSource, KeyIndex};
use tabledb::provider::{source_handler, RecordAccess, RecordSource, SourceEvent, TableProvider};
use tabledb::storage::{SlottedTable, TombstonedTable};
use tempfile::TempDir;

// =============================================================================
// Test Utilities
// =============================================================================

fn bucket(part: &Part) -> i32 {
    part.quantity.rem_euclid(3)
}

fn passes(part: &Part) -> bool {
    part.quantity % 2 == 0
}

/// A provider with every kind of index stacked on it.
struct Stack {
    provider: Arc<dyn RecordSource<Part>>,
    keys: KeyIndex<Part>,
    buckets: AttributeIndex<Part, i32>,
    accepted: Arc<FilteredSource<Part>>,
    rejected: Arc<FilteredSource<Part>>,
    view_keys: KeyIndex<Part>,
}

impl Stack {
    fn new(provider: Arc<dyn RecordSource<Part>>) -> Self {
        let keys = KeyIndex::new(provider.clone());
        keys.connect().unwrap();
        let buckets = AttributeIndex::new(provider.clone(), bucket);
        buckets.connect().unwrap();

        let accepted = FilteredSource::new(provider.clone(), passes, AggregationMode::Accepted);
        accepted.connect().unwrap();
        let rejected = FilteredSource::new(provider.clone(), passes, AggregationMode::Rejected);
        rejected.connect().unwrap();

        let view_keys = KeyIndex::new(accepted.clone() as Arc<dyn RecordSource<Part>>);
        view_keys.connect().unwrap();

        Self {
            provider,
            keys,
            buckets,
            accepted,
            rejected,
            view_keys,
        }
    }

    fn check(&self) -> Result<(), TestCaseError> {
        let records: Vec<Part> = (0..self.provider.count())
            .map(|p| self.provider.get(p).unwrap())
            .collect();

        prop_assert_eq!(self.keys.len(), records.len());
        for (position, record) in records.iter().enumerate() {
            let found = self.keys.index_of(record.id);
            prop_assert_eq!(found, Some(position));
            prop_assert_eq!(&self.provider.get(position).unwrap(), record);
        }

        let mut bucketed = 0;
        for attribute in self.buckets.attributes() {
            let positions = self.buckets.positions_of(&attribute);
            for p in &positions {
                prop_assert_eq!(bucket(&records[*p]), attribute);
            }
            bucketed += positions.len();
        }
        prop_assert_eq!(bucketed, records.len());

        let passing: Vec<Part> = records.iter().filter(|r| passes(r)).cloned().collect();
        for view in [&self.accepted, &self.rejected] {
            prop_assert_eq!(view.count(), passing.len());
            let seen: Vec<Part> = (0..view.count()).map(|p| view.get(p).unwrap()).collect();
            prop_assert_eq!(&seen, &passing);
        }

        prop_assert_eq!(self.view_keys.len(), passing.len());
        for (position, record) in passing.iter().enumerate() {
            prop_assert_eq!(self.view_keys.index_of(record.id), Some(position));
        }
        Ok(())
    }
}

fn slotted(temp: &TempDir) -> Arc<dyn RecordSource<Part>> {
    slotted_provider(temp, "stack.frt")
}

fn tombstoned(temp: &TempDir) -> Arc<dyn RecordSource<Part>> {
    let table = TombstonedTable::<Part>::open_or_create(3, temp.path().join("stack.fzt"));
    let provider = Arc::new(TableProvider::new(Arc::new(table)));
    provider.connect().unwrap();
    provider
}

#[derive(Debug, Clone)]
enum Op {
    Insert(i32),
    InsertMany(Vec<i32>),
    Delete(usize),
    DeleteMany(Vec<usize>),
    Replace(usize, i32),
    Clear,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let quantity = -20i32..20;
    prop_oneof![
        6 => quantity.clone().prop_map(Op::Insert),
        2 => prop::collection::vec(quantity.clone(), 1..5).prop_map(Op::InsertMany),
        4 => any::<usize>().prop_map(Op::Delete),
        2 => prop::collection::vec(any::<usize>(), 1..4).prop_map(Op::DeleteMany),
        5 => (any::<usize>(), quantity).prop_map(|(p, q)| Op::Replace(p, q)),
        1 => Just(Op::Clear),
    ]
}

fn apply(source: &dyn RecordSource<Part>, op: Op, next_id: &mut u32) {
    let mut fresh = |quantity: i32| {
        *next_id += 1;
        Part::new(*next_id, quantity, "")
    };
    let count = source.count();
    match op {
        Op::Insert(q) => {
            source.insert(&fresh(q)).unwrap();
        }
        Op::InsertMany(qs) => {
            let parts: Vec<Part> = qs.into_iter().map(&mut fresh).collect();
            source.insert_many(&parts).unwrap();
        }
        Op::Delete(p) if count > 0 => source.delete(p % count).unwrap(),
        Op::DeleteMany(ps) if count > 0 => {
            let positions: Vec<usize> = ps.iter().map(|p| p % count).collect();
            source.delete_many(&positions).unwrap();
        }
        Op::Replace(p, q) if count > 0 => {
            let position = p % count;
            let id = source.get(position).unwrap().id;
            source.replace(position, &Part::new(id, q, "")).unwrap();
        }
        Op::Clear => source.clear().unwrap(),
        _ => {}
    }
}

// =============================================================================
// Consistency Under Random Interleavings
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_indexes_track_slotted_source(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let temp = create_temp_dir();
        let stack = Stack::new(slotted(&temp));
        let mut next_id = 0;
        for op in ops {
            apply(stack.provider.as_ref(), op, &mut next_id);
            stack.check()?;
        }
    }

    #[test]
    fn prop_indexes_track_tombstoned_source(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let temp = create_temp_dir();
        let stack = Stack::new(tombstoned(&temp));
        let mut next_id = 0;
        for op in ops {
            apply(stack.provider.as_ref(), op, &mut next_id);
            stack.check()?;
        }
    }

    /// A replace that flips the predicate surfaces as exactly one insert or delete.
    #[test]
    fn prop_filter_toggle_notifies_once(
        initial in prop::collection::vec(-10i32..10, 1..12),
        replaces in prop::collection::vec((any::<usize>(), -10i32..10), 1..20),
        rejected_mode in any::<bool>(),
    ) {
        let temp = create_temp_dir();
        let provider = slotted(&temp);
        let parts: Vec<Part> = initial
            .iter()
            .enumerate()
            .map(|(i, q)| Part::new(i as u32 + 1, *q, ""))
            .collect();
        provider.insert_many(&parts).unwrap();

        let mode = if rejected_mode { AggregationMode::Rejected } else { AggregationMode::Accepted };
        let view = FilteredSource::new(provider.clone(), passes, mode);
        view.connect().unwrap();

        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        view.subscribe(source_handler(move |event: &SourceEvent<'_, Part>| {
            sink.lock().push(event.name());
            Ok(())
        }));

        for (pick, q) in replaces {
            let position = pick % provider.count();
            let old = provider.get(position).unwrap();
            let new = Part::new(old.id, q, "");
            log.lock().clear();

            provider.replace(position, &new).unwrap();

            let structural: Vec<&str> = log
                .lock()
                .iter()
                .copied()
                .filter(|name| *name == "inserted" || *name == "deleted")
                .collect();
            match (passes(&old), passes(&new)) {
                (false, true) => prop_assert_eq!(structural, vec!["inserted"]),
                (true, false) => prop_assert_eq!(structural, vec!["deleted"]),
                _ => prop_assert!(structural.is_empty()),
            }
        }
    }
}

// =============================================================================
// Scenarios
// =============================================================================

/// Deleting position 0 shifts the remaining ids down and forgets the deleted one.
#[test]
fn test_key_index_after_front_delete() {
    let temp = create_temp_dir();
    let provider = slotted(&temp);
    for id in [10, 20, 30] {
        provider.insert(&Part::new(id, 0, "")).unwrap();
    }
    let index = KeyIndex::new(provider.clone());
    index.connect().unwrap();

    provider.delete(0).unwrap();

    assert_eq!(index.index_of(20), Some(0));
    assert_eq!(index.index_of(30), Some(1));
    assert_eq!(index.index_of(10), None);
    assert_eq!(index.get(30).unwrap(), Some(Part::new(30, 0, "")));
}

/// Two indexes on one provider see each mutation in subscription order.
#[test]
fn test_indexes_share_one_provider() {
    let temp = create_temp_dir();
    let provider = slotted(&temp);
    let first = KeyIndex::new(provider.clone());
    let second = KeyIndex::new(provider.clone());
    first.connect().unwrap();
    second.connect().unwrap();
    assert_eq!(provider.connection_count(), 3);

    provider.insert(&Part::new(1, 0, "")).unwrap();
    provider.insert(&Part::new(2, 0, "")).unwrap();
    provider.delete(0).unwrap();
    assert_eq!(first.ids(), vec![2]);
    assert_eq!(second.index_of(2), Some(0));

    drop(first);
    assert_eq!(provider.connection_count(), 2);
    assert_eq!(ids(provider.as_ref()), vec![2]);
}

/// Indexes reconnect to a reopened table with a fresh scan.
#[test]
fn test_index_rebuilds_from_persisted_table() {
    let temp = create_temp_dir();
    let path = temp.path().join("persist.frt");
    {
        let table = SlottedTable::<Part>::open_or_create(1, &path);
        let provider = Arc::new(TableProvider::new(Arc::new(table)));
        provider.connect().unwrap();
        for (id, q) in [(5, 1), (6, 2), (7, 3)] {
            provider.insert(&Part::new(id, q, "")).unwrap();
        }
        provider.delete(1).unwrap();
        provider.disconnect();
    }

    let table = SlottedTable::<Part>::open(1, &path);
    let provider: Arc<dyn RecordSource<Part>> = Arc::new(TableProvider::new(Arc::new(table)));
    let index = KeyIndex::new(provider.clone());
    index.connect().unwrap();
    assert!(provider.is_connected());
    assert_eq!(index.ids(), vec![5, 7]);
    assert_eq!(index.index_of(7), Some(1));
}
