//! Index maintenance for tabledb
//!
//! Indexes are derived, in-memory state: built by a full scan of their
//! source on connect, then updated incrementally from its change
//! notifications, synchronously and inside the source's lock.
//!
//! - [`KeyIndex`]: record id -> position
//! - [`AttributeIndex`]: selector value -> positions
//! - [`FilteredSource`]: the records passing a predicate, itself a
//!   [`RecordSource`](crate::provider::RecordSource) so indexes can stack on it
//!
//! # Invariants
//!
//! - After every mutation, `source.get(index_of(r.id()))` is `r` for every
//!   record `r` of the source
//! - Every source position is in exactly one attribute bucket
//! - A filtered view counts exactly the source records passing its filter
//! - A disconnected or stale structure refuses queries (panic)

mod attribute;
mod events;
mod filter;
mod key;
mod maintained;
mod pending;

pub use attribute::AttributeIndex;
pub use events::{index_handler, IndexEvent, IndexHandler};
pub use filter::{AggregationMode, FilteredSource};
pub use key::KeyIndex;
pub use pending::PendingRecords;
