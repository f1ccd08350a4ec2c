//! Change notifications and the observer registry
//!
//! Mutations are announced in two phases:
//!
//! - **pre** (`Deleting`, `DeletingMany`, `Replacing`): the source still
//!   holds the old state, handlers may read the records about to change.
//! - **post** (`Deleted`, `DeletedMany`, `Inserted`, `InsertedMany`,
//!   `Replaced`): the physical mutation is done.
//!
//! `Invalidated` asks dependents to rebuild from scratch (after `clear`, or
//! after a mutation aborted between the two phases).
//!
//! Handlers run synchronously on the mutating thread, inside the source's
//! lock. A pre-handler error aborts the mutation; a post-handler error is
//! returned to the caller after the mutation was applied.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::TableResult;
use crate::observability::Logger;

/// One change notification, in the emitting source's position space.
#[derive(Debug)]
pub enum SourceEvent<'a, R> {
    Deleting {
        position: usize,
    },
    Deleted {
        position: usize,
    },
    /// Positions sorted descending, distinct.
    DeletingMany {
        positions: &'a [usize],
    },
    /// Same positions as the matching `DeletingMany`.
    DeletedMany {
        positions: &'a [usize],
    },
    Inserted {
        position: usize,
        record: &'a R,
    },
    /// `positions[i]` is where `records[i]` landed, replayed in order.
    InsertedMany {
        positions: &'a [usize],
        records: &'a [R],
    },
    /// `record` is the incoming value; the old one is still readable.
    Replacing {
        position: usize,
        record: &'a R,
    },
    /// The record moved from `previous` to `position` when they differ.
    Replaced {
        previous: usize,
        position: usize,
        record: &'a R,
    },
    Invalidated,
}

impl<R> SourceEvent<'_, R> {
    /// Whether the event precedes the physical mutation.
    pub fn is_pre(&self) -> bool {
        matches!(
            self,
            SourceEvent::Deleting { .. } | SourceEvent::DeletingMany { .. } | SourceEvent::Replacing { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            SourceEvent::Deleting { .. } => "deleting",
            SourceEvent::Deleted { .. } => "deleted",
            SourceEvent::DeletingMany { .. } => "deleting_many",
            SourceEvent::DeletedMany { .. } => "deleted_many",
            SourceEvent::Inserted { .. } => "inserted",
            SourceEvent::InsertedMany { .. } => "inserted_many",
            SourceEvent::Replacing { .. } => "replacing",
            SourceEvent::Replaced { .. } => "replaced",
            SourceEvent::Invalidated => "invalidated",
        }
    }
}

/// Subscriber of a [`RecordSource`](super::RecordSource).
pub type SourceHandler<R> = dyn Fn(&SourceEvent<'_, R>) -> TableResult<()> + Send + Sync;

/// Boxes a closure as a [`SourceHandler`].
///
/// Going through this function lets the closure's argument type be inferred.
pub fn source_handler<R, F>(handler: F) -> Arc<SourceHandler<R>>
where
    F: Fn(&SourceEvent<'_, R>) -> TableResult<()> + Send + Sync + 'static,
{
    Arc::new(handler)
}

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

struct Entries<H: ?Sized> {
    next_id: u64,
    handlers: Vec<(SubscriptionId, Arc<H>)>,
}

/// Ordered list of subscribers.
///
/// Firing iterates over a snapshot, so handlers may subscribe, unsubscribe
/// or re-enter the source while being notified.
pub struct Observers<H: ?Sized> {
    entries: Mutex<Entries<H>>,
}

impl<H: ?Sized> Default for Observers<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: ?Sized> Observers<H> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Entries {
                next_id: 1,
                handlers: Vec::new(),
            }),
        }
    }

    pub fn subscribe(&self, handler: Arc<H>) -> SubscriptionId {
        let mut entries = self.entries.lock();
        let id = SubscriptionId(entries.next_id);
        entries.next_id += 1;
        entries.handlers.push((id, handler));
        id
    }

    /// Returns `false` if `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.handlers.len();
        entries.handlers.retain(|(sub, _)| *sub != id);
        entries.handlers.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.lock().handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Handlers in subscription order.
    pub fn snapshot(&self) -> Vec<Arc<H>> {
        self.entries
            .lock()
            .handlers
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect()
    }
}

impl<R> Observers<SourceHandler<R>> {
    /// Runs every handler, in order, and returns the first error.
    ///
    /// Later handlers still run after a failure; their errors are logged.
    pub fn emit(&self, event: &SourceEvent<'_, R>) -> TableResult<()> {
        let mut first = None;
        for handler in self.snapshot() {
            if let Err(err) = (*handler)(event) {
                if first.is_none() {
                    first = Some(err);
                } else {
                    Logger::error(
                        "SUBSCRIBER_FAULT",
                        &[("event", event.name()), ("error", &err.to_string())],
                    );
                }
            }
        }
        first.map_or(Ok(()), Err)
    }
}
