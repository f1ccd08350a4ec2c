//! Notifications published by indexes
//!
//! Indexes speak in records, not positions: a subscriber learns which
//! records entered, left or changed, after the index was updated.

use std::sync::Arc;

use crate::observability::Logger;
use crate::provider::Observers;

/// A change applied to an index.
#[derive(Debug)]
pub enum IndexEvent<'a, R> {
    Inserted(&'a R),
    InsertedMany(&'a [R]),
    Deleted(&'a R),
    DeletedMany(&'a [R]),
    /// Carries the new value.
    Replaced(&'a R),
    /// The index was rebuilt from scratch.
    Reset,
}

impl<R> IndexEvent<'_, R> {
    pub fn name(&self) -> &'static str {
        match self {
            IndexEvent::Inserted(_) => "inserted",
            IndexEvent::InsertedMany(_) => "inserted_many",
            IndexEvent::Deleted(_) => "deleted",
            IndexEvent::DeletedMany(_) => "deleted_many",
            IndexEvent::Replaced(_) => "replaced",
            IndexEvent::Reset => "reset",
        }
    }
}

/// Subscriber of an index.
pub type IndexHandler<R> = dyn Fn(&IndexEvent<'_, R>) + Send + Sync;

/// Boxes a closure as an [`IndexHandler`].
pub fn index_handler<R, F>(handler: F) -> Arc<IndexHandler<R>>
where
    F: Fn(&IndexEvent<'_, R>) + Send + Sync + 'static,
{
    Arc::new(handler)
}

impl<R> Observers<IndexHandler<R>> {
    /// Runs every handler in subscription order.
    pub fn notify(&self, event: &IndexEvent<'_, R>) {
        let handlers = self.snapshot();
        if handlers.is_empty() {
            return;
        }
        Logger::trace("INDEX_NOTIFY", &[("event", event.name())]);
        for handler in handlers {
            (*handler)(event);
        }
    }
}
