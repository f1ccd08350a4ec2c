//! Observable record sources
//!
//! A [`RecordSource`] is what indexes and adapters attach to. The root of
//! every stack is a [`TableProvider`], which turns table mutations into
//! [`SourceEvent`]s:
//!
//! ```text
//! KeyIndex / AttributeIndex / FilteredSource
//!            |  subscribe
//!      TableProvider  ---->  Table (file)
//! ```
//!
//! Lock order always runs outermost layer first, down to the table.

mod events;
mod source;
mod table_provider;

pub use events::{source_handler, Observers, SourceEvent, SourceHandler, SubscriptionId};
pub use source::{RecordAccess, RecordSource, Records};
pub use table_provider::TableProvider;
