//! Table storage for tabledb
//!
//! A table is a single file: a fixed header followed by a data region whose
//! organisation is chosen by the [`Layout`]:
//!
//! - [`SlottedLayout`]: fixed-size frames, deleted frames chained in a free
//!   list and reused. Needs a [`FixedSizeRecord`](crate::record::FixedSizeRecord).
//! - [`TombstonedLayout`]: tagged records appended at the end, deleted ones
//!   only flagged. Accepts variable-size records.
//!
//! Both expose dense zero-based logical positions through the object-safe
//! [`Table`] contract implemented by [`DataTable`].
//!
//! # Invariants
//!
//! - Logical positions are always `[0, count)`; inserts and deletes renumber
//!   the positions after them
//! - The header on disk matches memory after every flush
//! - Any malformed byte found while opening is a corrupted-source fault

mod header;
mod layout;
mod slotted;
mod table;
mod tombstoned;

pub use header::{inspect, FileHeader, HeaderReport, SourceInfo, COMMON_HEADER_LEN};
pub use layout::{Layout, LayoutKind};
pub use slotted::SlottedLayout;
pub use table::{DataTable, OpenMode, Table};
pub use tombstoned::TombstonedLayout;

/// Table with fixed-size frames.
pub type SlottedTable<R> = DataTable<R, SlottedLayout<R>>;

/// Append-only table.
pub type TombstonedTable<R> = DataTable<R, TombstonedLayout<R>>;
