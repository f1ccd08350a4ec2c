//! tabledb - embedded fixed-layout record tables with maintained indexes
//!
//! Records live in single-file tables addressed by dense logical position.
//! Providers wrap tables and announce every mutation in two phases, which
//! key indexes, attribute indexes and filtered views use to stay current
//! without rescanning.
//!
//! ```text
//! AccessPath ──> KeyIndex ──┐
//!      │       AttributeIndex ──> RecordSource (TableProvider | FilteredSource)
//!      │                                   │
//!      └──────────────────────────> Table (DataTable<R, SlottedLayout | TombstonedLayout>)
//! ```

pub mod access;
pub mod cli;
pub mod codec;
pub mod config;
pub mod error;
pub mod index;
pub mod lifecycle;
pub mod observability;
pub mod position;
pub mod provider;
pub mod record;
pub mod storage;
pub mod sync;
