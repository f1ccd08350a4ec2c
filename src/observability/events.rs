//! Observable lifecycle events
//!
//! Per-record mutations are not events here: they are delivered to
//! subscribers through the change-notification protocol instead.

use std::fmt;

use super::logger::Severity;

/// Observable events in tabledb
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Tables
    /// New table file written
    TableCreated,
    /// Existing table file validated and loaded
    TableOpened,
    /// Last connection released, file closed
    TableClosed,
    /// All records dropped
    TableCleared,
    /// Header persisted and file synced
    TableFlushed,
    /// Slotted free list walked on open
    FreeListRecovered,
    /// Signature, header or record data rejected (FATAL)
    CorruptionDetected,

    // Providers, indexes, views
    SourceConnected,
    SourceDisconnected,
    /// Full scan of a source completed
    IndexBuilt,
    /// Index dropped its entries and rebuilt from the source
    IndexInvalidated,

    // Access paths
    /// Least recently used entry disconnected and dropped
    CacheEvicted,
    /// Error swallowed while tearing down
    TeardownFault,
    ConfigLoaded,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::TableCreated => "TABLE_CREATED",
            Event::TableOpened => "TABLE_OPENED",
            Event::TableClosed => "TABLE_CLOSED",
            Event::TableCleared => "TABLE_CLEARED",
            Event::TableFlushed => "TABLE_FLUSHED",
            Event::FreeListRecovered => "FREE_LIST_RECOVERED",
            Event::CorruptionDetected => "CORRUPTION_DETECTED",
            Event::SourceConnected => "SOURCE_CONNECTED",
            Event::SourceDisconnected => "SOURCE_DISCONNECTED",
            Event::IndexBuilt => "INDEX_BUILT",
            Event::IndexInvalidated => "INDEX_INVALIDATED",
            Event::CacheEvicted => "CACHE_EVICTED",
            Event::TeardownFault => "TEARDOWN_FAULT",
            Event::ConfigLoaded => "CONFIG_LOADED",
        }
    }

    /// Severity this event is logged at.
    pub fn severity(&self) -> Severity {
        match self {
            Event::CorruptionDetected => Severity::Fatal,
            Event::TeardownFault => Severity::Error,
            Event::TableFlushed | Event::FreeListRecovered | Event::CacheEvicted => {
                Severity::Trace
            }
            _ => Severity::Info,
        }
    }

    /// Returns true if this event indicates a fatal condition
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
