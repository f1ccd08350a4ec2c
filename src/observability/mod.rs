//! Observability for tabledb
//!
//! - Structured logging (one JSON object per line, stderr)
//! - Typed lifecycle events
//! - Begin/complete scopes around full scans
//!
//! Observability is read-only: a failure to log never fails an operation,
//! and nothing here spawns threads or buffers.
//!
//! ```ignore
//! use tabledb::observability::{log_event_with_fields, Event, ObservationScope};
//!
//! log_event_with_fields(Event::TableOpened, &[("path", "/data/table_1.frt")]);
//!
//! let scope = ObservationScope::new("INDEX_BUILD");
//! // ... scan ...
//! scope.complete();
//! ```

mod events;
mod logger;
mod scope;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use scope::ObservationScope;

/// Log a lifecycle event at its own severity
pub fn log_event(event: Event) {
    Logger::log(event.severity(), event.as_str(), &[]);
}

/// Log a lifecycle event with fields
pub fn log_event_with_fields(event: Event, fields: &[(&str, &str)]) {
    Logger::log(event.severity(), event.as_str(), fields);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_event() {
        log_event(Event::ConfigLoaded);
        log_event_with_fields(Event::TableOpened, &[("path", "/tmp/t.frt")]);
    }
}
