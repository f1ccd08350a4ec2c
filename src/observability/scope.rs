//! ObservationScope for begin/complete logging around long operations
//!
//! Used for the full scans: table load, index build, view build.
//!
//! - `{name}_BEGIN` on creation (TRACE)
//! - `{name}_COMPLETE` with `elapsed_ms` on [`ObservationScope::complete`] (INFO)
//! - `{name}_FAILED` on [`ObservationScope::fail`] (ERROR)
//! - `{name}_INCOMPLETE` on drop otherwise (WARN), e.g. unwinding from a panic

use std::time::Instant;

use super::logger::Logger;

pub struct ObservationScope<'a> {
    name: &'a str,
    completed: bool,
    fields: Vec<(&'a str, String)>,
    started: Instant,
}

impl<'a> ObservationScope<'a> {
    pub fn new(name: &'a str) -> Self {
        Self::with_fields(name, &[])
    }

    /// Fields are repeated on every line of the scope.
    pub fn with_fields(name: &'a str, fields: &[(&'a str, &str)]) -> Self {
        Logger::trace(&format!("{}_BEGIN", name), fields);

        Self {
            name,
            completed: false,
            fields: fields.iter().map(|(k, v)| (*k, v.to_string())).collect(),
            started: Instant::now(),
        }
    }

    pub fn complete(self) {
        self.complete_with_fields(&[]);
    }

    pub fn complete_with_fields(mut self, extra_fields: &[(&str, &str)]) {
        self.completed = true;
        let elapsed = self.elapsed_ms();

        let mut all: Vec<(&str, &str)> = self.fields.iter().map(|(k, v)| (*k, v.as_str())).collect();
        all.extend(extra_fields.iter().copied());
        all.push(("elapsed_ms", elapsed.as_str()));

        Logger::info(&format!("{}_COMPLETE", self.name), &all);
    }

    pub fn fail(mut self, reason: &str) {
        self.completed = true;

        let mut all: Vec<(&str, &str)> = self.fields.iter().map(|(k, v)| (*k, v.as_str())).collect();
        all.push(("reason", reason));

        Logger::error(&format!("{}_FAILED", self.name), &all);
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    fn elapsed_ms(&self) -> String {
        self.started.elapsed().as_millis().to_string()
    }
}

impl Drop for ObservationScope<'_> {
    fn drop(&mut self) {
        if !self.completed {
            Logger::warn(
                &format!("{}_INCOMPLETE", self.name),
                &[("reason", "scope dropped without completion")],
            );
        }
    }
}
