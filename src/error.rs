//! Error types for tabledb
//!
//! Error codes:
//! - TABLEDB_IO_ERROR (ERROR severity)
//! - TABLEDB_CORRUPTED_SOURCE (FATAL severity)
//! - TABLEDB_CONFIG_ERROR (ERROR severity)
//! - TABLEDB_UNKNOWN_SOURCE (ERROR severity)
//! - TABLEDB_DUPLICATE_KEY (ERROR severity)
//!
//! Precondition failures (position out of range, operating on a disconnected
//! structure) are not errors: they panic.

use std::fmt;
use std::io;
use std::path::Path;

/// Severity levels for table errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Operation fails, the caller may retry or recreate the file
    Error,
    /// The source cannot be trusted any more
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Stable error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableErrorCode {
    /// Disk I/O failure on an already validated file
    IoError,
    /// Missing file, signature mismatch or truncated/invalid data
    CorruptedSource,
    /// Invalid configuration
    ConfigError,
    /// The catalog has no table with the requested identifier
    UnknownSource,
    /// Two records of one source share an identifier
    DuplicateKey,
}

impl TableErrorCode {
    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            TableErrorCode::IoError => "TABLEDB_IO_ERROR",
            TableErrorCode::CorruptedSource => "TABLEDB_CORRUPTED_SOURCE",
            TableErrorCode::ConfigError => "TABLEDB_CONFIG_ERROR",
            TableErrorCode::UnknownSource => "TABLEDB_UNKNOWN_SOURCE",
            TableErrorCode::DuplicateKey => "TABLEDB_DUPLICATE_KEY",
        }
    }

    /// Returns the severity level for this error
    pub fn severity(&self) -> Severity {
        match self {
            TableErrorCode::CorruptedSource => Severity::Fatal,
            TableErrorCode::IoError
            | TableErrorCode::ConfigError
            | TableErrorCode::UnknownSource
            | TableErrorCode::DuplicateKey => Severity::Error,
        }
    }
}

impl fmt::Display for TableErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Error type with full context
#[derive(Debug)]
pub struct TableError {
    code: TableErrorCode,
    message: String,
    details: Option<String>,
    source: Option<io::Error>,
}

impl TableError {
    /// Create an I/O error on a table that was opened successfully
    pub fn io_error(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            code: TableErrorCode::IoError,
            message: message.into(),
            details: None,
            source: Some(source),
        }
    }

    /// Create a corrupted-source error naming the offending file
    pub fn corrupted(path: &Path, message: impl Into<String>, source: Option<io::Error>) -> Self {
        Self {
            code: TableErrorCode::CorruptedSource,
            message: message.into(),
            details: Some(format!("path: {}", path.display())),
            source,
        }
    }

    /// Create a corrupted-source error with byte offset context
    pub fn corrupted_at(path: &Path, offset: u64, reason: impl Into<String>) -> Self {
        Self {
            code: TableErrorCode::CorruptedSource,
            message: reason.into(),
            details: Some(format!("path: {}, byte_offset: {}", path.display(), offset)),
            source: None,
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self {
            code: TableErrorCode::ConfigError,
            message: message.into(),
            details: None,
            source: None,
        }
    }

    /// The catalog does not know the table
    pub fn unknown_source(table_id: u32) -> Self {
        Self {
            code: TableErrorCode::UnknownSource,
            message: "no such table".to_string(),
            details: Some(format!("table_id: {}", table_id)),
            source: None,
        }
    }

    /// Two positions of a scanned source carry the same record id
    pub fn duplicate_key(id: u32, first: usize, second: usize) -> Self {
        Self {
            code: TableErrorCode::DuplicateKey,
            message: format!("record id {} is not unique", id),
            details: Some(format!("positions: {}, {}", first, second)),
            source: None,
        }
    }

    /// Returns the error code
    pub fn code(&self) -> TableErrorCode {
        self.code
    }

    /// Returns the severity level
    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    /// Returns the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns additional error details
    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    /// Returns whether the source should be considered lost
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    /// Returns whether this is a corrupted-source fault
    pub fn is_corrupted(&self) -> bool {
        self.code == TableErrorCode::CorruptedSource
    }
}

impl fmt::Display for TableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.code.severity(),
            self.code.code(),
            self.message
        )?;
        if let Some(ref details) = self.details {
            write!(f, " ({})", details)?;
        }
        if let Some(ref source) = self.source {
            write!(f, " caused by: {}", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for TableError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Result type for table, provider and index operations
pub type TableResult<T> = Result<T, TableError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_error_codes() {
        assert_eq!(TableErrorCode::IoError.code(), "TABLEDB_IO_ERROR");
        assert_eq!(TableErrorCode::CorruptedSource.code(), "TABLEDB_CORRUPTED_SOURCE");
        assert_eq!(TableErrorCode::ConfigError.code(), "TABLEDB_CONFIG_ERROR");
        assert_eq!(TableErrorCode::UnknownSource.code(), "TABLEDB_UNKNOWN_SOURCE");
        assert_eq!(TableErrorCode::DuplicateKey.code(), "TABLEDB_DUPLICATE_KEY");
    }

    #[test]
    fn test_duplicate_key_details() {
        let err = TableError::duplicate_key(9, 1, 4);
        assert!(!err.is_fatal());
        assert_eq!(err.details(), Some("positions: 1, 4"));
    }

    #[test]
    fn test_corruption_is_fatal() {
        let err = TableError::corrupted(&PathBuf::from("/tmp/t.frt"), "bad signature", None);
        assert!(err.is_fatal());
        assert!(err.is_corrupted());
    }

    #[test]
    fn test_io_error_not_fatal() {
        let err = TableError::io_error("write failed", io::Error::new(io::ErrorKind::Other, "disk full"));
        assert!(!err.is_fatal());
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_display_names_path_and_offset() {
        let err = TableError::corrupted_at(&PathBuf::from("/data/t.fzt"), 64, "bad tag");
        let display = err.to_string();
        assert!(display.contains("FATAL"));
        assert!(display.contains("TABLEDB_CORRUPTED_SOURCE"));
        assert!(display.contains("/data/t.fzt"));
        assert!(display.contains("byte_offset: 64"));
    }

    #[test]
    fn test_display_includes_cause() {
        let err = TableError::corrupted(
            &PathBuf::from("t.frt"),
            "truncated header",
            Some(io::Error::new(io::ErrorKind::UnexpectedEof, "eof")),
        );
        assert!(err.to_string().contains("caused by: eof"));
    }
}
