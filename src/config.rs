//! Store configuration
//!
//! ```json
//! {
//!   "data_dir": "/var/lib/app/tables",
//!   "cache_capacity": 8,
//!   "auto_flush": false,
//!   "log_level": "info",
//!   "open_mode": "open_or_create"
//! }
//! ```
//!
//! Only `data_dir` is required.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::access::DEFAULT_CAPACITY;
use crate::error::{TableError, TableResult};
use crate::observability::{log_event_with_fields, Event, Logger, Severity};
use crate::storage::{LayoutKind, OpenMode};

/// Configuration of a directory of tables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding the table files (required)
    pub data_dir: PathBuf,

    /// Cached providers and indexes per access path (0 means the default, 8)
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Flush after every mutation
    #[serde(default)]
    pub auto_flush: bool,

    /// Minimum severity logged: trace, info, warn, error or fatal
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// How table files are opened
    #[serde(default)]
    pub open_mode: OpenMode,
}

fn default_cache_capacity() -> usize {
    DEFAULT_CAPACITY
}

fn default_log_level() -> String {
    "info".to_string()
}

impl StoreConfig {
    /// Configuration with every default, rooted at `data_dir`
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            cache_capacity: DEFAULT_CAPACITY,
            auto_flush: false,
            log_level: default_log_level(),
            open_mode: OpenMode::default(),
        }
    }

    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> TableResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            TableError::config(format!("failed to read config {}: {}", path.display(), e))
        })?;

        let mut config: StoreConfig = serde_json::from_str(&content)
            .map_err(|e| TableError::config(format!("invalid config JSON: {}", e)))?;

        config.validate()?;
        if config.cache_capacity == 0 {
            config.cache_capacity = DEFAULT_CAPACITY;
        }

        let path = path.display().to_string();
        log_event_with_fields(Event::ConfigLoaded, &[("path", &path)]);
        Ok(config)
    }

    /// Validate field values
    pub fn validate(&self) -> TableResult<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(TableError::config("data_dir must not be empty"));
        }

        if self.severity().is_none() {
            return Err(TableError::config(format!(
                "invalid log_level: '{}'. Expected trace, info, warn, error or fatal.",
                self.log_level
            )));
        }

        Ok(())
    }

    /// Effective access-path capacity
    pub fn capacity(&self) -> usize {
        if self.cache_capacity == 0 {
            DEFAULT_CAPACITY
        } else {
            self.cache_capacity
        }
    }

    /// `<data_dir>/table_<id>.<ext>`
    pub fn table_path(&self, table_id: u32, layout: LayoutKind) -> PathBuf {
        self.data_dir
            .join(format!("table_{}.{}", table_id, layout.extension()))
    }

    /// Sets the process-wide log threshold from `log_level`.
    pub fn apply_logging(&self) -> TableResult<()> {
        let severity = self.severity().ok_or_else(|| {
            TableError::config(format!("invalid log_level: '{}'", self.log_level))
        })?;
        Logger::set_min_severity(severity);
        Ok(())
    }

    fn severity(&self) -> Option<Severity> {
        Severity::parse(&self.log_level)
    }
}
