//! CLI-specific error types

use std::io;

use thiserror::Error;

use crate::error::TableError;

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;

/// CLI errors, all fatal to the process
#[derive(Debug, Error)]
pub enum CliError {
    #[error("TABLEDB_CLI_CONFIG_ERROR: {0}")]
    Config(String),

    #[error("TABLEDB_CLI_IO_ERROR: {0}")]
    Io(#[from] io::Error),

    #[error("TABLEDB_CLI_JSON_ERROR: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Table(#[from] TableError),

    #[error("TABLEDB_CLI_CHECK_FAILED: {0} table file(s) failed inspection")]
    CheckFailed(usize),
}

impl CliError {
    /// Stable error code string
    pub fn code_str(&self) -> &'static str {
        match self {
            Self::Config(_) => "TABLEDB_CLI_CONFIG_ERROR",
            Self::Io(_) => "TABLEDB_CLI_IO_ERROR",
            Self::Json(_) => "TABLEDB_CLI_JSON_ERROR",
            Self::Table(e) => e.code().code(),
            Self::CheckFailed(_) => "TABLEDB_CLI_CHECK_FAILED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TableErrorCode;

    #[test]
    fn test_table_errors_keep_their_code() {
        let err: CliError = TableError::unknown_source(4).into();
        assert_eq!(err.code_str(), TableErrorCode::UnknownSource.code());
    }

    #[test]
    fn test_display_carries_code() {
        let err = CliError::Config("data_dir is not a directory".into());
        assert_eq!(
            err.to_string(),
            "TABLEDB_CLI_CONFIG_ERROR: data_dir is not a directory"
        );
    }
}
