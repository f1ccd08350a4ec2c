//! CLI command implementations
//!
//! Commands only read table headers: record payloads need a record type the
//! binary does not have.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::StoreConfig;
use crate::storage::{inspect as inspect_header, HeaderReport, LayoutKind};

use super::args::Command;
use super::errors::{CliError, CliResult};
use super::io::write_json;

/// Parse arguments and run the selected command
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Inspect { file } => inspect(&file),
        Command::Check { config } => check(&config),
    }
}

/// Print the header of one table file
pub fn inspect(file: &Path) -> CliResult<()> {
    let report = inspect_header(file)?;
    write_json(&report)
}

#[derive(Debug, Serialize)]
struct TableCheck {
    file: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    header: Option<HeaderReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<CheckFailure>,
}

#[derive(Debug, Serialize)]
struct CheckFailure {
    code: &'static str,
    message: String,
}

#[derive(Debug, Serialize)]
struct CheckReport {
    data_dir: PathBuf,
    tables: Vec<TableCheck>,
}

impl CheckReport {
    fn failures(&self) -> usize {
        self.tables.iter().filter(|t| t.error.is_some()).count()
    }
}

/// Validate a configuration and inspect every table file under its data directory
pub fn check(config_path: &Path) -> CliResult<()> {
    let config = StoreConfig::load(config_path)?;
    config.apply_logging()?;

    let report = check_tables(&config)?;
    write_json(&report)?;

    match report.failures() {
        0 => Ok(()),
        n => Err(CliError::CheckFailed(n)),
    }
}

fn check_tables(config: &StoreConfig) -> CliResult<CheckReport> {
    if !config.data_dir.is_dir() {
        return Err(CliError::Config(format!(
            "data_dir {} is not a directory",
            config.data_dir.display()
        )));
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(&config.data_dir)? {
        let path = entry?.path();
        if is_table_file(&path) {
            files.push(path);
        }
    }
    files.sort();

    let tables = files
        .into_iter()
        .map(|file| match inspect_header(&file) {
            Ok(header) => TableCheck {
                file,
                header: Some(header),
                error: None,
            },
            Err(e) => TableCheck {
                file,
                header: None,
                error: Some(CheckFailure {
                    code: e.code().code(),
                    message: e.message().to_string(),
                }),
            },
        })
        .collect();

    Ok(CheckReport {
        data_dir: config.data_dir.clone(),
        tables,
    })
}

fn is_table_file(path: &Path) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    path.is_file()
        && [LayoutKind::Slotted, LayoutKind::Tombstoned]
            .iter()
            .any(|kind| kind.extension() == ext)
}
