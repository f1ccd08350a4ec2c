//! CLI module for tabledb
//!
//! Provides command-line interface for:
//! - inspect: Dump a table file header
//! - check: Validate a configuration and inspect its tables

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{check, inspect, run, run_command};
pub use errors::{CliError, CliResult};
pub use io::write_json;
