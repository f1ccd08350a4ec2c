//! CLI argument definitions using clap
//!
//! Commands:
//! - tabledb inspect <file>
//! - tabledb check --config <path>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// tabledb - embedded fixed-layout record tables
#[derive(Parser, Debug)]
#[command(name = "tabledb")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the header of a table file as JSON
    Inspect {
        /// Path to a .frt or .fzt table file
        file: PathBuf,
    },

    /// Validate a configuration and inspect every table under its data directory
    Check {
        /// Path to configuration file
        #[arg(long, default_value = "./tabledb.json")]
        config: PathBuf,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
