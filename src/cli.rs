//! Command-line interface definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "lucy", version, about = "A multi-tenant AI coworker for team chat")]
pub struct Cli {
    /// Path to the configuration file (default: ./lucy.toml or LUCY_CONFIG)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the service (default)
    Run,
    /// Load the configuration, report what resolved, and exit
    CheckConfig,
    /// Validate a cron expression and estimate its daily fire count
    ValidateCron {
        /// Five-field cron expression, e.g. "*/30 8-22 * * *"
        expression: String,
    },
}
