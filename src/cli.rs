//! CLI argument parsing for tracerelay

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Output format for scenario reports
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format (default)
    Text,
    /// JSON format for machine parsing
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "tracerelay")]
#[command(version)]
#[command(about = "Replay trace-callback relay scenarios against a simulated runtime", long_about = None)]
pub struct Cli {
    /// Enable debug tracing output to stderr
    #[arg(long = "debug", global = true)]
    pub debug: bool,

    /// Relay configuration file (TOML)
    #[arg(long = "config", value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Replay a JSON scenario and print the resulting state
    Run {
        /// Scenario file (JSON)
        scenario: PathBuf,

        /// Output format (text or json)
        #[arg(long = "format", value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Report whether profiling would be switched on for this environment
    Activation {
        /// Command line to check for activation flags
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}
