//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};

/// Live monitor arguments.
#[derive(Debug, Args)]
pub struct RunCommand {
    /// Student directory fixture (overrides `directory.fixture_path`)
    #[arg(short, long, value_name = "FILE")]
    pub directory: Option<PathBuf>,
}

/// Replay command arguments.
#[derive(Debug, Args)]
pub struct ReplayCommand {
    /// JSON-lines recording of call events
    pub file: PathBuf,

    /// Student directory fixture (overrides `directory.fixture_path`)
    #[arg(short, long, value_name = "FILE")]
    pub directory: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

/// Normalize command arguments.
#[derive(Debug, Args)]
pub struct NormalizeCommand {
    /// Phone numbers to normalize
    #[arg(required = true)]
    pub numbers: Vec<String>,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

/// Output format for commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Formatted table
    #[default]
    Table,
    /// JSON output
    Json,
}
