//! CLI parse: clap types for Jobwatch. No behavior; definitions only.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Jobwatch CLI - track batch indexing jobs and model downloads
#[derive(Parser)]
#[command(name = "jobwatch")]
#[command(about = "Submit backend jobs and follow them to completion")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root directory (where config/config.toml is looked up)
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,

    /// Configuration file path (overrides default config loading)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long, default_value = "false")]
    pub verbose: bool,

    /// Disable logging entirely
    #[arg(long, short, default_value = "false")]
    pub quiet: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (if output is "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Submit files for processing and indexing, then poll the job to completion
    Build {
        /// Paths of the files to process, as the backend sees them
        #[arg(required = true)]
        paths: Vec<String>,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// List the model catalog with download and activation status
    Models {
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Download a model and follow its progress
    Download {
        model: String,
        /// Poll for progress instead of subscribing to the event stream
        #[arg(long)]
        poll: bool,
    },
    /// Make a downloaded model the active one
    Activate { model: String },
    /// Print the effective configuration as TOML
    Config,
}
