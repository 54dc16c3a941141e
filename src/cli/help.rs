//! CLI help: stable command names for logging.

use crate::cli::parse::Commands;

/// Command name string for log fields (e.g. "build", "download").
pub fn command_name(command: &Commands) -> &'static str {
    match command {
        Commands::Build { .. } => "build",
        Commands::Models { .. } => "models",
        Commands::Download { .. } => "download",
        Commands::Activate { .. } => "activate",
        Commands::Config => "config",
    }
}
