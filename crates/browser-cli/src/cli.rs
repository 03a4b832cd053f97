//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

// ============================================================================
// CLI Structure
// ============================================================================

/// Module browser - discovers and downloads Go modules visible to a GitHub App
#[derive(Debug, Parser)]
#[command(name = "browser")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Discovers and downloads Go modules visible to a GitHub App")]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "BROWSER_CONFIG_FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Commands {
    /// Run the service until interrupted
    Serve,

    /// Load and validate the configuration, then exit
    CheckConfig,
}

/// git credential helper, invoked through `GIT_ASKPASS`
#[derive(Debug, Parser)]
#[command(name = "browser-askpass")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "git credential helper backed by the module browser")]
pub struct AskpassCli {
    /// The prompt git wants answered, e.g. "Username for 'https://github.com': "
    #[arg(allow_hyphen_values = true)]
    pub prompt: String,
}
