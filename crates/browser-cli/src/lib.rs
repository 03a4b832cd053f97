//! # Browser CLI
//!
//! Entry points for the module browser:
//!
//! - `browser serve`: runs the repository watcher, the module downloader,
//!   the credential broker and the credential responder on one bus
//! - `browser check-config`: validates configuration and exits
//! - `browser-askpass <PROMPT>`: the git credential helper the downloader's
//!   `go` processes call back into
//!
//! Configuration layering is described in [`config`].

use std::path::Path;

use browser_core::Bus;
use clap::Parser;
use tracing::info;

pub mod cli;
pub mod config;
pub mod download;
pub mod errors;
pub mod helper;
pub mod logging;
pub mod service;

pub use cli::{AskpassCli, Cli, Commands};
pub use config::BrowserConfig;
pub use errors::{CliError, ConfigError, HelperError, ServiceError};
pub use service::Service;

// ============================================================================
// Main Entry Points
// ============================================================================

/// Entry point of the `browser` binary.
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve => execute_serve(cli.config.as_deref()).await,
        Commands::CheckConfig => execute_check_config(cli.config.as_deref()),
    }
}

/// Entry point of the `browser-askpass` binary. Returns the value to print.
pub async fn run_askpass() -> Result<String, CliError> {
    let cli = AskpassCli::parse();

    // Quiet by default: git shows stderr to whoever is watching the fetch.
    logging::init_logging(&config::LoggingConfig {
        level: "warn".to_string(),
        json: false,
    })?;

    Ok(helper::run_helper(&cli.prompt).await?)
}

fn load(path: Option<&Path>) -> Result<BrowserConfig, ConfigError> {
    let config = BrowserConfig::load(path)?;
    config.validate()?;
    Ok(config)
}

async fn execute_serve(path: Option<&Path>) -> Result<(), CliError> {
    let config = load(path)?;
    logging::init_logging(&config.logging)?;
    let credential = config.github.credential()?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting module browser");

    let service = Service::start(&config, credential, Bus::new()).await?;
    let shutdown = service.shutdown_token();
    tokio::spawn(async move {
        service::shutdown_signal().await;
        shutdown.cancel();
    });

    service.wait().await?;
    Ok(())
}

fn execute_check_config(path: Option<&Path>) -> Result<(), CliError> {
    let config = load(path)?;
    let credential = config.github.credential()?;

    println!("Configuration OK");
    println!("  client id:        {}", credential.client_id().as_str());
    println!("  served host:      {}", credential.served_host());
    println!("  downloaders:      {}", config.workers.downloader);
    println!("  broker address:   {}", config.askpass.listen_address);
    println!("  broker timeout:   {}s", config.askpass.timeout_seconds);
    println!("  go binary:        {}", config.download.go_binary.display());
    Ok(())
}
