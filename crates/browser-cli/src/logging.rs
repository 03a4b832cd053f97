//! Process-wide `tracing` subscriber setup.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;
use crate::errors::ConfigError;

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over `logging.level`. Output goes to stderr
/// so the credential helper's stdout carries nothing but the credential.
///
/// # Errors
///
/// Returns `ConfigError::Logging` if the filter is invalid or a subscriber
/// is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), ConfigError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| ConfigError::Logging {
            message: e.to_string(),
        })?,
    };

    let json = config.json.then(|| {
        fmt::layer()
            .json()
            .with_current_span(false)
            .with_writer(std::io::stderr)
    });
    let text = (!config.json).then(|| fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(text)
        .try_init()
        .map_err(|e| ConfigError::Logging {
            message: e.to_string(),
        })
}
