//! Error types for the command-line entry points.

use browser_askpass::AskpassClientError;
use browser_core::{BusError, DispatchError};
use browser_github::{ApiError, SigningError, ValidationError, WatchError};
use thiserror::Error;

/// Top-level failure of a CLI command.
///
/// Each variant maps onto a distinct process exit code, see
/// [`CliError::exit_code`].
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Askpass error: {0}")]
    Askpass(#[from] HelperError),
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 1,
            Self::Service(_) => 2,
            Self::Askpass(_) => 3,
        }
    }
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unable to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Missing required configuration: {key}")]
    MissingRequired { key: String },

    #[error("Invalid configuration for {key}: {message}")]
    Invalid { key: String, message: String },

    #[error("Invalid credentials: {0}")]
    Credentials(#[from] ValidationError),

    #[error("Unable to initialize logging: {message}")]
    Logging { message: String },
}

/// Failures while starting or running the service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Invalid signing key: {0}")]
    Signing(#[from] SigningError),

    #[error("Unable to create GitHub client: {0}")]
    Api(#[from] ApiError),

    #[error("Credential broker failed: {0}")]
    Broker(#[from] browser_askpass::ServiceError),

    #[error("Repository watcher failed: {0}")]
    Watch(#[from] WatchError),

    #[error("Module downloader failed: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Message bus failed: {0}")]
    Bus(#[from] BusError),

    #[error("Unable to locate the askpass helper: {message}")]
    HelperNotFound { message: String },

    #[error("Component '{component}' stopped unexpectedly: {message}")]
    ComponentFailed { component: String, message: String },
}

/// Failures of the `browser-askpass` credential helper.
#[derive(Debug, Error)]
pub enum HelperError {
    #[error("Unexpected prompt: {prompt}")]
    UnexpectedPrompt { prompt: String },

    #[error("Unable to determine the repository URL")]
    NoRepositoryUrl,

    #[error("{0}")]
    Client(#[from] AskpassClientError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let config = CliError::from(ConfigError::MissingRequired {
            key: "github.client_id".to_string(),
        });
        let service = CliError::from(ServiceError::HelperNotFound {
            message: "missing".to_string(),
        });
        let askpass = CliError::from(HelperError::NoRepositoryUrl);

        assert_eq!(config.exit_code(), 1);
        assert_eq!(service.exit_code(), 2);
        assert_eq!(askpass.exit_code(), 3);
    }

    #[test]
    fn test_messages_name_the_key() {
        let err = ConfigError::Invalid {
            key: "workers.downloader".to_string(),
            message: "must be at least 1".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid configuration for workers.downloader: must be at least 1"
        );
    }
}
