//! Layered service configuration.
//!
//! Sources are applied in order, later ones overriding earlier ones:
//!
//! 1. `/etc/browser/config.yaml`: system-wide defaults
//! 2. `./config/browser.yaml`: deployment-local override
//! 3. the file named by `--config` or `BROWSER_CONFIG_FILE`
//! 4. environment variables prefixed `BROWSER__`, with `__` between path
//!    segments, e.g. `BROWSER__WORKERS__DOWNLOADER=4`
//!
//! Every field carries a default except the GitHub App credentials, so an
//! otherwise empty environment only needs `github.client_id` and one of
//! `github.private_key` / `github.private_key_path`.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use browser_askpass::BrokerConfig;
use browser_core::dispatcher::default_workers;
use browser_github::auth::{AppCredential, ClientId, PrivateKey};
use browser_github::client::ClientConfig;
use serde::Deserialize;
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

use crate::errors::ConfigError;

/// Environment variable naming an explicit configuration file.
pub const CONFIG_FILE_ENV: &str = "BROWSER_CONFIG_FILE";

/// Prefix of configuration environment variables.
pub const ENV_PREFIX: &str = "BROWSER";

const SYSTEM_CONFIG: &str = "/etc/browser/config";
const LOCAL_CONFIG: &str = "config/browser";

/// Name of the credential helper executable.
pub const HELPER_BINARY: &str = "browser-askpass";

// ============================================================================
// Configuration Types
// ============================================================================

/// Complete service configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub github: GitHubSettings,
    pub workers: WorkerSettings,
    pub askpass: AskpassSettings,
    pub download: DownloadSettings,
    pub logging: LoggingConfig,
}

/// GitHub App identity.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct GitHubSettings {
    /// App client ID, used as the `iss` of application tokens.
    pub client_id: String,

    /// PEM-encoded private key.
    pub private_key: Option<String>,

    /// Path to a PEM-encoded private key.
    pub private_key_path: Option<PathBuf>,

    /// GitHub Enterprise API base URL, e.g. `https://ghe.example.com/api/v3/`.
    pub api_url: Option<Url>,
}

// Security: Don't expose key data in debug output
impl fmt::Debug for GitHubSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitHubSettings")
            .field("client_id", &self.client_id)
            .field(
                "private_key",
                &self.private_key.as_ref().map(|_| "<REDACTED>"),
            )
            .field("private_key_path", &self.private_key_path)
            .field("api_url", &self.api_url)
            .finish()
    }
}

impl GitHubSettings {
    /// Build the app credential, reading the key file if one is configured.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingRequired` if no key is configured and
    /// `ConfigError::Credentials` if the client ID or key is invalid.
    pub fn credential(&self) -> Result<AppCredential, ConfigError> {
        let client_id = ClientId::new(self.client_id.clone())?;
        let private_key = match (&self.private_key, &self.private_key_path) {
            (Some(pem), _) => PrivateKey::from_pem(pem)?,
            (None, Some(path)) => PrivateKey::from_file(path)?,
            (None, None) => {
                return Err(ConfigError::MissingRequired {
                    key: "github.private_key".to_string(),
                })
            }
        };
        Ok(AppCredential::new(client_id, private_key, self.api_url.clone()))
    }

    /// REST client settings for the configured GitHub instance.
    pub fn client_config(&self) -> ClientConfig {
        match &self.api_url {
            Some(url) => ClientConfig::default().with_api_url(url.clone()),
            None => ClientConfig::default(),
        }
    }
}

/// Worker pool sizes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Concurrent module downloads.
    pub downloader: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            downloader: default_workers(),
        }
    }
}

/// Credential broker and helper settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AskpassSettings {
    /// Broker listen address. Must be loopback.
    pub listen_address: SocketAddr,

    /// Seconds a helper request may wait for its credential.
    pub timeout_seconds: u64,

    /// Path to the `browser-askpass` executable. Defaults to the one
    /// installed next to the running binary.
    pub helper_path: Option<PathBuf>,
}

impl Default for AskpassSettings {
    fn default() -> Self {
        Self {
            listen_address: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
            timeout_seconds: 10,
            helper_path: None,
        }
    }
}

impl AskpassSettings {
    pub fn broker(&self) -> BrokerConfig {
        BrokerConfig {
            listen_address: self.listen_address,
            timeout_seconds: self.timeout_seconds,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// The configured helper path, or `browser-askpass` beside the current
    /// executable.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the current executable cannot be located.
    pub fn resolve_helper_path(&self) -> std::io::Result<PathBuf> {
        if let Some(path) = &self.helper_path {
            return Ok(path.clone());
        }
        let exe = std::env::current_exe()?;
        Ok(exe.with_file_name(format!("{HELPER_BINARY}{}", std::env::consts::EXE_SUFFIX)))
    }
}

/// Module download settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownloadSettings {
    /// The `go` toolchain binary.
    pub go_binary: PathBuf,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            go_binary: PathBuf::from("go"),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,

    /// Emit JSON lines instead of human-readable text.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ============================================================================
// Loading
// ============================================================================

impl BrowserConfig {
    /// Load configuration from the standard sources.
    ///
    /// A missing system or local file is skipped. A missing explicit file, a
    /// malformed file or an environment value of the wrong type is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_from(
            &[SYSTEM_CONFIG, LOCAL_CONFIG],
            explicit,
            config::Environment::with_prefix(ENV_PREFIX).separator("__"),
        )
    }

    pub(crate) fn load_from(
        defaults: &[&str],
        explicit: Option<&Path>,
        environment: config::Environment,
    ) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        for name in defaults {
            builder = builder.add_source(
                config::File::with_name(name)
                    .required(false)
                    .format(config::FileFormat::Yaml),
            );
        }

        if let Some(path) = explicit {
            info!(path = %path.display(), "Loading configuration from explicit path");
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config = builder.add_source(environment).build()?;
        Ok(config.try_deserialize()?)
    }

    /// Check the configuration for values the service cannot run with.
    ///
    /// The private key itself is parsed later, by [`GitHubSettings::credential`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.github.client_id.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "github.client_id".to_string(),
            });
        }

        match (&self.github.private_key, &self.github.private_key_path) {
            (None, None) => {
                return Err(ConfigError::MissingRequired {
                    key: "github.private_key".to_string(),
                })
            }
            (Some(_), Some(_)) => {
                return Err(ConfigError::Invalid {
                    key: "github.private_key".to_string(),
                    message: "set either private_key or private_key_path, not both".to_string(),
                })
            }
            _ => {}
        }

        if self.workers.downloader == 0 {
            return Err(ConfigError::Invalid {
                key: "workers.downloader".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        self.askpass
            .broker()
            .validate()
            .map_err(|e| ConfigError::Invalid {
                key: "askpass.listen_address".to_string(),
                message: e.to_string(),
            })?;

        if self.askpass.timeout_seconds == 0 {
            return Err(ConfigError::Invalid {
                key: "askpass.timeout_seconds".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if self.download.go_binary.as_os_str().is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "download.go_binary".to_string(),
            });
        }

        EnvFilter::try_new(&self.logging.level).map_err(|e| ConfigError::Invalid {
            key: "logging.level".to_string(),
            message: e.to_string(),
        })?;

        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
