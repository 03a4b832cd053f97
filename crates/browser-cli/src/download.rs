//! Go module downloader stage.
//!
//! Consumes [`ModuleDiscovered`] through a [`Dispatcher`](browser_core::Dispatcher),
//! fetches each module into the local Go module cache and publishes
//! [`ModuleDownloaded`]. The `go` processes it spawns authenticate to the
//! served GitHub instance through the `browser-askpass` helper.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use browser_askpass::ASKPASS_ADDR_ENV;
use browser_core::bus::{Bus, Outbox, TypedInbox};
use browser_core::dispatcher::{TaskHandler, WorkerId};
use browser_core::messages::{ModuleDiscovered, ModuleDownloaded};
use serde::Deserialize;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

// ============================================================================
// Environment
// ============================================================================

/// Variables injected into every `go` process so that git fetches
/// authenticate through the credential broker and never prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadEnvironment {
    vars: Vec<(String, String)>,
}

impl DownloadEnvironment {
    pub fn new(helper: &Path, broker: SocketAddr, served_host: &str) -> Self {
        let vars = [
            ("GIT_ASKPASS", helper.to_string_lossy().into_owned()),
            (ASKPASS_ADDR_ENV, broker.to_string()),
            ("GIT_TERMINAL_PROMPT", "0".to_string()),
            ("GIT_CONFIG_GLOBAL", String::new()),
            ("GIT_CONFIG_SYSTEM", String::new()),
            ("GOPRIVATE", served_host.to_string()),
        ];

        Self {
            vars: vars
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
        }
    }

    pub fn vars(&self) -> &[(String, String)] {
        &self.vars
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Failures of a single module download.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// The toolchain could not be started at all.
    #[error("Unable to run {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    /// `go` reported a failure for this module.
    #[error("Unable to download {module}: {message}")]
    Failed { module: String, message: String },

    /// `go` succeeded but its output could not be understood.
    #[error("Unable to parse go output for {module}: {message}")]
    Output { module: String, message: String },
}

impl DownloadError {
    /// Returns true if the failure affects every module, not just this one.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Spawn { .. })
    }
}

/// The subset of `go mod download -json` / `go list -m -json` output we use.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct GoModule {
    dir: String,
    version: String,
    /// A string for `go mod download`, an `{"Err": ...}` object for `go list`.
    error: Option<serde_json::Value>,
}

impl GoModule {
    fn error_message(&self) -> Option<String> {
        match self.error.as_ref()? {
            serde_json::Value::String(message) => Some(message.clone()),
            serde_json::Value::Object(object) => object
                .get("Err")
                .and_then(|err| err.as_str())
                .map(str::to_string),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

// ============================================================================
// Downloader
// ============================================================================

/// Dispatcher handler that downloads one module per task.
pub struct Downloader {
    outbox: Outbox,
    go_binary: PathBuf,
    environment: DownloadEnvironment,
    work_dir: PathBuf,
}

impl Downloader {
    /// Join the bus and subscribe to [`ModuleDiscovered`]. Must be called
    /// before anything is published.
    pub fn join(
        bus: &Bus,
        go_binary: PathBuf,
        environment: DownloadEnvironment,
    ) -> (Self, TypedInbox<ModuleDiscovered>) {
        let mut participant = bus.participant("module-downloader");
        participant.subscribe::<ModuleDiscovered>();
        let outbox = participant.outbox();
        let inbox = participant.ready().typed();

        let downloader = Self {
            outbox,
            go_binary,
            environment,
            work_dir: std::env::temp_dir(),
        };
        (downloader, inbox)
    }

    /// Run `go` from `dir` instead of the system temporary directory.
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    /// Fetch one module. Returns `None` if cancelled first.
    ///
    /// A module already present in the module cache is not downloaded again.
    pub async fn download(
        &self,
        cancel: &CancellationToken,
        module: &ModuleDiscovered,
    ) -> Result<Option<ModuleDownloaded>, DownloadError> {
        let query = format!("{}@{}", module.module_path, module.module_version);

        let Some(listed) = self
            .go(cancel, &query, &["list", "-m", "-json", &query])
            .await?
        else {
            return Ok(None);
        };

        let (found, cached) = if listed.dir.is_empty() {
            match self
                .go(cancel, &query, &["mod", "download", "-json", &query])
                .await?
            {
                Some(downloaded) => (downloaded, false),
                None => return Ok(None),
            }
        } else {
            (listed, true)
        };

        if found.dir.is_empty() {
            return Err(DownloadError::Output {
                module: query,
                message: "no module directory reported".to_string(),
            });
        }

        debug!(module = %query, dir = %found.dir, cached, "Module available locally");

        let module_version = if found.version.is_empty() {
            module.module_version.clone()
        } else {
            found.version
        };

        Ok(Some(ModuleDownloaded {
            repo_source: module.repo_source.clone(),
            repo_id: module.repo_id,
            module_path: module.module_path.clone(),
            module_version,
            module_dir: PathBuf::from(found.dir),
        }))
    }

    async fn go(
        &self,
        cancel: &CancellationToken,
        module: &str,
        args: &[&str],
    ) -> Result<Option<GoModule>, DownloadError> {
        let mut command = Command::new(&self.go_binary);
        command
            .args(args)
            .current_dir(&self.work_dir)
            .envs(self.environment.vars().iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::select! {
            _ = cancel.cancelled() => return Ok(None),
            output = command.output() => output.map_err(|source| DownloadError::Spawn {
                binary: self.go_binary.display().to_string(),
                source,
            })?,
        };

        let parsed = serde_json::from_slice::<GoModule>(&output.stdout);

        if let Some(message) = parsed.as_ref().ok().and_then(GoModule::error_message) {
            return Err(DownloadError::Failed {
                module: module.to_string(),
                message,
            });
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(DownloadError::Failed {
                module: module.to_string(),
                message: if stderr.is_empty() {
                    output.status.to_string()
                } else {
                    stderr
                },
            });
        }

        parsed.map(Some).map_err(|e| DownloadError::Output {
            module: module.to_string(),
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl TaskHandler<ModuleDiscovered> for Downloader {
    /// Download failures of a single module are logged and skipped. A
    /// toolchain that cannot be started, or a closed bus, stops the stage.
    async fn handle(
        &self,
        cancel: &CancellationToken,
        worker: WorkerId,
        module: ModuleDiscovered,
    ) -> anyhow::Result<()> {
        let started = Instant::now();

        match self.download(cancel, &module).await {
            Ok(Some(downloaded)) => {
                info!(
                    worker = %worker,
                    module_path = %downloaded.module_path,
                    module_version = %downloaded.module_version,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Module downloaded"
                );
                self.outbox.publish(downloaded).await?;
                Ok(())
            }
            Ok(None) => {
                debug!(worker = %worker, module_path = %module.module_path, "Download cancelled");
                Ok(())
            }
            Err(e) if e.is_fatal() => Err(e.into()),
            Err(e) => {
                error!(
                    worker = %worker,
                    module_path = %module.module_path,
                    module_version = %module.module_version,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    error = %e,
                    "Module download failed"
                );
                Ok(())
            }
        }
    }
}

#[cfg(all(test, unix))]
#[path = "download_tests.rs"]
mod tests;
