//! Messages exchanged over the bus by pipeline components.
//!
//! Discovery flows as `RepoFound` → `ModuleDiscovered` → `ModuleDownloaded`.
//! Credential requests from external processes travel as
//! `CredentialRequested` and are answered with `CredentialProvided`.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;
use url::Url;
use uuid::Uuid;

use crate::bus::BusMessage;
use crate::error::ValidationError;

/// Hosting-platform repository identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepoId(u64);

impl RepoId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RepoId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

// ============================================================================
// Discovery
// ============================================================================

/// A repository became reachable through an installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoFound {
    /// Platform instance the repository lives on, e.g. `github.com`.
    pub repo_source: String,
    pub repo_id: RepoId,
    /// Full name, `owner/name`.
    pub repo_name: String,
    pub clone_url: Url,
}

impl BusMessage for RepoFound {
    fn name(&self) -> &'static str {
        "RepoFound"
    }

    fn log(&self) {
        info!(
            repo_source = %self.repo_source,
            repo_id = %self.repo_id,
            repo_name = %self.repo_name,
            "repository found"
        );
    }
}

/// A repository is no longer reachable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoLost {
    pub repo_source: String,
    pub repo_id: RepoId,
}

impl BusMessage for RepoLost {
    fn name(&self) -> &'static str {
        "RepoLost"
    }

    fn log(&self) {
        info!(
            repo_source = %self.repo_source,
            repo_id = %self.repo_id,
            "repository lost"
        );
    }
}

/// A module was discovered in a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDiscovered {
    pub repo_source: String,
    pub repo_id: RepoId,
    pub module_path: String,
    pub module_version: String,
}

impl BusMessage for ModuleDiscovered {
    fn name(&self) -> &'static str {
        "ModuleDiscovered"
    }

    fn log(&self) {
        info!(
            repo_source = %self.repo_source,
            repo_id = %self.repo_id,
            module_path = %self.module_path,
            module_version = %self.module_version,
            "module discovered"
        );
    }
}

/// A discovered module was downloaded to the local module cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDownloaded {
    pub repo_source: String,
    pub repo_id: RepoId,
    pub module_path: String,
    pub module_version: String,
    pub module_dir: PathBuf,
}

impl BusMessage for ModuleDownloaded {
    fn name(&self) -> &'static str {
        "ModuleDownloaded"
    }

    fn log(&self) {
        info!(
            repo_source = %self.repo_source,
            repo_id = %self.repo_id,
            module_path = %self.module_path,
            module_version = %self.module_version,
            module_dir = %self.module_dir.display(),
            "module downloaded"
        );
    }
}

// ============================================================================
// Credentials
// ============================================================================

/// Which half of a credential pair a helper process is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialField {
    Username,
    Password,
}

impl CredentialField {
    /// Returns true if values of this field must never be logged.
    pub fn is_sensitive(&self) -> bool {
        matches!(self, Self::Password)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Username => "username",
            Self::Password => "password",
        }
    }
}

impl fmt::Display for CredentialField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CredentialField {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "username" => Ok(Self::Username),
            "password" => Ok(Self::Password),
            other => Err(ValidationError::InvalidFormat {
                field: "field".to_string(),
                message: format!("expected 'username' or 'password', got '{other}'"),
            }),
        }
    }
}

/// An external process needs a credential for a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRequested {
    pub request_id: Uuid,
    pub repo_url: Url,
    pub field: CredentialField,
}

impl BusMessage for CredentialRequested {
    fn name(&self) -> &'static str {
        "CredentialRequested"
    }

    fn log(&self) {
        info!(
            request_id = %self.request_id,
            repo_url = %self.repo_url,
            field = %self.field,
            "credential requested"
        );
    }
}

/// The answer to a [`CredentialRequested`] with the same `request_id`.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialProvided {
    pub request_id: Uuid,
    pub repo_url: Url,
    pub field: CredentialField,
    pub value: String,
}

impl CredentialProvided {
    /// Build the reply to a request.
    pub fn reply(request: &CredentialRequested, value: impl Into<String>) -> Self {
        Self {
            request_id: request.request_id,
            repo_url: request.repo_url.clone(),
            field: request.field,
            value: value.into(),
        }
    }

    fn loggable_value(&self) -> &str {
        if self.field.is_sensitive() {
            "<REDACTED>"
        } else {
            &self.value
        }
    }
}

impl fmt::Debug for CredentialProvided {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialProvided")
            .field("request_id", &self.request_id)
            .field("repo_url", &self.repo_url.as_str())
            .field("field", &self.field)
            .field("value", &self.loggable_value())
            .finish()
    }
}

impl BusMessage for CredentialProvided {
    fn name(&self) -> &'static str {
        "CredentialProvided"
    }

    fn log(&self) {
        info!(
            request_id = %self.request_id,
            repo_url = %self.repo_url,
            field = %self.field,
            value = self.loggable_value(),
            "credential provided"
        );
    }
}

#[cfg(test)]
#[path = "messages_tests.rs"]
mod tests;
