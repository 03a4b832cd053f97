//! GitHub REST API response models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::auth::{InstallationId, InstallationPermissions, RepositoryId};

/// User or organization account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: u64,
    pub login: String,
    #[serde(rename = "type", default)]
    pub account_type: Option<String>,
}

/// An installation of the GitHub App on an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Installation {
    pub id: InstallationId,
    pub account: Account,
}

/// A repository visible to an installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub id: RepositoryId,
    pub name: String,
    pub full_name: String,
    pub owner: Account,
    pub clone_url: Url,
    #[serde(default)]
    pub default_branch: Option<String>,
    #[serde(default)]
    pub fork: bool,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub is_template: bool,
}

impl Repository {
    /// Forks, archives and templates carry no modules worth browsing.
    pub fn is_ignored(&self) -> bool {
        self.fork || self.archived || self.is_template
    }
}

/// Page of `GET /installation/repositories`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RepositoryPage {
    pub repositories: Vec<Repository>,
}

/// Repository reference embedded in a token grant.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RepositoryRef {
    pub id: RepositoryId,
    pub name: String,
}

/// Response of `POST /app/installations/{id}/access_tokens`.
///
/// The token string is never exposed in Debug output for security.
#[derive(Clone, Deserialize)]
pub struct InstallationTokenGrant {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub permissions: InstallationPermissions,
    #[serde(default)]
    pub repositories: Vec<RepositoryRef>,
}

impl std::fmt::Debug for InstallationTokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallationTokenGrant")
            .field("expires_at", &self.expires_at)
            .field("permissions", &self.permissions)
            .field("repositories", &self.repositories)
            .field("token", &"<REDACTED>")
            .finish()
    }
}
