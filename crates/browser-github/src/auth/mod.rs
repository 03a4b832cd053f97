//! GitHub App credential types and the credential issuer.
//!
//! This module provides:
//! - ID types (ClientId, InstallationId, RepositoryId)
//! - Token types (ApplicationToken, InstallationToken)
//! - Permission and token-scope types
//! - [`CredentialIssuer`], [`InstallationClient`] and
//!   [`InstallationClientCache`], which mint, reuse and revoke tokens
//!
//! Application tokens are short-lived RS256 JWTs signed locally. Installation
//! tokens are exchanged for an application token through the GitHub API and
//! are revoked as soon as the client that minted them closes.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use zeroize::Zeroizing;

use crate::error::ValidationError;

mod cache;
mod installation;
mod issuer;
pub mod jwt;
mod source;

pub use cache::InstallationClientCache;
pub use installation::InstallationClient;
pub use issuer::CredentialIssuer;
pub use source::{TokenMinter, TokenSource};

/// Host served when no alternate API base URL is configured.
pub const DEFAULT_HOST: &str = "github.com";

/// API base URL used when no alternate one is configured.
pub const DEFAULT_API_URL: &str = "https://api.github.com/";

// ============================================================================
// Core ID Types
// ============================================================================

/// GitHub App client identifier, used as the `iss` claim of application tokens.
///
/// # Examples
///
/// ```
/// use browser_github::auth::ClientId;
///
/// let client_id = ClientId::new("Iv1.0123456789abcdef").unwrap();
/// assert_eq!(client_id.as_str(), "Iv1.0123456789abcdef");
/// assert!(ClientId::new("  ").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(String);

impl ClientId {
    /// Create a client ID, rejecting blank values.
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into().trim().to_string();
        if id.is_empty() {
            return Err(ValidationError::InvalidFormat {
                field: "client_id".to_string(),
                message: "cannot be empty".to_string(),
            });
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ClientId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// GitHub App installation identifier for specific accounts.
///
/// # Examples
///
/// ```
/// use browser_github::auth::InstallationId;
///
/// let installation = InstallationId::new(98765);
/// assert_eq!(installation.as_u64(), 98765);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstallationId(u64);

impl InstallationId {
    /// Create a new installation ID.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw u64 value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for InstallationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for InstallationId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = s
            .parse::<u64>()
            .map_err(|_| ValidationError::InvalidFormat {
                field: "installation_id".to_string(),
                message: "must be a positive integer".to_string(),
            })?;
        Ok(Self::new(id))
    }
}

/// GitHub repository identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepositoryId(u64);

impl RepositoryId {
    /// Create a new repository ID.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw u64 value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RepositoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RepositoryId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = s
            .parse::<u64>()
            .map_err(|_| ValidationError::InvalidFormat {
                field: "repository_id".to_string(),
                message: "must be a positive integer".to_string(),
            })?;
        Ok(Self::new(id))
    }
}

// ============================================================================
// Credentials
// ============================================================================

/// RSA private key used to sign application tokens.
///
/// The PEM text is zeroed on drop and never exposed in Debug output.
#[derive(Clone)]
pub struct PrivateKey {
    pem: Zeroizing<String>,
}

impl PrivateKey {
    /// Get the PEM-encoded key.
    pub fn pem(&self) -> &str {
        &self.pem
    }

    /// Load a PEM-encoded key from a file.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if the file cannot be read or does not hold
    /// a valid RSA private key.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ValidationError> {
        let path = path.as_ref();
        let pem = Zeroizing::new(std::fs::read_to_string(path).map_err(|e| {
            ValidationError::InvalidFormat {
                field: "private_key_path".to_string(),
                message: format!("unable to read {}: {}", path.display(), e),
            }
        })?);
        Self::from_pem(&pem)
    }
}

// Security: Don't expose key data in debug output
impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("pem", &"<REDACTED>")
            .finish()
    }
}

/// Immutable identity of the GitHub App: client ID, signing key and the
/// optional GitHub Enterprise API base URL.
#[derive(Debug, Clone)]
pub struct AppCredential {
    client_id: ClientId,
    private_key: PrivateKey,
    api_base_url: Option<Url>,
}

impl AppCredential {
    pub fn new(client_id: ClientId, private_key: PrivateKey, api_base_url: Option<Url>) -> Self {
        Self {
            client_id,
            private_key,
            api_base_url,
        }
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }

    pub fn api_base_url(&self) -> Option<&Url> {
        self.api_base_url.as_ref()
    }

    /// Git host whose repositories this app can serve credentials for.
    ///
    /// # Examples
    ///
    /// ```
    /// # use browser_github::auth::{AppCredential, ClientId, PrivateKey};
    /// # fn check(key: PrivateKey) {
    /// let public = AppCredential::new(ClientId::new("Iv1.x").unwrap(), key.clone(), None);
    /// assert_eq!(public.served_host(), "github.com");
    ///
    /// let enterprise = AppCredential::new(
    ///     ClientId::new("Iv1.x").unwrap(),
    ///     key,
    ///     Some("https://ghe.example.com/api/v3/".parse().unwrap()),
    /// );
    /// assert_eq!(enterprise.served_host(), "ghe.example.com");
    /// # }
    /// ```
    pub fn served_host(&self) -> &str {
        self.api_base_url
            .as_ref()
            .and_then(|url| url.host_str())
            .unwrap_or(DEFAULT_HOST)
    }
}

// ============================================================================
// Permissions and Scope
// ============================================================================

/// Access level granted for a single permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    Read,
    Write,
    Admin,
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Admin => "admin",
        })
    }
}

/// Named permissions requested for, or granted to, an installation token.
///
/// Names follow the GitHub API (`contents`, `metadata`, `pull_requests`, ...).
///
/// # Examples
///
/// ```
/// use browser_github::auth::{InstallationPermissions, PermissionLevel};
///
/// let permissions = InstallationPermissions::new()
///     .with("metadata", PermissionLevel::Read)
///     .with("contents", PermissionLevel::Read);
///
/// assert_eq!(permissions.to_string(), "contents:read, metadata:read");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstallationPermissions(BTreeMap<String, PermissionLevel>);

impl InstallationPermissions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) one permission.
    pub fn with(mut self, name: impl Into<String>, level: PermissionLevel) -> Self {
        self.0.insert(name.into(), level);
        self
    }

    pub fn get(&self, name: &str) -> Option<PermissionLevel> {
        self.0.get(name).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, PermissionLevel)> {
        self.0.iter().map(|(name, level)| (name.as_str(), *level))
    }
}

impl fmt::Display for InstallationPermissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("(none)");
        }
        let parts: Vec<String> = self.iter().map(|(name, level)| format!("{name}:{level}")).collect();
        f.write_str(&parts.join(", "))
    }
}

/// Scope requested when minting an installation token.
///
/// Permissions are mandatory. Repositories may additionally be restricted by
/// ID and/or by name; leaving both empty grants every repository the
/// installation can see.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TokenOptions {
    pub permissions: InstallationPermissions,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub repository_ids: BTreeSet<RepositoryId>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub repositories: BTreeSet<String>,
}

impl TokenOptions {
    pub fn new(permissions: InstallationPermissions) -> Self {
        Self {
            permissions,
            repository_ids: BTreeSet::new(),
            repositories: BTreeSet::new(),
        }
    }

    /// Restrict the token to a repository by ID.
    pub fn with_repository_id(mut self, id: RepositoryId) -> Self {
        self.repository_ids.insert(id);
        self
    }

    /// Restrict the token to a repository by name (without the owner).
    pub fn with_repository(mut self, name: impl Into<String>) -> Self {
        self.repositories.insert(name.into());
        self
    }
}

// ============================================================================
// Token Types
// ============================================================================

/// A credential with a fixed expiry.
pub trait ExpiringToken {
    fn expires_at(&self) -> DateTime<Utc>;

    /// Check if the token is currently expired.
    fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at()
    }

    /// Returns true if the token expires within `margin` (or already has).
    fn expires_within(&self, margin: Duration) -> bool {
        match (self.expires_at() - Utc::now()).to_std() {
            Ok(remaining) => remaining <= margin,
            Err(_) => true,
        }
    }

    /// Time remaining until expiry, zero once expired.
    fn time_until_expiry(&self) -> Duration {
        (self.expires_at() - Utc::now()).to_std().unwrap_or_default()
    }
}

/// Application token: an RS256 JWT asserting the app's identity.
///
/// The token string is never exposed in Debug output for security.
#[derive(Clone)]
pub struct ApplicationToken {
    token: String,
    token_id: u64,
    client_id: ClientId,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl ApplicationToken {
    pub fn new(
        token: String,
        token_id: u64,
        client_id: ClientId,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            token,
            token_id,
            client_id,
            issued_at,
            expires_at,
        }
    }

    /// Get the token string for use in an `Authorization: Bearer` header.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Issuer-local sequence number, also the JWT `jti` claim.
    pub fn token_id(&self) -> u64 {
        self.token_id
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }
}

impl ExpiringToken for ApplicationToken {
    fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

// Security: Don't expose token in debug output
impl fmt::Debug for ApplicationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplicationToken")
            .field("token_id", &self.token_id)
            .field("client_id", &self.client_id)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .field("token", &"<REDACTED>")
            .finish()
    }
}

/// Installation-scoped access token for GitHub API and git operations.
///
/// The token string is never exposed in Debug output for security.
#[derive(Clone)]
pub struct InstallationToken {
    token: String,
    token_id: u64,
    installation_id: InstallationId,
    expires_at: DateTime<Utc>,
    permissions: InstallationPermissions,
    repositories: Vec<String>,
}

impl InstallationToken {
    pub fn new(
        token: String,
        token_id: u64,
        installation_id: InstallationId,
        expires_at: DateTime<Utc>,
        permissions: InstallationPermissions,
        repositories: Vec<String>,
    ) -> Self {
        Self {
            token,
            token_id,
            installation_id,
            expires_at,
            permissions,
            repositories,
        }
    }

    /// Get the token string for use in API requests or as a git password.
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn token_id(&self) -> u64 {
        self.token_id
    }

    pub fn installation_id(&self) -> InstallationId {
        self.installation_id
    }

    /// Permissions actually granted by GitHub.
    pub fn permissions(&self) -> &InstallationPermissions {
        &self.permissions
    }

    /// Names of the repositories the token is restricted to; empty means all.
    pub fn repositories(&self) -> &[String] {
        &self.repositories
    }

    /// Repository scope formatted for logs.
    pub(crate) fn repositories_label(&self) -> String {
        if self.repositories.is_empty() {
            return "(all)".to_string();
        }
        let mut names = self.repositories.clone();
        names.sort();
        names.join(", ")
    }
}

impl ExpiringToken for InstallationToken {
    fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

// Security: Don't expose token in debug output
impl fmt::Debug for InstallationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstallationToken")
            .field("token_id", &self.token_id)
            .field("installation_id", &self.installation_id)
            .field("expires_at", &self.expires_at)
            .field("permissions", &self.permissions)
            .field("repositories", &self.repositories)
            .field("token", &"<REDACTED>")
            .finish()
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Lifetimes and timeouts used by the issuer.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Lifetime of each application token.
    pub app_token_ttl: Duration,
    /// An application token is re-minted once it is this close to expiry.
    pub app_token_refresh_margin: Duration,
    /// An installation token is re-minted once it is this close to expiry.
    pub installation_token_refresh_margin: Duration,
    /// Upper bound on each mint or revoke call to GitHub.
    pub request_timeout: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            app_token_ttl: Duration::from_secs(60),
            app_token_refresh_margin: Duration::from_secs(5),
            installation_token_refresh_margin: Duration::from_secs(60),
            request_timeout: Duration::from_secs(15),
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
