//! Error types for GitHub operations.
//!
//! Each error carries enough classification for callers to decide whether a
//! retry is worthwhile. The issuer itself never retries.

use std::time::Duration;

use browser_core::BusError;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::auth::InstallationId;

/// Credential issuance errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Installation not found or access denied (non-retryable).
    #[error("Installation {installation_id} not found or access denied")]
    InstallationNotFound { installation_id: InstallationId },

    /// An installation client was requested without explicit permissions.
    #[error("Installation tokens require an explicit, non-empty permission set")]
    PermissionsRequired,

    /// The installation client has been closed; its tokens are no longer served.
    #[error("Installation client is closed")]
    ClientClosed,

    /// The credential issuer has been shut down.
    #[error("Credential issuer is closed")]
    IssuerClosed,

    /// A platform request did not complete in time.
    #[error("Request timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// JWT signing operation failed.
    #[error("JWT signing failed: {0}")]
    SigningError(#[from] SigningError),

    /// GitHub API client error.
    #[error("API error: {0}")]
    ApiError(#[from] ApiError),
}

impl AuthError {
    /// Check if this error represents a transient condition that may succeed if retried.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::InstallationNotFound { .. } => false,
            Self::PermissionsRequired => false,
            Self::ClientClosed => false,
            Self::IssuerClosed => false,
            Self::Timeout { .. } => true,
            Self::SigningError(_) => false,
            Self::ApiError(e) => e.is_transient(),
        }
    }
}

/// Errors during JWT signing operations.
#[derive(Debug, Error)]
pub enum SigningError {
    /// The private key is invalid or malformed.
    #[error("Invalid private key: {message}")]
    InvalidKey { message: String },

    /// Failed to encode the JWT token.
    #[error("Token encoding failed: {message}")]
    EncodingFailed { message: String },
}

/// Errors during GitHub API operations.
#[derive(Debug, Error)]
pub enum ApiError {
    /// HTTP error response from GitHub API.
    #[error("HTTP error: {status} - {message}")]
    HttpError { status: u16, message: String },

    /// Rate limit exceeded. Operations should wait until reset time.
    #[error("Rate limit exceeded. Reset at: {reset_at}")]
    RateLimitExceeded { reset_at: DateTime<Utc> },

    /// Request to GitHub API timed out.
    #[error("Request timeout")]
    Timeout,

    /// The request could not be built.
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// Authentication to GitHub API failed.
    #[error("Authentication failed")]
    AuthenticationFailed,

    /// Authorization check failed (insufficient permissions).
    #[error("Authorization failed")]
    AuthorizationFailed,

    /// The requested resource was not found.
    #[error("Resource not found")]
    NotFound,

    /// Failed to parse JSON response from GitHub API.
    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// HTTP client error (network, TLS, etc.).
    #[error("HTTP client error: {0}")]
    HttpClientError(#[from] reqwest::Error),
}

impl ApiError {
    /// Check if this error represents a transient condition that may succeed if retried.
    ///
    /// Transient conditions include:
    /// - Server errors (5xx)
    /// - Rate limiting (429 or an exhausted quota)
    /// - Request timeouts
    /// - Network/transport errors
    pub fn is_transient(&self) -> bool {
        match self {
            Self::HttpError { status, .. } => *status >= 500 || *status == 429,
            Self::RateLimitExceeded { .. } => true,
            Self::Timeout => true,
            Self::InvalidRequest { .. } => false,
            Self::AuthenticationFailed => false,
            Self::AuthorizationFailed => false,
            Self::NotFound => false,
            Self::JsonError(_) => false,
            Self::HttpClientError(_) => true,
        }
    }
}

/// Input validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A required field is missing.
    #[error("Required field missing: {field}")]
    Required { field: String },

    /// A field has an invalid format.
    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },
}

/// Errors that stop the repository watcher.
#[derive(Debug, Error)]
pub enum WatchError {
    /// Installations or repositories could not be listed.
    #[error("Unable to enumerate repositories: {0}")]
    Auth(#[from] AuthError),

    /// Discoveries could not be published.
    #[error("Unable to publish discovery: {0}")]
    Bus(#[from] BusError),
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
