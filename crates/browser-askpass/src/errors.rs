//! Error types for the credential broker and its helper-side client.

use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use tracing::{debug, warn};
use uuid::Uuid;

/// Broker request failures with HTTP status code mapping.
///
/// - `400 Bad Request`: malformed body or repository URL
/// - `408 Request Timeout`: no credential arrived before the deadline
/// - `409 Conflict`: the correlation ID is already pending
/// - `503 Service Unavailable`: the bus is closed or the broker is stopping
///
/// Credential values never appear in these errors.
#[derive(Debug, thiserror::Error)]
pub enum AskpassError {
    /// The request body could not be understood.
    #[error("Malformed request: {message}")]
    BadRequest { message: String },

    /// A request with this correlation ID is already waiting.
    #[error("Request {request_id} is already pending")]
    Conflict { request_id: Uuid },

    /// No credential was provided in time.
    #[error("No credential provided within {timeout:?}")]
    Timeout { timeout: Duration },

    /// The bus or the broker is shutting down.
    #[error("Credential broker unavailable: {message}")]
    Unavailable { message: String },
}

impl AskpassError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::Timeout { .. } => StatusCode::REQUEST_TIMEOUT,
            Self::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for AskpassError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            Self::Timeout { timeout } => {
                warn!(timeout = ?timeout, "Credential request timed out")
            }
            Self::Unavailable { message } => warn!(message = %message, "Credential broker unavailable"),
            _ => debug!(error = %self, "Rejected credential request"),
        }

        let body = serde_json::json!({
            "error": self.to_string(),
            "status": status.as_u16(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        (status, Json(body)).into_response()
    }
}

/// Broker startup and serving errors.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Credential broker must listen on a loopback address, got {address}")]
    NotLoopback { address: String },

    #[error("Failed to bind to address {address}: {message}")]
    BindFailed { address: String, message: String },

    #[error("Server failed: {message}")]
    ServerFailed { message: String },
}

/// Failures of the helper process talking to the broker.
#[derive(Debug, thiserror::Error)]
pub enum AskpassClientError {
    /// The broker address is missing or unusable.
    #[error("Invalid broker address '{address}': {message}")]
    InvalidAddress { address: String, message: String },

    /// The broker answered with an error status.
    #[error("Broker returned {status}: {message}")]
    Status { status: u16, message: String },

    /// The broker could not be reached or its answer could not be read.
    #[error("Broker request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl AskpassClientError {
    /// Returns true if the broker gave up waiting for a credential.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Status { status, .. } => *status == StatusCode::REQUEST_TIMEOUT.as_u16(),
            Self::Http(e) => e.is_timeout(),
            Self::InvalidAddress { .. } => false,
        }
    }
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod tests;
