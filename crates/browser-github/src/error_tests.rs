//! Tests for error types.

use super::*;
use crate::auth::InstallationId;

/// Verify that AuthError variants correctly classify transient vs non-transient conditions.
///
/// Caller misuse (missing permissions, closed clients) must never look
/// retryable, while timeouts and transient API failures must.
#[test]
fn test_auth_error_transience() {
    // Non-transient errors
    assert!(!AuthError::PermissionsRequired.is_transient());
    assert!(!AuthError::ClientClosed.is_transient());
    assert!(!AuthError::IssuerClosed.is_transient());
    assert!(!AuthError::InstallationNotFound {
        installation_id: InstallationId::new(123)
    }
    .is_transient());
    assert!(!AuthError::SigningError(SigningError::InvalidKey {
        message: "bad".to_string()
    })
    .is_transient());

    // Transient errors
    assert!(AuthError::Timeout {
        timeout: Duration::from_secs(15)
    }
    .is_transient());
    assert!(AuthError::ApiError(ApiError::HttpError {
        status: 502,
        message: "bad gateway".to_string()
    })
    .is_transient());

    // Non-transient API errors
    assert!(!AuthError::ApiError(ApiError::NotFound).is_transient());
}

/// Verify ApiError classification of HTTP statuses.
#[test]
fn test_api_error_transience() {
    assert!(ApiError::HttpError {
        status: 500,
        message: "server error".to_string()
    }
    .is_transient());
    assert!(ApiError::HttpError {
        status: 429,
        message: "rate limited".to_string()
    }
    .is_transient());
    assert!(ApiError::RateLimitExceeded {
        reset_at: Utc::now()
    }
    .is_transient());
    assert!(ApiError::Timeout.is_transient());

    assert!(!ApiError::HttpError {
        status: 422,
        message: "unprocessable".to_string()
    }
    .is_transient());
    assert!(!ApiError::AuthenticationFailed.is_transient());
    assert!(!ApiError::AuthorizationFailed.is_transient());
    assert!(!ApiError::NotFound.is_transient());
}

/// Verify error messages include the identifying context.
#[test]
fn test_error_display() {
    let err = AuthError::InstallationNotFound {
        installation_id: InstallationId::new(98765),
    };
    assert!(err.to_string().contains("98765"));

    let err = ValidationError::InvalidFormat {
        field: "client_id".to_string(),
        message: "cannot be empty".to_string(),
    };
    assert_eq!(err.to_string(), "Invalid format for client_id: cannot be empty");
}
