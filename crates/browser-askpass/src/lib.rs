//! # Browser Askpass
//!
//! Credential broker for processes that git and `go` spawn with
//! `GIT_ASKPASS`. The helper executable makes a blocking HTTP call to a
//! loopback listener. The broker turns that call into a
//! [`CredentialRequested`](browser_core::messages::CredentialRequested) on the
//! bus and waits for the correlated
//! [`CredentialProvided`](browser_core::messages::CredentialProvided).
//!
//! ## Wire protocol
//!
//! `POST /askpass` with a JSON body:
//!
//! | Request | Response |
//! |---------|----------|
//! | `{"id": "<uuid>", "field": "username"\|"password", "repo_url": "<url>"}` | `200 {"value": "..."}` |
//! | `{"repo_url": "<url>"}` | `200 {"username": "...", "password": "..."}` |
//!
//! Errors: `400` malformed body, `408` deadline exceeded, `409` correlation
//! ID already pending, `503` bus closed or broker stopping.
//!
//! ## Usage
//!
//! ```no_run
//! use browser_askpass::{bind, create_router, serve, BrokerConfig, CredentialBroker};
//! use browser_core::{Bus, CancellationToken};
//!
//! # async fn example() -> Result<(), browser_askpass::ServiceError> {
//! let bus = Bus::new();
//! let config = BrokerConfig::default();
//! let (broker, replies) = CredentialBroker::join(&bus, config.timeout());
//!
//! let shutdown = CancellationToken::new();
//! tokio::spawn(replies.run(shutdown.clone()));
//!
//! let listener = bind(&config).await?;
//! println!("askpass broker on {}", listener.local_addr().unwrap());
//! serve(listener, create_router(broker), shutdown).await
//! # }
//! ```

use axum::{
    body::Bytes,
    extract::State,
    response::{IntoResponse, Json, Response},
    routing::post,
    Router,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

pub mod broker;
pub mod client;
pub mod config;
pub mod errors;
pub mod pending;
pub mod protocol;

pub use broker::{CredentialBroker, ReplyRouter};
pub use client::{AskpassClient, ASKPASS_ADDR_ENV};
pub use config::BrokerConfig;
pub use errors::{AskpassClientError, AskpassError, ServiceError};
pub use pending::{PendingRequests, PendingSlot};
pub use protocol::{AskpassRequest, FieldResponse, PairResponse, ASKPASS_PATH};

// ============================================================================
// HTTP Server
// ============================================================================

/// Create the broker router.
pub fn create_router(broker: CredentialBroker) -> Router {
    Router::new()
        .route(ASKPASS_PATH, post(handle_askpass))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .into_inner(),
        )
        .with_state(broker)
}

/// Validate the configuration and bind the loopback listener.
///
/// # Errors
///
/// Returns `ServiceError::NotLoopback` for a non-loopback address and
/// `ServiceError::BindFailed` if the socket cannot be bound.
pub async fn bind(config: &BrokerConfig) -> Result<TcpListener, ServiceError> {
    config.validate()?;
    TcpListener::bind(config.listen_address)
        .await
        .map_err(|e| ServiceError::BindFailed {
            address: config.listen_address.to_string(),
            message: e.to_string(),
        })
}

/// Serve `router` on `listener` until `shutdown` fires.
///
/// In-flight requests are allowed to finish after shutdown is signalled.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
) -> Result<(), ServiceError> {
    let address = listener
        .local_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| "<unknown>".to_string());
    info!(address = %address, "Starting credential broker");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| ServiceError::ServerFailed {
            message: e.to_string(),
        })?;

    info!(address = %address, "Credential broker shutdown complete");
    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

/// Handle `POST /askpass`.
///
/// The body is parsed by hand so every malformed request maps to `400`.
pub async fn handle_askpass(
    State(broker): State<CredentialBroker>,
    body: Bytes,
) -> Result<Response, AskpassError> {
    match AskpassRequest::from_slice(&body)? {
        AskpassRequest::Field(request) => {
            debug!(
                request_id = %request.id,
                field = %request.field,
                repo_url = %request.repo_url,
                "Credential field requested"
            );
            let value = broker
                .request(request.id, request.repo_url, request.field)
                .await?;
            Ok(Json(FieldResponse { value }).into_response())
        }
        AskpassRequest::Pair(request) => {
            debug!(repo_url = %request.repo_url, "Credential pair requested");
            let (username, password) = broker.request_pair(request.repo_url).await?;
            Ok(Json(PairResponse { username, password }).into_response())
        }
    }
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
