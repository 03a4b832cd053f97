//! Tests for the `/askpass` route.

use super::*;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use browser_core::bus::Bus;
use browser_core::messages::{CredentialField, CredentialProvided, CredentialRequested};
use tower::ServiceExt;
use uuid::Uuid;

// ============================================================================
// Harness
// ============================================================================

/// Bus with a broker and a responder answering `<field>-value` for
/// github.com and ignoring everything else.
fn app(timeout: Duration) -> (Router, CredentialBroker, Bus) {
    let bus = Bus::new();
    let (broker, router) = CredentialBroker::join(&bus, timeout);

    let mut responder = bus.participant("responder");
    responder.subscribe::<CredentialRequested>();
    let outbox = responder.outbox();
    let mut inbox = responder.ready().typed::<CredentialRequested>();
    tokio::spawn(async move {
        while let Some(request) = inbox.recv().await {
            if request.repo_url.host_str() != Some("github.com") {
                continue;
            }
            let value = format!("{}-value", request.field);
            let _ = outbox
                .publish(CredentialProvided::reply(&request, value))
                .await;
        }
    });

    tokio::spawn(router.run(CancellationToken::new()));
    (create_router(broker.clone()), broker, bus)
}

fn post_json(body: impl Into<String>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(ASKPASS_PATH)
        .header("content-type", "application/json")
        .body(Body::from(body.into()))
        .unwrap()
}

fn field_body(id: Uuid, field: &str, url: &str) -> String {
    serde_json::json!({ "id": id, "field": field, "repo_url": url }).to_string()
}

async fn json_body(response: Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// ============================================================================
// Success
// ============================================================================

#[tokio::test]
async fn test_field_request() {
    let (app, _, _bus) = app(Duration::from_secs(5));

    let response = app
        .oneshot(post_json(field_body(
            Uuid::new_v4(),
            "password",
            "https://github.com/acme/widgets.git",
        )))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["value"], "password-value");
}

#[tokio::test]
async fn test_pair_request() {
    let (app, _, _bus) = app(Duration::from_secs(5));

    let response = app
        .oneshot(post_json(r#"{"repo_url":"https://github.com/acme/widgets.git"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["username"], "username-value");
    assert_eq!(body["password"], "password-value");
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let (app, broker, _bus) = app(Duration::from_secs(5));

    for body in [
        "",
        "{",
        r#"{"repo_url":"::not a url::"}"#,
        r#"{"id":"x","field":"username","repo_url":"https://github.com/a/b"}"#,
    ] {
        let response = app.clone().oneshot(post_json(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{body}");
    }
    assert_eq!(broker.pending_count(), 0);
}

/// Verify an unanswered request times out with 408 and leaves no slot.
#[tokio::test]
async fn test_unanswered_request_times_out() {
    let (app, broker, _bus) = app(Duration::from_millis(100));

    let response = app
        .oneshot(post_json(field_body(
            Uuid::new_v4(),
            "password",
            "https://gitlab.com/acme/widgets.git",
        )))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    assert_eq!(json_body(response).await["status"], 408);
    assert_eq!(broker.pending_count(), 0);
}

#[tokio::test]
async fn test_duplicate_pending_id_conflicts() {
    let (app, _, _bus) = app(Duration::from_millis(300));
    let id = Uuid::new_v4();
    let url = "https://gitlab.com/acme/widgets.git";

    let first = tokio::spawn(
        app.clone()
            .oneshot(post_json(field_body(id, "username", url))),
    );
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = app
        .oneshot(post_json(field_body(id, "username", url)))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);

    let first = first.await.unwrap().unwrap();
    assert_eq!(first.status(), StatusCode::REQUEST_TIMEOUT);
}

#[tokio::test]
async fn test_closed_bus_is_unavailable() {
    let (app, _, bus) = app(Duration::from_secs(5));
    bus.close();

    let response = app
        .oneshot(post_json(field_body(
            Uuid::new_v4(),
            "username",
            "https://github.com/acme/widgets.git",
        )))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_wrong_method_rejected() {
    let (app, _, _bus) = app(Duration::from_secs(5));

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(ASKPASS_PATH)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

// ============================================================================
// Server
// ============================================================================

/// Verify a real loopback server round-trips through the helper client.
#[tokio::test]
async fn test_serve_with_client() {
    let (app, _, _bus) = app(Duration::from_secs(5));
    let listener = bind(&BrokerConfig::default()).await.unwrap();
    let address = listener.local_addr().unwrap();

    let shutdown = CancellationToken::new();
    let server = tokio::spawn(serve(listener, app, shutdown.clone()));

    let client = AskpassClient::new(&address.to_string(), Duration::from_secs(5)).unwrap();
    let repo = "https://github.com/acme/widgets.git".parse().unwrap();
    let value = client.ask(&repo, CredentialField::Username).await.unwrap();
    assert_eq!(value, "username-value");

    shutdown.cancel();
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_bind_rejects_public_address() {
    let config = BrokerConfig {
        listen_address: "0.0.0.0:0".parse().unwrap(),
        ..BrokerConfig::default()
    };

    assert!(matches!(
        bind(&config).await,
        Err(ServiceError::NotLoopback { .. })
    ));
}
