//! Common test utilities for the module browser integration tests
//!
//! This module provides:
//! - A wiremock-backed GitHub API with the endpoints the browser uses
//! - A credential issuer wired to it with a real RS256 signer
//! - Polling helpers for asynchronous side effects

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use browser_github::auth::jwt::Rs256Signer;
use browser_github::auth::{AppCredential, AuthConfig, ClientId, PrivateKey};
use browser_github::client::{ClientConfig, RestClient};
use browser_github::CredentialIssuer;
use serde_json::json;
use url::Url;
use wiremock::matchers::{method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

pub const CLIENT_ID: &str = "Iv1.integration0000";
pub const INSTALLATION_ID: u64 = 42;
pub const INSTALLATION_TOKEN: &str = "ghs_integration";

pub fn key_path() -> PathBuf {
    PathBuf::from(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/../browser-github/testdata/test_app_key.pem"
    ))
}

pub fn public_key_pem() -> String {
    std::fs::read_to_string(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/../browser-github/testdata/test_app_key.pub.pem"
    ))
    .unwrap()
}

// ============================================================================
// Mock GitHub
// ============================================================================

/// GitHub API stand-in. The served host is `127.0.0.1`.
pub struct MockGitHub {
    pub server: MockServer,
}

impl MockGitHub {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn api_url(&self) -> Url {
        Url::parse(&format!("{}/", self.server.uri())).unwrap()
    }

    pub fn repo_url(&self, owner: &str, repo: &str) -> Url {
        Url::parse(&format!("{}/{}/{}.git", self.server.uri(), owner, repo)).unwrap()
    }

    /// `POST /app/installations/42/access_tokens`, valid for an hour.
    pub async fn mount_installation_token(&self) {
        let expires_at = chrono::Utc::now() + chrono::Duration::hours(1);
        Mock::given(method("POST"))
            .and(path(format!(
                "/app/installations/{INSTALLATION_ID}/access_tokens"
            )))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "token": INSTALLATION_TOKEN,
                "expires_at": expires_at.to_rfc3339(),
                "permissions": { "contents": "read", "metadata": "read" }
            })))
            .mount(&self.server)
            .await;
    }

    pub async fn mount_revoke(&self) {
        Mock::given(method("DELETE"))
            .and(path("/installation/token"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&self.server)
            .await;
    }

    /// Revocations that take `delay` to answer.
    pub async fn mount_slow_revoke(&self, delay: Duration) {
        Mock::given(method("DELETE"))
            .and(path("/installation/token"))
            .respond_with(ResponseTemplate::new(204).set_delay(delay))
            .mount(&self.server)
            .await;
    }

    pub async fn mount_repository_installation(&self, owner: &str, repo: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/repos/{owner}/{repo}/installation")))
            .respond_with(ResponseTemplate::new(200).set_body_json(installation(owner)))
            .mount(&self.server)
            .await;
    }

    pub async fn mount_installations(&self, owner: &str) {
        Mock::given(method("GET"))
            .and(path("/app/installations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([installation(owner)])))
            .mount(&self.server)
            .await;
    }

    pub async fn mount_repositories(&self, repositories: serde_json::Value) {
        let total = repositories.as_array().map(Vec::len).unwrap_or(0);
        Mock::given(method("GET"))
            .and(path("/installation/repositories"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total_count": total,
                "repositories": repositories
            })))
            .mount(&self.server)
            .await;
    }

    /// A repository whose `branch` resolves to `sha` and whose root `go.mod`
    /// declares `module`.
    pub async fn mount_go_module(&self, owner: &str, repo: &str, branch: &str, sha: &str, module: &str) {
        self.mount_commit(owner, repo, branch, sha).await;

        Mock::given(method("GET"))
            .and(path(format!("/repos/{owner}/{repo}/contents/go.mod")))
            .and(query_param("ref", sha))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(format!("module {module}\n\ngo 1.22\n")),
            )
            .mount(&self.server)
            .await;
    }

    pub async fn mount_commit(&self, owner: &str, repo: &str, branch: &str, sha: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/repos/{owner}/{repo}/commits/{branch}")))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!("{sha}\n")))
            .mount(&self.server)
            .await;
    }

    /// Every other contents request is a 404.
    pub async fn mount_missing_contents(&self) {
        Mock::given(method("GET"))
            .and(path_regex(r"^/repos/[^/]+/[^/]+/contents/.*$"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "message": "Not Found"
            })))
            .mount(&self.server)
            .await;
    }

    /// Requests received so far matching `verb` and `request_path`.
    pub async fn requests(&self, verb: &str, request_path: &str) -> Vec<Request> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.method.as_str() == verb && r.url.path() == request_path)
            .collect()
    }

    pub async fn count(&self, verb: &str, request_path: &str) -> usize {
        self.requests(verb, request_path).await.len()
    }
}

pub fn installation(owner: &str) -> serde_json::Value {
    json!({
        "id": INSTALLATION_ID,
        "account": { "id": 1, "login": owner, "type": "Organization" }
    })
}

pub fn repository(github: &MockGitHub, id: u64, owner: &str, name: &str) -> serde_json::Value {
    json!({
        "id": id,
        "name": name,
        "full_name": format!("{owner}/{name}"),
        "owner": { "id": 1, "login": owner },
        "clone_url": github.repo_url(owner, name).as_str(),
        "default_branch": "main",
        "fork": false,
        "archived": false,
        "is_template": false
    })
}

// ============================================================================
// Issuer
// ============================================================================

pub fn credential(github: &MockGitHub) -> AppCredential {
    let key = PrivateKey::from_file(key_path()).unwrap();
    AppCredential::new(ClientId::new(CLIENT_ID).unwrap(), key, Some(github.api_url()))
}

/// An issuer talking to `github` through the real REST client.
pub fn issuer(github: &MockGitHub) -> CredentialIssuer {
    let credential = credential(github);
    let signer = Rs256Signer::new(credential.private_key()).unwrap();
    let api = RestClient::new(ClientConfig::default().with_api_url(github.api_url())).unwrap();

    let config = AuthConfig {
        request_timeout: Duration::from_secs(5),
        ..AuthConfig::default()
    };
    CredentialIssuer::new(credential, Arc::new(signer), Arc::new(api), config)
}

// ============================================================================
// Polling
// ============================================================================

/// Poll `check` every 20ms for up to 3s.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..150 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
