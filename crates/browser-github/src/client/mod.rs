//! GitHub REST API surface used by the module browser.
//!
//! [`GitHubApi`] is the seam between the credential issuer (and the bus
//! components) and GitHub. [`RestClient`] implements it over `reqwest`.
//! Every call takes the bearer token to authenticate with; choosing between
//! an application token and an installation token is the caller's job.

mod models;
mod pagination;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, LINK};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, trace};
use url::Url;

use crate::auth::{InstallationId, TokenOptions, DEFAULT_API_URL};
use crate::error::ApiError;

pub use models::{Account, Installation, InstallationTokenGrant, Repository, RepositoryRef};
pub use pagination::{parse_link_header, Pagination};

const JSON_MEDIA_TYPE: &str = "application/vnd.github+json";
const RAW_MEDIA_TYPE: &str = "application/vnd.github.raw+json";
const SHA_MEDIA_TYPE: &str = "application/vnd.github.sha";
const API_VERSION: &str = "2022-11-28";

/// Operations the module browser performs against GitHub.
#[async_trait]
pub trait GitHubApi: Send + Sync {
    /// Exchange an application token for an installation token.
    async fn create_installation_token(
        &self,
        app_token: &str,
        installation_id: InstallationId,
        options: &TokenOptions,
    ) -> Result<InstallationTokenGrant, ApiError>;

    /// Invalidate the installation token used to authenticate the call.
    async fn revoke_installation_token(&self, installation_token: &str) -> Result<(), ApiError>;

    /// Every installation of the app, across all pages.
    async fn list_installations(&self, app_token: &str) -> Result<Vec<Installation>, ApiError>;

    /// Every repository the installation token can access, across all pages.
    async fn list_installation_repositories(
        &self,
        installation_token: &str,
    ) -> Result<Vec<Repository>, ApiError>;

    /// The installation that grants the app access to `owner/repo`.
    async fn find_repository_installation(
        &self,
        app_token: &str,
        owner: &str,
        repo: &str,
    ) -> Result<Installation, ApiError>;

    /// Commit SHA that `reference` (branch, tag or SHA) resolves to.
    async fn get_commit_sha(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        reference: &str,
    ) -> Result<String, ApiError>;

    /// Raw contents of a file at `reference`, or `None` if it does not exist.
    async fn get_file_contents(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        path: &str,
        reference: &str,
    ) -> Result<Option<String>, ApiError>;
}

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the REST client.
///
/// # Examples
///
/// ```
/// use browser_github::client::ClientConfig;
/// use std::time::Duration;
///
/// let config = ClientConfig::default()
///     .with_timeout(Duration::from_secs(60))
///     .with_api_url("https://ghe.example.com/api/v3".parse().unwrap());
///
/// assert_eq!(config.api_url.as_str(), "https://ghe.example.com/api/v3/");
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// User agent string for API requests (required by GitHub)
    pub user_agent: String,
    /// Request timeout duration
    pub timeout: Duration,
    /// GitHub API base URL, always ending in `/`
    pub api_url: Url,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("module-browser/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout: Duration::from_secs(30),
            api_url: default_api_url(),
        }
    }
}

impl ClientConfig {
    /// Set the user agent string.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the API base URL, e.g. `https://ghe.example.com/api/v3`.
    pub fn with_api_url(mut self, mut url: Url) -> Self {
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        self.api_url = url;
        self
    }
}

fn default_api_url() -> Url {
    Url::parse(DEFAULT_API_URL).unwrap_or_else(|_| unreachable!("constant URL is valid"))
}

// ============================================================================
// REST Client
// ============================================================================

/// `reqwest`-backed implementation of [`GitHubApi`].
#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
    config: ClientConfig,
}

impl RestClient {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::HttpClientError` if the HTTP client cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout)
            .build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.config
            .api_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| ApiError::InvalidRequest {
                message: format!("invalid API path '{}': {}", path, e),
            })
    }

    fn request(&self, method: Method, url: Url, token: &str, accept: &str) -> RequestBuilder {
        self.http
            .request(method, url)
            .header(AUTHORIZATION, format!("Bearer {}", token))
            .header(ACCEPT, accept)
            .header("X-GitHub-Api-Version", API_VERSION)
    }

    /// Send a request and map unsuccessful statuses onto `ApiError`.
    async fn send(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::Timeout
            } else {
                ApiError::HttpClientError(e)
            }
        })?;

        let status = response.status();
        trace!(status = status.as_u16(), url = %response.url(), "GitHub API response");

        if status.is_success() {
            return Ok(response);
        }

        let headers = response.headers().clone();
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read error body".to_string());

        Err(map_status(status, &headers, message))
    }

    async fn json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// GET every page of a list endpoint, following `Link: rel="next"`.
    async fn get_all_pages<P, T>(
        &self,
        path: &str,
        token: &str,
        items: fn(P) -> Vec<T>,
    ) -> Result<Vec<T>, ApiError>
    where
        P: DeserializeOwned,
    {
        let mut url = self.endpoint(path)?;
        url.query_pairs_mut().append_pair("per_page", "100");

        let mut all = Vec::new();
        loop {
            let response = self
                .send(self.request(Method::GET, url, token, JSON_MEDIA_TYPE))
                .await?;

            let link = response
                .headers()
                .get(LINK)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);

            let page: P = Self::json(response).await?;
            all.extend(items(page));

            match parse_link_header(link.as_deref()).next {
                Some(next) => {
                    url = Url::parse(&next).map_err(|e| ApiError::InvalidRequest {
                        message: format!("invalid pagination link '{}': {}", next, e),
                    })?;
                }
                None => break,
            }
        }

        Ok(all)
    }
}

/// Map a non-success status onto the error taxonomy.
fn map_status(status: StatusCode, headers: &HeaderMap, message: String) -> ApiError {
    match status {
        StatusCode::UNAUTHORIZED => ApiError::AuthenticationFailed,
        StatusCode::NOT_FOUND => ApiError::NotFound,
        StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS if rate_limit_exhausted(headers) => {
            ApiError::RateLimitExceeded {
                reset_at: rate_limit_reset(headers).unwrap_or_else(Utc::now),
            }
        }
        StatusCode::FORBIDDEN => ApiError::AuthorizationFailed,
        _ => ApiError::HttpError {
            status: status.as_u16(),
            message,
        },
    }
}

fn rate_limit_exhausted(headers: &HeaderMap) -> bool {
    headers
        .get("x-ratelimit-remaining")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|remaining| remaining.trim() == "0")
}

fn rate_limit_reset(headers: &HeaderMap) -> Option<DateTime<Utc>> {
    let seconds = headers
        .get("x-ratelimit-reset")?
        .to_str()
        .ok()?
        .trim()
        .parse::<i64>()
        .ok()?;
    Utc.timestamp_opt(seconds, 0).single()
}

#[async_trait]
impl GitHubApi for RestClient {
    async fn create_installation_token(
        &self,
        app_token: &str,
        installation_id: InstallationId,
        options: &TokenOptions,
    ) -> Result<InstallationTokenGrant, ApiError> {
        let url = self.endpoint(&format!("app/installations/{}/access_tokens", installation_id))?;
        let request = self
            .request(Method::POST, url, app_token, JSON_MEDIA_TYPE)
            .json(options);

        let grant: InstallationTokenGrant = Self::json(self.send(request).await?).await?;
        debug!(
            installation_id = %installation_id,
            expires_at = %grant.expires_at,
            "Created installation token"
        );
        Ok(grant)
    }

    async fn revoke_installation_token(&self, installation_token: &str) -> Result<(), ApiError> {
        let url = self.endpoint("installation/token")?;
        self.send(self.request(Method::DELETE, url, installation_token, JSON_MEDIA_TYPE))
            .await?;
        Ok(())
    }

    async fn list_installations(&self, app_token: &str) -> Result<Vec<Installation>, ApiError> {
        self.get_all_pages("app/installations", app_token, |page: Vec<Installation>| page)
            .await
    }

    async fn list_installation_repositories(
        &self,
        installation_token: &str,
    ) -> Result<Vec<Repository>, ApiError> {
        self.get_all_pages(
            "installation/repositories",
            installation_token,
            |page: models::RepositoryPage| page.repositories,
        )
        .await
    }

    async fn find_repository_installation(
        &self,
        app_token: &str,
        owner: &str,
        repo: &str,
    ) -> Result<Installation, ApiError> {
        let url = self.endpoint(&format!("repos/{}/{}/installation", owner, repo))?;
        let response = self
            .send(self.request(Method::GET, url, app_token, JSON_MEDIA_TYPE))
            .await?;
        Self::json(response).await
    }

    async fn get_commit_sha(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        reference: &str,
    ) -> Result<String, ApiError> {
        let url = self.endpoint(&format!("repos/{}/{}/commits/{}", owner, repo, reference))?;
        let response = self
            .send(self.request(Method::GET, url, token, SHA_MEDIA_TYPE))
            .await?;
        Ok(response.text().await?.trim().to_string())
    }

    async fn get_file_contents(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        path: &str,
        reference: &str,
    ) -> Result<Option<String>, ApiError> {
        let mut url = self.endpoint(&format!("repos/{}/{}/contents/{}", owner, repo, path))?;
        url.query_pairs_mut().append_pair("ref", reference);

        match self
            .send(self.request(Method::GET, url, token, RAW_MEDIA_TYPE))
            .await
        {
            Ok(response) => Ok(Some(response.text().await?)),
            Err(ApiError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
