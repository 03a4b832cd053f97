//! HTTP client used by the credential helper process to reach the broker.

use std::time::Duration;

use browser_core::messages::CredentialField;
use reqwest::Response;
use url::Url;
use uuid::Uuid;

use crate::errors::AskpassClientError;
use crate::protocol::{
    AskpassRequest, FieldRequest, FieldResponse, PairRequest, PairResponse, ASKPASS_PATH,
};

/// Environment variable naming the broker address (`host:port`).
pub const ASKPASS_ADDR_ENV: &str = "BROWSER_ASKPASS_ADDR";

/// Default overall deadline for one helper request.
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(20);

/// Client for `POST /askpass`.
///
/// # Examples
///
/// ```no_run
/// use browser_askpass::client::AskpassClient;
/// use browser_core::messages::CredentialField;
///
/// # async fn example() -> Result<(), browser_askpass::AskpassClientError> {
/// let client = AskpassClient::new("127.0.0.1:49152", std::time::Duration::from_secs(20))?;
/// let repo = "https://github.com/acme/widgets.git".parse().unwrap();
/// let password = client.ask(&repo, CredentialField::Password).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct AskpassClient {
    http: reqwest::Client,
    endpoint: Url,
}

impl AskpassClient {
    /// Create a client for the broker at `address` (`host:port`, or a full
    /// `http://` URL).
    ///
    /// # Errors
    ///
    /// Returns `AskpassClientError::InvalidAddress` if the address is empty
    /// or does not form a valid URL.
    pub fn new(address: &str, timeout: Duration) -> Result<Self, AskpassClientError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(AskpassClientError::InvalidAddress {
                address: address.to_string(),
                message: format!("{ASKPASS_ADDR_ENV} is not set"),
            });
        }

        let base = if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{address}")
        };
        let endpoint = Url::parse(&base)
            .and_then(|url| url.join(ASKPASS_PATH))
            .map_err(|e| AskpassClientError::InvalidAddress {
                address: address.to_string(),
                message: e.to_string(),
            })?;

        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, endpoint })
    }

    /// Create a client from [`ASKPASS_ADDR_ENV`].
    pub fn from_env(timeout: Duration) -> Result<Self, AskpassClientError> {
        let address = std::env::var(ASKPASS_ADDR_ENV).unwrap_or_default();
        Self::new(&address, timeout)
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Ask for a single credential field.
    pub async fn ask(
        &self,
        repo_url: &Url,
        field: CredentialField,
    ) -> Result<String, AskpassClientError> {
        let request = AskpassRequest::Field(FieldRequest {
            id: Uuid::new_v4(),
            field,
            repo_url: repo_url.clone(),
        });
        let response: FieldResponse = self.post(&request).await?.json().await?;
        Ok(response.value)
    }

    /// Ask for username and password in one round trip.
    pub async fn ask_pair(&self, repo_url: &Url) -> Result<(String, String), AskpassClientError> {
        let request = AskpassRequest::Pair(PairRequest {
            repo_url: repo_url.clone(),
        });
        let response: PairResponse = self.post(&request).await?.json().await?;
        Ok((response.username, response.password))
    }

    async fn post(&self, request: &AskpassRequest) -> Result<Response, AskpassClientError> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|body| body["error"].as_str().map(str::to_string))
            .unwrap_or_else(|| status.to_string());

        Err(AskpassClientError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
