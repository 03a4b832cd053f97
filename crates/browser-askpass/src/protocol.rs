//! Wire format of `POST /askpass`.

use browser_core::messages::CredentialField;
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::errors::AskpassError;

/// Path the broker serves and the helper posts to.
pub const ASKPASS_PATH: &str = "/askpass";

/// Ask for a single credential field under a caller-chosen correlation ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldRequest {
    pub id: Uuid,
    pub field: CredentialField,
    pub repo_url: Url,
}

/// Ask for both username and password at once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PairRequest {
    pub repo_url: Url,
}

/// Either request shape; distinguished by which fields are present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AskpassRequest {
    Field(FieldRequest),
    Pair(PairRequest),
}

impl AskpassRequest {
    /// Parse a request body.
    ///
    /// # Errors
    ///
    /// Returns `AskpassError::BadRequest` if the body is not one of the two
    /// request shapes or the repository URL does not parse.
    pub fn from_slice(body: &[u8]) -> Result<Self, AskpassError> {
        serde_json::from_slice(body).map_err(|e| AskpassError::BadRequest {
            message: format!(
                "expected {{id, field, repo_url}} or {{repo_url}}: {}",
                e
            ),
        })
    }

    pub fn repo_url(&self) -> &Url {
        match self {
            Self::Field(request) => &request.repo_url,
            Self::Pair(request) => &request.repo_url,
        }
    }
}

/// Reply to a [`FieldRequest`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldResponse {
    pub value: String,
}

/// Reply to a [`PairRequest`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairResponse {
    pub username: String,
    pub password: String,
}

// Security: Don't expose credentials in debug output
impl std::fmt::Debug for FieldResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldResponse")
            .field("value", &"<REDACTED>")
            .finish()
    }
}

impl std::fmt::Debug for PairResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairResponse")
            .field("username", &self.username)
            .field("password", &"<REDACTED>")
            .finish()
    }
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
