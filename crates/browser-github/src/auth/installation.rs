//! Installation-scoped clients and their token monitors.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::auth::issuer::{CredentialIssuer, IssuerCore};
use crate::auth::source::{TokenMinter, TokenSource};
use crate::auth::{ExpiringToken, InstallationId, InstallationToken, TokenOptions};
use crate::client::Repository;
use crate::error::{ApiError, AuthError};

struct InstallationMinter {
    issuer: CredentialIssuer,
    installation_id: InstallationId,
    options: TokenOptions,
    closed: CancellationToken,
}

#[async_trait]
impl TokenMinter for InstallationMinter {
    type Token = InstallationToken;

    fn ensure_open(&self) -> Result<(), AuthError> {
        if self.issuer.is_closed() {
            return Err(AuthError::IssuerClosed);
        }
        if self.closed.is_cancelled() {
            return Err(AuthError::ClientClosed);
        }
        Ok(())
    }

    async fn mint(&self) -> Result<InstallationToken, AuthError> {
        if self.closed.is_cancelled() {
            return Err(AuthError::ClientClosed);
        }

        let app = self.issuer.application_token().await?;
        let core = self.issuer.core();
        let timeout = core.config.request_timeout;

        let request =
            core.api
                .create_installation_token(app.token(), self.installation_id, &self.options);
        let grant = match tokio::time::timeout(timeout, request).await {
            Ok(Ok(grant)) => grant,
            Ok(Err(ApiError::NotFound)) => {
                return Err(AuthError::InstallationNotFound {
                    installation_id: self.installation_id,
                })
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(AuthError::Timeout { timeout }),
        };

        let token = InstallationToken::new(
            grant.token,
            core.next_token_id(),
            self.installation_id,
            grant.expires_at,
            grant.permissions,
            grant.repositories.into_iter().map(|r| r.name).collect(),
        );
        let active = core.acquire();
        debug!(
            token_id = token.token_id(),
            installation_id = %self.installation_id,
            permissions = %token.permissions(),
            repositories = %token.repositories_label(),
            expires_at = %token.expires_at(),
            active,
            "Minted installation token"
        );

        core.spawn_monitor(monitor_installation_token(
            Arc::clone(core),
            self.closed.clone(),
            token.clone(),
        ));

        // Closed mid-mint: the monitor is already revoking it.
        if self.closed.is_cancelled() {
            return Err(AuthError::ClientClosed);
        }
        Ok(token)
    }
}

/// Watches one installation token until it is revoked or expires.
///
/// Closing the issuer revokes. Closing the client revokes, and if that
/// fails the monitor keeps waiting for expiry (or issuer shutdown) so the
/// bookkeeping stays accurate.
async fn monitor_installation_token(
    core: Arc<IssuerCore>,
    client_closed: CancellationToken,
    token: InstallationToken,
) {
    let deadline = Instant::now() + token.time_until_expiry();
    let parent_closed = core.closed.clone();

    tokio::select! {
        _ = tokio::time::sleep_until(deadline) => {
            expired(&core, &token);
        }
        _ = parent_closed.cancelled() => {
            if !core.revoke(&token).await {
                core.release();
            }
        }
        _ = client_closed.cancelled() => {
            if token.is_expired() {
                expired(&core, &token);
            } else if !core.revoke(&token).await {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => expired(&core, &token),
                    _ = parent_closed.cancelled() => {
                        core.release();
                    }
                }
            }
        }
    }
}

fn expired(core: &IssuerCore, token: &InstallationToken) {
    let active = core.release();
    debug!(
        token_id = token.token_id(),
        installation_id = %token.installation_id(),
        active,
        "Installation token expired"
    );
}

// ============================================================================
// Client
// ============================================================================

/// A client bound to one installation and one fixed permission request.
///
/// Tokens are reused until they come within
/// [`AuthConfig::installation_token_refresh_margin`](crate::auth::AuthConfig)
/// of expiry. [`close`](Self::close) (also run on drop) revokes every token
/// the client minted, in the background, no later than natural expiry.
pub struct InstallationClient {
    source: TokenSource<InstallationMinter>,
}

impl InstallationClient {
    pub(crate) fn new(
        issuer: CredentialIssuer,
        installation_id: InstallationId,
        options: TokenOptions,
    ) -> Self {
        let margin = issuer.config().installation_token_refresh_margin;
        let closed = issuer.core().closed.child_token();
        Self {
            source: TokenSource::new(
                InstallationMinter {
                    issuer,
                    installation_id,
                    options,
                    closed,
                },
                margin,
            ),
        }
    }

    fn minter(&self) -> &InstallationMinter {
        self.source.minter()
    }

    /// Get a valid installation token, minting one if needed.
    ///
    /// # Errors
    ///
    /// - `AuthError::IssuerClosed` / `AuthError::ClientClosed` after shutdown
    /// - `AuthError::InstallationNotFound` if GitHub does not know the installation
    /// - `AuthError::Timeout` if GitHub did not answer in time
    pub async fn token(&self) -> Result<InstallationToken, AuthError> {
        self.source.token().await
    }

    /// Stop serving tokens and revoke the ones already minted.
    ///
    /// Returns immediately; revocation happens on the token monitors.
    pub fn close(&self) {
        let minter = self.minter();
        if !minter.closed.is_cancelled() {
            debug!(installation_id = %minter.installation_id, "Closing installation client");
            minter.closed.cancel();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.minter().closed.is_cancelled()
    }

    pub fn installation_id(&self) -> InstallationId {
        self.minter().installation_id
    }

    pub fn options(&self) -> &TokenOptions {
        &self.minter().options
    }

    /// Every repository visible to this client's token.
    pub async fn list_repositories(&self) -> Result<Vec<Repository>, AuthError> {
        let token = self.token().await?;
        Ok(self
            .minter()
            .issuer
            .api()
            .list_installation_repositories(token.token())
            .await?)
    }

    /// Commit SHA that `reference` resolves to in `owner/repo`.
    pub async fn commit_sha(
        &self,
        owner: &str,
        repo: &str,
        reference: &str,
    ) -> Result<String, AuthError> {
        let token = self.token().await?;
        Ok(self
            .minter()
            .issuer
            .api()
            .get_commit_sha(token.token(), owner, repo, reference)
            .await?)
    }

    /// Raw contents of `path` at `reference`, `None` if absent.
    pub async fn file_contents(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        reference: &str,
    ) -> Result<Option<String>, AuthError> {
        let token = self.token().await?;
        Ok(self
            .minter()
            .issuer
            .api()
            .get_file_contents(token.token(), owner, repo, path, reference)
            .await?)
    }
}

impl Drop for InstallationClient {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for InstallationClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let minter = self.minter();
        f.debug_struct("InstallationClient")
            .field("installation_id", &minter.installation_id)
            .field("permissions", &minter.options.permissions)
            .field("closed", &minter.closed.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
#[path = "installation_tests.rs"]
mod tests;
