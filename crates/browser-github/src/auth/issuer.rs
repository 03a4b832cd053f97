//! The credential issuer: application tokens and installation clients.

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::auth::installation::InstallationClient;
use crate::auth::jwt::{JwtClaims, JwtSigner};
use crate::auth::source::{TokenMinter, TokenSource};
use crate::auth::{
    AppCredential, ApplicationToken, AuthConfig, ExpiringToken, InstallationId,
    InstallationToken, TokenOptions,
};
use crate::client::{GitHubApi, Installation};
use crate::error::AuthError;

/// State shared by the issuer, its installation clients and every token
/// monitor they spawn.
pub(crate) struct IssuerCore {
    pub(crate) credential: AppCredential,
    pub(crate) signer: Arc<dyn JwtSigner>,
    pub(crate) api: Arc<dyn GitHubApi>,
    pub(crate) config: AuthConfig,
    pub(crate) closed: CancellationToken,
    monitors: TaskTracker,
    next_token_id: AtomicU64,
    active_tokens: AtomicI64,
}

impl IssuerCore {
    pub(crate) fn next_token_id(&self) -> u64 {
        self.next_token_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Record a newly minted token; returns the live count.
    pub(crate) fn acquire(&self) -> i64 {
        self.active_tokens.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Record that a token is no longer live; returns the live count.
    pub(crate) fn release(&self) -> i64 {
        self.active_tokens.fetch_sub(1, Ordering::SeqCst) - 1
    }

    pub(crate) fn active(&self) -> i64 {
        self.active_tokens.load(Ordering::SeqCst)
    }

    /// Run a token monitor on the issuer's tracker.
    pub(crate) fn spawn_monitor<F>(&self, monitor: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.monitors.spawn(monitor);
    }

    /// Best-effort revocation of an installation token.
    ///
    /// Returns `true` once GitHub confirmed the revocation. Failures are
    /// logged and swallowed.
    pub(crate) async fn revoke(&self, token: &InstallationToken) -> bool {
        let timeout = self.config.request_timeout;
        let outcome =
            tokio::time::timeout(timeout, self.api.revoke_installation_token(token.token())).await;

        match outcome {
            Ok(Ok(())) => {
                let active = self.release();
                debug!(
                    token_id = token.token_id(),
                    installation_id = %token.installation_id(),
                    active,
                    "Revoked installation token"
                );
                true
            }
            Ok(Err(e)) => {
                warn!(
                    token_id = token.token_id(),
                    installation_id = %token.installation_id(),
                    active = self.active(),
                    error = %e,
                    "Failed to revoke installation token"
                );
                false
            }
            Err(_) => {
                warn!(
                    token_id = token.token_id(),
                    installation_id = %token.installation_id(),
                    active = self.active(),
                    timeout = ?timeout,
                    "Timed out revoking installation token"
                );
                false
            }
        }
    }
}

// ============================================================================
// Application tokens
// ============================================================================

pub(crate) struct ApplicationMinter {
    core: Arc<IssuerCore>,
}

#[async_trait]
impl TokenMinter for ApplicationMinter {
    type Token = ApplicationToken;

    fn ensure_open(&self) -> Result<(), AuthError> {
        if self.core.closed.is_cancelled() {
            return Err(AuthError::IssuerClosed);
        }
        Ok(())
    }

    async fn mint(&self) -> Result<ApplicationToken, AuthError> {
        let core = &self.core;
        if core.closed.is_cancelled() {
            return Err(AuthError::IssuerClosed);
        }

        let token_id = core.next_token_id();
        let client_id = core.credential.client_id().clone();
        let issued_at = Utc::now();
        let ttl = chrono::Duration::from_std(core.config.app_token_ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
        let expires_at = issued_at + ttl;

        let claims = JwtClaims {
            jti: token_id.to_string(),
            iss: client_id.to_string(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
        };
        let jwt = core.signer.sign(&claims).await?;

        let token = ApplicationToken::new(jwt, token_id, client_id, issued_at, expires_at);
        let active = core.acquire();
        debug!(
            token_id,
            client_id = %token.client_id(),
            expires_at = %expires_at,
            active,
            "Minted application token"
        );

        let deadline = Instant::now() + token.time_until_expiry();
        core.spawn_monitor(monitor_application_token(Arc::clone(core), token_id, deadline));

        Ok(token)
    }
}

async fn monitor_application_token(core: Arc<IssuerCore>, token_id: u64, deadline: Instant) {
    tokio::select! {
        _ = core.closed.cancelled() => {
            let active = core.release();
            debug!(token_id, active, "Application token released on shutdown");
        }
        _ = tokio::time::sleep_until(deadline) => {
            let active = core.release();
            debug!(token_id, active, "Application token expired");
        }
    }
}

// ============================================================================
// Issuer
// ============================================================================

/// Issues GitHub App credentials at two scopes.
///
/// The application token is shared by every caller and re-minted only when
/// it comes within [`AuthConfig::app_token_refresh_margin`] of expiry.
/// Installation tokens are owned by [`InstallationClient`]s, each bound to
/// one installation and one fixed permission request.
///
/// Cloning is cheap; clones share tokens, counters and the shutdown signal.
///
/// # Examples
///
/// ```no_run
/// # use browser_github::auth::{CredentialIssuer, InstallationId, InstallationPermissions, PermissionLevel, TokenOptions};
/// # async fn example(issuer: CredentialIssuer) -> Result<(), browser_github::AuthError> {
/// let app = issuer.application_token().await?;
/// let again = issuer.application_token().await?;
/// assert_eq!(app.token_id(), again.token_id());
///
/// let options = TokenOptions::new(InstallationPermissions::new().with("contents", PermissionLevel::Read));
/// let client = issuer.installation_client(InstallationId::new(7), options)?;
/// let token = client.token().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct CredentialIssuer {
    core: Arc<IssuerCore>,
    app_tokens: Arc<TokenSource<ApplicationMinter>>,
}

impl CredentialIssuer {
    pub fn new(
        credential: AppCredential,
        signer: Arc<dyn JwtSigner>,
        api: Arc<dyn GitHubApi>,
        config: AuthConfig,
    ) -> Self {
        let margin = config.app_token_refresh_margin;
        let core = Arc::new(IssuerCore {
            credential,
            signer,
            api,
            config,
            closed: CancellationToken::new(),
            monitors: TaskTracker::new(),
            next_token_id: AtomicU64::new(0),
            active_tokens: AtomicI64::new(0),
        });

        let app_tokens = Arc::new(TokenSource::new(
            ApplicationMinter {
                core: Arc::clone(&core),
            },
            margin,
        ));

        Self { core, app_tokens }
    }

    /// Get a valid application token, minting one if needed.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::IssuerClosed` after [`close`](Self::close), or the
    /// signing error if the assertion cannot be signed.
    pub async fn application_token(&self) -> Result<ApplicationToken, AuthError> {
        if self.core.closed.is_cancelled() {
            return Err(AuthError::IssuerClosed);
        }
        self.app_tokens.token().await
    }

    /// Create a client bound to one installation and one permission request.
    ///
    /// No network call happens until the client's first
    /// [`token`](InstallationClient::token).
    ///
    /// # Errors
    ///
    /// - `AuthError::PermissionsRequired` if `options.permissions` is empty
    /// - `AuthError::IssuerClosed` after [`close`](Self::close)
    pub fn installation_client(
        &self,
        installation_id: InstallationId,
        options: TokenOptions,
    ) -> Result<InstallationClient, AuthError> {
        if options.permissions.is_empty() {
            return Err(AuthError::PermissionsRequired);
        }
        if self.core.closed.is_cancelled() {
            return Err(AuthError::IssuerClosed);
        }
        Ok(InstallationClient::new(self.clone(), installation_id, options))
    }

    /// The installation granting access to `owner/repo`.
    ///
    /// # Errors
    ///
    /// `AuthError::ApiError(ApiError::NotFound)` if the app is not installed
    /// on the repository.
    pub async fn find_repository_installation(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<Installation, AuthError> {
        let app = self.application_token().await?;
        Ok(self
            .core
            .api
            .find_repository_installation(app.token(), owner, repo)
            .await?)
    }

    /// Every installation of the app.
    pub async fn list_installations(&self) -> Result<Vec<Installation>, AuthError> {
        let app = self.application_token().await?;
        Ok(self.core.api.list_installations(app.token()).await?)
    }

    /// Shut the issuer down.
    ///
    /// Every installation token monitor revokes its token and exits, and no
    /// further tokens are minted. Non-blocking and idempotent; await
    /// [`closed`](Self::closed) to know when revocation has finished.
    pub fn close(&self) {
        if !self.core.closed.is_cancelled() {
            info!(active = self.core.active(), "Closing credential issuer");
            self.core.closed.cancel();
            self.core.monitors.close();
        }
    }

    /// Resolves once [`close`](Self::close) has been called and every token
    /// monitor has finished revoking or releasing its token.
    ///
    /// Each revocation is bounded by [`AuthConfig::request_timeout`].
    pub async fn closed(&self) {
        self.core.closed.cancelled().await;
        self.core.monitors.wait().await;
        debug!(active = self.core.active(), "Token monitors drained");
    }

    pub fn is_closed(&self) -> bool {
        self.core.closed.is_cancelled()
    }

    /// Number of application and installation tokens currently live.
    pub fn active_tokens(&self) -> i64 {
        self.core.active()
    }

    /// Git host whose repositories this issuer can serve.
    pub fn served_host(&self) -> &str {
        self.core.credential.served_host()
    }

    pub fn api(&self) -> &Arc<dyn GitHubApi> {
        &self.core.api
    }

    pub fn config(&self) -> &AuthConfig {
        &self.core.config
    }

    pub(crate) fn core(&self) -> &Arc<IssuerCore> {
        &self.core
    }
}

impl fmt::Debug for CredentialIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialIssuer")
            .field("client_id", self.core.credential.client_id())
            .field("served_host", &self.served_host())
            .field("active_tokens", &self.core.active())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
#[path = "issuer_tests.rs"]
mod tests;
