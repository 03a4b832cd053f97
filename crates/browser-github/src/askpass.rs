//! Bus component answering credential requests with installation tokens.
//!
//! Git asks for a username and a password separately. The username is always
//! `x-access-token`; the password is an installation token with
//! `contents: read` from the installation that owns the repository.

use std::sync::Arc;

use browser_core::bus::{Bus, Outbox, TypedInbox};
use browser_core::messages::{CredentialField, CredentialProvided, CredentialRequested};
use dashmap::DashMap;
use regex::Regex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::auth::{
    CredentialIssuer, InstallationClientCache, InstallationId, InstallationPermissions,
    PermissionLevel, TokenOptions,
};
use crate::error::AuthError;

/// Username GitHub expects alongside an installation token.
pub const TOKEN_USERNAME: &str = "x-access-token";

/// Answers [`CredentialRequested`] for repositories on the served host.
///
/// Requests for other hosts are ignored so another responder can take them.
/// When no token can be obtained the failure is logged and the request is
/// left unanswered; the broker's deadline reports it to the caller.
pub struct CredentialResponder {
    inbox: TypedInbox<CredentialRequested>,
    outbox: Outbox,
    inner: Arc<ResponderInner>,
}

struct ResponderInner {
    issuer: CredentialIssuer,
    clients: Arc<InstallationClientCache>,
    owners: DashMap<String, InstallationId>,
}

impl CredentialResponder {
    /// Join the bus. Must be called before anything is published.
    pub fn new(bus: &Bus, issuer: CredentialIssuer, clients: Arc<InstallationClientCache>) -> Self {
        let mut participant = bus.participant("credential-responder");
        participant.subscribe::<CredentialRequested>();
        let outbox = participant.outbox();

        Self {
            inbox: participant.ready().typed(),
            outbox,
            inner: Arc::new(ResponderInner {
                issuer,
                clients,
                owners: DashMap::new(),
            }),
        }
    }

    /// Serve requests until the bus closes or `cancel` fires. Each request is
    /// resolved on its own task. Returns the number of requests received.
    pub async fn run(mut self, cancel: CancellationToken) -> usize {
        let mut tasks = JoinSet::new();
        let mut received = 0;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
                request = self.inbox.recv() => {
                    let Some(request) = request else { break };
                    received += 1;

                    let inner = Arc::clone(&self.inner);
                    let outbox = self.outbox.clone();
                    tasks.spawn(async move {
                        inner.respond(&outbox, request).await;
                    });
                }
            }
        }

        tasks.shutdown().await;
        debug!(received, "Credential responder stopped");
        received
    }
}

impl ResponderInner {
    async fn respond(&self, outbox: &Outbox, request: CredentialRequested) {
        let value = match self.credential(&request).await {
            Ok(Some(value)) => value,
            Ok(None) => return,
            Err(e) => {
                warn!(
                    request_id = %request.request_id,
                    repo_url = %request.repo_url,
                    field = %request.field,
                    error = %e,
                    "Unable to provide credential"
                );
                return;
            }
        };

        if let Err(e) = outbox.publish(CredentialProvided::reply(&request, value)).await {
            debug!(request_id = %request.request_id, error = %e, "Dropped credential reply");
        }
    }

    /// `Ok(None)` means the request is not ours to answer.
    async fn credential(&self, request: &CredentialRequested) -> Result<Option<String>, AuthError> {
        let host = self.issuer.served_host();
        if request.repo_url.host_str() != Some(host) {
            debug!(
                request_id = %request.request_id,
                repo_url = %request.repo_url,
                served_host = host,
                "Ignoring credential request for another host"
            );
            return Ok(None);
        }

        match request.field {
            CredentialField::Username => Ok(Some(TOKEN_USERNAME.to_string())),
            CredentialField::Password => {
                let Some((owner, repo)) = owner_and_repo(&request.repo_url) else {
                    warn!(
                        request_id = %request.request_id,
                        repo_url = %request.repo_url,
                        "Repository URL has no owner/name path"
                    );
                    return Ok(None);
                };

                let installation_id = self.installation_for(&owner, &repo).await?;
                let client = self
                    .clients
                    .get_or_create(installation_id, contents_read())?;
                let token = client.token().await?;

                info!(
                    request_id = %request.request_id,
                    owner = %owner,
                    installation_id = %installation_id,
                    token_id = token.token_id(),
                    "Providing installation token"
                );
                Ok(Some(token.token().to_string()))
            }
        }
    }

    async fn installation_for(&self, owner: &str, repo: &str) -> Result<InstallationId, AuthError> {
        if let Some(id) = self.owners.get(owner) {
            return Ok(*id);
        }

        let installation = self.issuer.find_repository_installation(owner, repo).await?;
        self.owners.insert(owner.to_string(), installation.id);
        debug!(owner, installation_id = %installation.id, "Resolved owner installation");
        Ok(installation.id)
    }
}

fn contents_read() -> TokenOptions {
    TokenOptions::new(InstallationPermissions::new().with("contents", PermissionLevel::Read))
}

/// Extract `owner` and `repo` from `https://host/owner/repo(.git)(/...)`.
///
/// Repository names may contain dots; only one trailing `.git` is removed.
pub(crate) fn owner_and_repo(url: &Url) -> Option<(String, String)> {
    let re = Regex::new(r"^/([^/]+)/([^/]+?)(?:\.git)?(?:/|$)").ok()?;
    let captures = re.captures(url.path())?;
    Some((captures[1].to_string(), captures[2].to_string()))
}

#[cfg(test)]
#[path = "askpass_tests.rs"]
mod tests;
