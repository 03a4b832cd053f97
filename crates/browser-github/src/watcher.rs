//! Enumerates the repositories visible to the app and the Go modules in them.

use std::sync::Arc;

use browser_core::bus::{Bus, Outbox};
use browser_core::messages::{ModuleDiscovered, RepoFound, RepoId};
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::{
    CredentialIssuer, InstallationClient, InstallationClientCache, InstallationPermissions,
    PermissionLevel, TokenOptions,
};
use crate::client::{Installation, Repository};
use crate::error::{AuthError, WatchError};

const GO_MOD: &str = "go.mod";

/// Counts from one pass over the installations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchSummary {
    pub installations: usize,
    pub repositories: usize,
    pub ignored: usize,
    pub modules: usize,
}

/// Publishes [`RepoFound`] for every repository the app can see and
/// [`ModuleDiscovered`] for each one whose root `go.mod` declares a module.
///
/// Forks, archived repositories and templates are skipped. A repository that
/// cannot be inspected is logged and skipped; failing to list installations
/// or repositories, or to publish, stops the pass.
pub struct RepositoryWatcher {
    outbox: Outbox,
    issuer: CredentialIssuer,
    clients: Arc<InstallationClientCache>,
}

impl RepositoryWatcher {
    /// Join the bus. Must be called before anything is published.
    pub fn new(bus: &Bus, issuer: CredentialIssuer, clients: Arc<InstallationClientCache>) -> Self {
        let participant = bus.participant("repository-watcher");
        let outbox = participant.outbox();
        drop(participant.ready());

        Self {
            outbox,
            issuer,
            clients,
        }
    }

    /// Walk every installation once.
    ///
    /// # Errors
    ///
    /// Returns `WatchError::Auth` if installations or repositories cannot be
    /// listed and `WatchError::Bus` if the bus closes.
    pub async fn run(self, cancel: CancellationToken) -> Result<WatchSummary, WatchError> {
        let mut summary = WatchSummary::default();
        let installations = self.issuer.list_installations().await?;

        for installation in &installations {
            if cancel.is_cancelled() {
                debug!("Repository watcher cancelled");
                break;
            }
            self.add_installation(installation, &cancel, &mut summary)
                .await?;
            summary.installations += 1;
        }

        info!(
            installations = summary.installations,
            repositories = summary.repositories,
            ignored = summary.ignored,
            modules = summary.modules,
            "Repository scan complete"
        );
        Ok(summary)
    }

    async fn add_installation(
        &self,
        installation: &Installation,
        cancel: &CancellationToken,
        summary: &mut WatchSummary,
    ) -> Result<(), WatchError> {
        let client = self.clients.get_or_create(installation.id, read_only())?;
        let repositories = client.list_repositories().await?;

        debug!(
            installation_id = %installation.id,
            account = %installation.account.login,
            repositories = repositories.len(),
            "Listed installation repositories"
        );

        for repo in &repositories {
            if cancel.is_cancelled() {
                break;
            }
            if repo.is_ignored() {
                debug!(repo = %repo.full_name, "Ignoring fork, archive or template");
                summary.ignored += 1;
                continue;
            }

            self.outbox
                .publish(RepoFound {
                    repo_source: self.issuer.served_host().to_string(),
                    repo_id: RepoId::new(repo.id.as_u64()),
                    repo_name: repo.full_name.clone(),
                    clone_url: repo.clone_url.clone(),
                })
                .await?;
            summary.repositories += 1;

            match self.discover_module(&client, repo).await {
                Ok(Some(module)) => {
                    self.outbox.publish(module).await?;
                    summary.modules += 1;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(repo = %repo.full_name, error = %e, "Unable to inspect repository");
                }
            }
        }

        Ok(())
    }

    async fn discover_module(
        &self,
        client: &InstallationClient,
        repo: &Repository,
    ) -> Result<Option<ModuleDiscovered>, AuthError> {
        let owner = repo.owner.login.as_str();
        let reference = repo.default_branch.as_deref().unwrap_or("HEAD");

        let sha = client.commit_sha(owner, &repo.name, reference).await?;
        let Some(go_mod) = client.file_contents(owner, &repo.name, GO_MOD, &sha).await? else {
            debug!(repo = %repo.full_name, "No go.mod at repository root");
            return Ok(None);
        };

        let Some(module_path) = module_path(&go_mod) else {
            warn!(repo = %repo.full_name, "go.mod has no module directive");
            return Ok(None);
        };

        Ok(Some(ModuleDiscovered {
            repo_source: self.issuer.served_host().to_string(),
            repo_id: RepoId::new(repo.id.as_u64()),
            module_path,
            module_version: sha,
        }))
    }
}

fn read_only() -> TokenOptions {
    TokenOptions::new(
        InstallationPermissions::new()
            .with("contents", PermissionLevel::Read)
            .with("metadata", PermissionLevel::Read),
    )
}

/// The path declared by the `module` directive of a `go.mod` file.
pub(crate) fn module_path(go_mod: &str) -> Option<String> {
    let re = Regex::new(r#"(?m)^\s*module\s+"?([^\s"]+)"?"#).ok()?;
    re.captures(go_mod).map(|captures| captures[1].to_string())
}

#[cfg(test)]
#[path = "watcher_tests.rs"]
mod tests;
