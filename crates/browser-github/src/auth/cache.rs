//! Shared installation clients keyed by installation and token scope.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use crate::auth::{CredentialIssuer, InstallationClient, InstallationId, TokenOptions};
use crate::error::AuthError;

type CacheKey = (InstallationId, TokenOptions);

/// Concurrency-safe cache of [`InstallationClient`]s.
///
/// Callers asking for the same installation with the same [`TokenOptions`]
/// share one client, and therefore one token. Closed clients are replaced
/// on the next request.
///
/// # Examples
///
/// ```no_run
/// # use std::sync::Arc;
/// # use browser_github::auth::{CredentialIssuer, InstallationClientCache, InstallationId, InstallationPermissions, PermissionLevel, TokenOptions};
/// # fn example(issuer: CredentialIssuer) -> Result<(), browser_github::AuthError> {
/// let cache = InstallationClientCache::new(issuer);
/// let options = TokenOptions::new(InstallationPermissions::new().with("contents", PermissionLevel::Read));
///
/// let a = cache.get_or_create(InstallationId::new(1), options.clone())?;
/// let b = cache.get_or_create(InstallationId::new(1), options)?;
/// assert!(Arc::ptr_eq(&a, &b));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct InstallationClientCache {
    issuer: CredentialIssuer,
    clients: DashMap<CacheKey, Arc<InstallationClient>>,
}

impl InstallationClientCache {
    pub fn new(issuer: CredentialIssuer) -> Self {
        Self {
            issuer,
            clients: DashMap::new(),
        }
    }

    /// Return the cached client for this key, creating it if absent or closed.
    ///
    /// # Errors
    ///
    /// Same as [`CredentialIssuer::installation_client`].
    pub fn get_or_create(
        &self,
        installation_id: InstallationId,
        options: TokenOptions,
    ) -> Result<Arc<InstallationClient>, AuthError> {
        match self.clients.entry((installation_id, options)) {
            Entry::Occupied(mut entry) => {
                if !entry.get().is_closed() {
                    return Ok(Arc::clone(entry.get()));
                }
                let client = Arc::new(
                    self.issuer
                        .installation_client(installation_id, entry.key().1.clone())?,
                );
                entry.insert(Arc::clone(&client));
                debug!(installation_id = %installation_id, "Replaced closed installation client");
                Ok(client)
            }
            Entry::Vacant(entry) => {
                let client = Arc::new(
                    self.issuer
                        .installation_client(installation_id, entry.key().1.clone())?,
                );
                entry.insert(Arc::clone(&client));
                debug!(installation_id = %installation_id, "Cached installation client");
                Ok(client)
            }
        }
    }

    /// Remove and close one client. Returns `false` if it was not cached.
    pub fn evict(&self, installation_id: InstallationId, options: &TokenOptions) -> bool {
        match self.clients.remove(&(installation_id, options.clone())) {
            Some((_, client)) => {
                client.close();
                true
            }
            None => false,
        }
    }

    /// Close and forget every cached client.
    pub fn close_all(&self) {
        self.clients.retain(|_, client| {
            client.close();
            false
        });
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn issuer(&self) -> &CredentialIssuer {
        &self.issuer
    }
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod tests;
