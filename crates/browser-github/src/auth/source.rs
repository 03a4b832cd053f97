//! Reusable, concurrency-safe token cache around a mint operation.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::auth::ExpiringToken;
use crate::error::AuthError;

/// Produces fresh tokens on demand.
#[async_trait]
pub trait TokenMinter: Send + Sync {
    type Token: ExpiringToken + Clone + Send + Sync;

    /// Mint a new token. Called at most once at a time per [`TokenSource`].
    async fn mint(&self) -> Result<Self::Token, AuthError>;

    /// Checked under the lock before any token, cached or new, is handed out.
    fn ensure_open(&self) -> Result<(), AuthError> {
        Ok(())
    }
}

/// Returns the cached token while it is further than `margin` from expiry,
/// otherwise mints a replacement.
///
/// The lock is held across the mint, so callers arriving mid-mint wait for
/// and share the in-flight result instead of minting again. Exactly one token
/// is current at any instant.
pub struct TokenSource<M: TokenMinter> {
    minter: M,
    margin: Duration,
    current: Mutex<Option<M::Token>>,
}

impl<M: TokenMinter> TokenSource<M> {
    pub fn new(minter: M, margin: Duration) -> Self {
        Self {
            minter,
            margin,
            current: Mutex::new(None),
        }
    }

    /// Get a valid token, minting one if the cached token is missing or stale.
    ///
    /// # Errors
    ///
    /// Propagates the minter's error unchanged; nothing is cached on failure.
    /// Returns the [`ensure_open`](TokenMinter::ensure_open) error once the
    /// minter has shut down, even while a valid token is cached.
    pub async fn token(&self) -> Result<M::Token, AuthError> {
        let mut current = self.current.lock().await;
        self.minter.ensure_open()?;

        if let Some(token) = current.as_ref() {
            if !token.expires_within(self.margin) {
                return Ok(token.clone());
            }
        }

        let token = self.minter.mint().await?;
        *current = Some(token.clone());
        Ok(token)
    }

    /// Drop the cached token so the next call mints a new one.
    pub async fn invalidate(&self) {
        self.current.lock().await.take();
    }

    /// The cached token, if any, without minting.
    pub async fn cached(&self) -> Option<M::Token> {
        self.current.lock().await.clone()
    }

    pub fn minter(&self) -> &M {
        &self.minter
    }
}

#[cfg(test)]
#[path = "source_tests.rs"]
mod tests;
