//! Tests for TokenSource reuse and refresh.

use super::*;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
struct FakeToken {
    id: u64,
    expires_at: DateTime<Utc>,
}

impl ExpiringToken for FakeToken {
    fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

/// Counts mints; each token lives for `ttl` and minting takes `latency`.
struct CountingMinter {
    mints: AtomicU64,
    ttl: chrono::Duration,
    latency: Duration,
    fail: bool,
    open: AtomicBool,
}

impl CountingMinter {
    fn new(ttl: chrono::Duration) -> Self {
        Self {
            mints: AtomicU64::new(0),
            ttl,
            latency: Duration::from_millis(20),
            fail: false,
            open: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl TokenMinter for CountingMinter {
    type Token = FakeToken;

    fn ensure_open(&self) -> Result<(), AuthError> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AuthError::ClientClosed)
        }
    }

    async fn mint(&self) -> Result<FakeToken, AuthError> {
        tokio::time::sleep(self.latency).await;
        if self.fail {
            return Err(AuthError::Timeout {
                timeout: self.latency,
            });
        }
        let id = self.mints.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(FakeToken {
            id,
            expires_at: Utc::now() + self.ttl,
        })
    }
}

/// Verify concurrent callers share one mint and receive the same token.
#[tokio::test]
async fn test_concurrent_callers_share_single_mint() {
    let source = Arc::new(TokenSource::new(
        CountingMinter::new(chrono::Duration::minutes(10)),
        Duration::from_secs(5),
    ));

    let mut handles = Vec::new();
    for _ in 0..32 {
        let source = source.clone();
        handles.push(tokio::spawn(async move { source.token().await.unwrap().id }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap(), 1);
    }
    assert_eq!(source.minter().mints.load(Ordering::SeqCst), 1);
}

/// Verify a cached token is reused without minting.
#[tokio::test]
async fn test_valid_token_reused() {
    let source = TokenSource::new(
        CountingMinter::new(chrono::Duration::minutes(10)),
        Duration::from_secs(5),
    );

    let first = source.token().await.unwrap();
    let second = source.token().await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(source.minter().mints.load(Ordering::SeqCst), 1);
}

/// Verify a token inside the safety margin is replaced.
#[tokio::test]
async fn test_token_within_margin_is_reminted() {
    // Tokens live 2s but the margin is 5s: every cached token is stale.
    let source = TokenSource::new(
        CountingMinter::new(chrono::Duration::seconds(2)),
        Duration::from_secs(5),
    );

    let first = source.token().await.unwrap();
    let second = source.token().await.unwrap();

    assert_ne!(first.id, second.id);
    assert_eq!(source.minter().mints.load(Ordering::SeqCst), 2);
}

/// Verify an expired token triggers exactly one mint for simultaneous waiters.
#[tokio::test]
async fn test_expired_token_single_remint_for_waiters() {
    let source = Arc::new(TokenSource::new(
        CountingMinter::new(chrono::Duration::milliseconds(150)),
        Duration::from_millis(50),
    ));

    let first = source.token().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut handles = Vec::new();
    for _ in 0..16 {
        let source = source.clone();
        handles.push(tokio::spawn(async move { source.token().await.unwrap().id }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), first.id + 1);
    }
    assert_eq!(source.minter().mints.load(Ordering::SeqCst), 2);
}

/// Verify mint failures propagate and nothing is cached.
#[tokio::test]
async fn test_mint_failure_propagates() {
    let mut minter = CountingMinter::new(chrono::Duration::minutes(10));
    minter.fail = true;
    let source = TokenSource::new(minter, Duration::from_secs(5));

    assert!(matches!(source.token().await, Err(AuthError::Timeout { .. })));
    assert!(source.cached().await.is_none());
}

/// Verify invalidation forces a new mint.
#[tokio::test]
async fn test_invalidate_forces_remint() {
    let source = TokenSource::new(
        CountingMinter::new(chrono::Duration::minutes(10)),
        Duration::from_secs(5),
    );

    let first = source.token().await.unwrap();
    source.invalidate().await;
    let second = source.token().await.unwrap();

    assert_eq!(second.id, first.id + 1);
}

/// Verify a cached token is not handed out once the minter has closed.
#[tokio::test]
async fn test_closed_minter_withholds_cached_token() {
    let source = TokenSource::new(
        CountingMinter::new(chrono::Duration::minutes(10)),
        Duration::from_secs(5),
    );
    source.token().await.unwrap();

    source.minter().open.store(false, Ordering::SeqCst);

    assert!(matches!(source.token().await, Err(AuthError::ClientClosed)));
    assert_eq!(source.minter().mints.load(Ordering::SeqCst), 1);
}

/// Verify a caller queued behind an in-flight mint observes a close that
/// lands while it waits for the lock.
#[tokio::test]
async fn test_close_while_waiting_for_lock() {
    let mut minter = CountingMinter::new(chrono::Duration::minutes(10));
    minter.latency = Duration::from_millis(150);
    let source = Arc::new(TokenSource::new(minter, Duration::from_secs(5)));

    let minting = {
        let source = source.clone();
        tokio::spawn(async move { source.token().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    let waiting = {
        let source = source.clone();
        tokio::spawn(async move { source.token().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    source.minter().open.store(false, Ordering::SeqCst);

    assert!(minting.await.unwrap().is_ok());
    assert!(matches!(waiting.await.unwrap(), Err(AuthError::ClientClosed)));
    assert_eq!(source.minter().mints.load(Ordering::SeqCst), 1);
}
