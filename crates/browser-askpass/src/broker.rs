//! Bridges blocking credential requests onto the bus and back.

use std::sync::Arc;
use std::time::Duration;

use browser_core::bus::{Bus, Outbox, TypedInbox};
use browser_core::messages::{CredentialField, CredentialProvided, CredentialRequested};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

use crate::errors::AskpassError;
use crate::pending::PendingRequests;

/// Request side of the broker; cheap to clone into HTTP handlers.
///
/// Each request waits for the bus readiness barrier, registers a reply slot,
/// publishes [`CredentialRequested`] and awaits the correlated
/// [`CredentialProvided`], all within one deadline.
#[derive(Clone)]
pub struct CredentialBroker {
    inner: Arc<BrokerInner>,
}

struct BrokerInner {
    outbox: Outbox,
    pending: PendingRequests,
    timeout: Duration,
    shutdown: CancellationToken,
}

/// Reply side of the broker: resolves pending slots from bus replies.
pub struct ReplyRouter {
    inbox: TypedInbox<CredentialProvided>,
    pending: PendingRequests,
    shutdown: CancellationToken,
}

impl CredentialBroker {
    /// Join the bus. Must be called before anything is published.
    ///
    /// The returned [`ReplyRouter`] must be run for any request to succeed.
    pub fn join(bus: &Bus, timeout: Duration) -> (Self, ReplyRouter) {
        let mut participant = bus.participant("credential-broker");
        participant.subscribe::<CredentialProvided>();
        let outbox = participant.outbox();
        let inbox = participant.ready().typed();

        let pending = PendingRequests::new();
        let shutdown = CancellationToken::new();

        let broker = Self {
            inner: Arc::new(BrokerInner {
                outbox,
                pending: pending.clone(),
                timeout,
                shutdown: shutdown.clone(),
            }),
        };
        let router = ReplyRouter {
            inbox,
            pending,
            shutdown,
        };
        (broker, router)
    }

    /// Ask for one credential field.
    ///
    /// # Errors
    ///
    /// - `AskpassError::Conflict` if `request_id` is already pending
    /// - `AskpassError::Timeout` if no reply arrives within the deadline
    /// - `AskpassError::Unavailable` if the bus closes or the broker stops
    pub async fn request(
        &self,
        request_id: Uuid,
        repo_url: Url,
        field: CredentialField,
    ) -> Result<String, AskpassError> {
        let inner = &self.inner;
        let exchange = async {
            inner.outbox.bus().wait_ready().await.map_err(unavailable)?;

            let slot = inner.pending.register(request_id)?;
            inner
                .outbox
                .publish(CredentialRequested {
                    request_id,
                    repo_url,
                    field,
                })
                .await
                .map_err(unavailable)?;

            slot.wait().await
        };

        tokio::select! {
            _ = inner.shutdown.cancelled() => Err(AskpassError::Unavailable {
                message: "credential broker stopped".to_string(),
            }),
            outcome = tokio::time::timeout(inner.timeout, exchange) => match outcome {
                Ok(result) => result,
                Err(_) => {
                    debug!(request_id = %request_id, field = %field, "Credential request expired");
                    Err(AskpassError::Timeout { timeout: inner.timeout })
                }
            },
        }
    }

    /// Ask for username and password concurrently.
    pub async fn request_pair(&self, repo_url: Url) -> Result<(String, String), AskpassError> {
        tokio::try_join!(
            self.request(Uuid::new_v4(), repo_url.clone(), CredentialField::Username),
            self.request(Uuid::new_v4(), repo_url, CredentialField::Password),
        )
    }

    /// Number of requests currently waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    /// Fail every waiting and future request with `Unavailable`.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.pending.clear();
    }
}

impl ReplyRouter {
    /// Resolve replies until the bus closes or `cancel` fires. Returns the
    /// number of replies delivered to a waiting request.
    pub async fn run(mut self, cancel: CancellationToken) -> usize {
        let mut delivered = 0;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.shutdown.cancelled() => break,
                reply = self.inbox.recv() => {
                    let Some(reply) = reply else { break };
                    if self.pending.resolve(reply.request_id, reply.value) {
                        delivered += 1;
                    } else {
                        debug!(
                            request_id = %reply.request_id,
                            field = %reply.field,
                            "Discarding reply for unknown or expired request"
                        );
                    }
                }
            }
        }

        self.shutdown.cancel();
        self.pending.clear();
        info!(delivered, "Credential reply router stopped");
        delivered
    }
}

fn unavailable(e: browser_core::BusError) -> AskpassError {
    AskpassError::Unavailable {
        message: e.to_string(),
    }
}

#[cfg(test)]
#[path = "broker_tests.rs"]
mod tests;
