//! Correlation of in-flight credential requests with their replies.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::errors::AskpassError;

struct Waiter {
    generation: u64,
    reply: oneshot::Sender<String>,
}

/// Map of correlation ID to single-use reply slot.
///
/// Each slot is written at most once: [`resolve`](Self::resolve) removes it
/// before sending. Dropping a [`PendingSlot`] unregisters it, so abandoned
/// requests leave nothing behind.
#[derive(Clone, Default)]
pub struct PendingRequests {
    waiters: Arc<DashMap<Uuid, Waiter>>,
    generation: Arc<AtomicU64>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a slot for `request_id`.
    ///
    /// # Errors
    ///
    /// Returns `AskpassError::Conflict` if the ID is already pending.
    pub fn register(&self, request_id: Uuid) -> Result<PendingSlot, AskpassError> {
        match self.waiters.entry(request_id) {
            Entry::Occupied(_) => Err(AskpassError::Conflict { request_id }),
            Entry::Vacant(entry) => {
                let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                let (reply, rx) = oneshot::channel();
                entry.insert(Waiter { generation, reply });
                Ok(PendingSlot {
                    request_id,
                    generation,
                    rx,
                    waiters: Arc::clone(&self.waiters),
                })
            }
        }
    }

    /// Deliver `value` to the slot for `request_id`.
    ///
    /// Returns `false` if nothing is waiting (unknown, expired or already
    /// answered).
    pub fn resolve(&self, request_id: Uuid, value: String) -> bool {
        match self.waiters.remove(&request_id) {
            Some((_, waiter)) => waiter.reply.send(value).is_ok(),
            None => false,
        }
    }

    /// Drop every slot; their waiters observe the broker going away.
    pub fn clear(&self) {
        self.waiters.clear();
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }
}

/// The receiving end of one registered request.
pub struct PendingSlot {
    request_id: Uuid,
    generation: u64,
    rx: oneshot::Receiver<String>,
    waiters: Arc<DashMap<Uuid, Waiter>>,
}

impl PendingSlot {
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Wait for the reply.
    ///
    /// # Errors
    ///
    /// Returns `AskpassError::Unavailable` if the slot was dropped by
    /// [`PendingRequests::clear`].
    pub async fn wait(mut self) -> Result<String, AskpassError> {
        (&mut self.rx).await.map_err(|_| AskpassError::Unavailable {
            message: "credential broker stopped".to_string(),
        })
    }
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        let generation = self.generation;
        self.waiters
            .remove_if(&self.request_id, |_, waiter| waiter.generation == generation);
    }
}

#[cfg(test)]
#[path = "pending_tests.rs"]
mod tests;
