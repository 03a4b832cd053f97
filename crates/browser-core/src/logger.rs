//! Logs every message published on the bus.

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::bus::{Bus, Inbox};

/// Bus participant that subscribes to all message types and logs each one
/// through its [`BusMessage::log`](crate::bus::BusMessage::log) implementation.
pub struct MessageLogger {
    inbox: Inbox,
}

impl MessageLogger {
    /// Join the bus. Must be called before anything is published.
    pub fn new(bus: &Bus) -> Self {
        let mut participant = bus.participant("message-logger");
        participant.subscribe_all();
        Self {
            inbox: participant.ready(),
        }
    }

    /// Log messages until the bus closes or `cancel` fires. Returns the
    /// number of messages logged.
    pub async fn run(mut self, cancel: CancellationToken) -> usize {
        let mut logged = 0;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                envelope = self.inbox.recv() => match envelope {
                    Some(envelope) => {
                        envelope.message().log();
                        logged += 1;
                    }
                    None => break,
                },
            }
        }

        debug!(logged, "Message logger stopped");
        logged
    }
}
