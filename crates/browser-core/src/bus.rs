//! In-process publish/subscribe bus.
//!
//! Components join the bus as [`Participant`]s, declare the message types they
//! want to receive, and then signal readiness. Publishing waits until every
//! registered participant is ready, so no component misses a message emitted
//! during startup. Each participant receives a single ordered [`Inbox`] that
//! combines every type it subscribed to.
//!
//! Delivery order to one subscriber matches publish order. There is no
//! ordering guarantee across publishers, and no persistence or replay.
//!
//! # Examples
//!
//! ```
//! use browser_core::bus::{Bus, BusMessage};
//!
//! #[derive(Debug, Clone)]
//! struct Ping(u32);
//! impl BusMessage for Ping {}
//!
//! # tokio_test::block_on(async {
//! let bus = Bus::new();
//!
//! let mut participant = bus.participant("pinger");
//! participant.subscribe::<Ping>();
//! let outbox = participant.outbox();
//! let mut inbox = participant.ready().typed::<Ping>();
//!
//! outbox.publish(Ping(7)).await.unwrap();
//! assert_eq!(inbox.recv().await.map(|p| p.0), Some(7));
//! # });
//! ```

use std::any::{Any, TypeId};
use std::collections::HashSet;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::BusError;

// ============================================================================
// Message Trait
// ============================================================================

/// Upcast helper so trait objects can be downcast to their concrete type.
pub trait AsAny: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A message that can travel over the [`Bus`].
///
/// Implementors override [`log`](BusMessage::log) to emit a structured
/// `tracing` event describing the message; the default logs its `Debug` form.
pub trait BusMessage: AsAny + fmt::Debug {
    /// Short human-readable name of the message type.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Emit a log event describing this message.
    fn log(&self) {
        tracing::info!(payload = ?self, "{}", self.name());
    }
}

/// A published message as seen by a subscriber.
#[derive(Clone)]
pub struct Envelope {
    type_id: TypeId,
    message: Arc<dyn BusMessage>,
}

impl Envelope {
    fn new<T: BusMessage>(message: T) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            message: Arc::new(message),
        }
    }

    /// The message as a trait object.
    pub fn message(&self) -> &dyn BusMessage {
        self.message.as_ref()
    }

    /// Returns true if the message is of type `T`.
    pub fn is<T: BusMessage>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    /// Borrow the message as `T`, if that is its concrete type.
    pub fn downcast_ref<T: BusMessage>(&self) -> Option<&T> {
        <dyn BusMessage as AsAny>::as_any(self.message.as_ref()).downcast_ref::<T>()
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.message.as_ref(), f)
    }
}

// ============================================================================
// Bus
// ============================================================================

/// Handle to an in-process message bus. Cloning shares the same bus.
#[derive(Clone)]
pub struct Bus {
    inner: Arc<BusInner>,
}

struct BusInner {
    state: Mutex<BusState>,
    ready: watch::Sender<bool>,
    closed: CancellationToken,
}

#[derive(Default)]
struct BusState {
    pending: usize,
    subscribers: Vec<Subscriber>,
}

struct Subscriber {
    name: Arc<str>,
    types: HashSet<TypeId>,
    all: bool,
    tx: mpsc::UnboundedSender<Envelope>,
}

impl Subscriber {
    fn wants(&self, type_id: &TypeId) -> bool {
        self.all || self.types.contains(type_id)
    }
}

impl Bus {
    /// Create a bus with no participants.
    pub fn new() -> Self {
        let (ready, _) = watch::channel(true);
        Self {
            inner: Arc::new(BusInner {
                state: Mutex::new(BusState::default()),
                ready,
                closed: CancellationToken::new(),
            }),
        }
    }

    /// Register a new participant.
    ///
    /// Publishing is held back until every registered participant has called
    /// [`Participant::ready`] (or been dropped).
    pub fn participant(&self, name: impl Into<Arc<str>>) -> Participant {
        let name = name.into();
        {
            let mut state = self.lock();
            state.pending += 1;
            self.inner.ready.send_replace(false);
        }
        debug!(participant = %name, "Bus participant registered");

        Participant {
            bus: self.clone(),
            name,
            types: HashSet::new(),
            all: false,
            readied: false,
        }
    }

    /// Wait until every registered participant is ready.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Closed`] if the bus is closed first.
    pub async fn wait_ready(&self) -> Result<(), BusError> {
        let mut ready = self.inner.ready.subscribe();
        tokio::select! {
            result = async { ready.wait_for(|ready| *ready).await.map(|_| ()) } => {
                result.map_err(|_| BusError::Closed)
            }
            _ = self.inner.closed.cancelled() => Err(BusError::Closed),
        }
    }

    /// Returns true once every registered participant is ready.
    pub fn is_ready(&self) -> bool {
        *self.inner.ready.borrow()
    }

    /// Close the bus. Inboxes end and further publishes fail.
    pub fn close(&self) {
        self.inner.closed.cancel();
        self.lock().subscribers.clear();
        debug!("Bus closed");
    }

    /// Returns true if the bus has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    fn deliver<T: BusMessage>(&self, publisher: &str, message: T) -> Result<usize, BusError> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }

        let envelope = Envelope::new(message);
        let mut state = self.lock();
        let mut delivered = 0;

        state.subscribers.retain(|subscriber| {
            if !subscriber.wants(&envelope.type_id) {
                return true;
            }
            match subscriber.tx.send(envelope.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => {
                    debug!(participant = %subscriber.name, "Dropping subscriber with closed inbox");
                    false
                }
            }
        });

        trace!(
            publisher = publisher,
            kind = envelope.message().name(),
            delivered,
            "Message published"
        );

        Ok(delivered)
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn participant_ready(&self, subscriber: Option<Subscriber>) {
        let mut state = self.lock();
        if let Some(subscriber) = subscriber {
            if !self.is_closed() {
                state.subscribers.push(subscriber);
            }
        }
        state.pending = state.pending.saturating_sub(1);
        if state.pending == 0 {
            self.inner.ready.send_replace(true);
        }
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Bus")
            .field("pending", &state.pending)
            .field("subscribers", &state.subscribers.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ============================================================================
// Participant
// ============================================================================

/// A component joining the bus, prior to signalling readiness.
pub struct Participant {
    bus: Bus,
    name: Arc<str>,
    types: HashSet<TypeId>,
    all: bool,
    readied: bool,
}

impl Participant {
    /// Declare interest in messages of type `T`.
    pub fn subscribe<T: BusMessage>(&mut self) -> &mut Self {
        self.types.insert(TypeId::of::<T>());
        self
    }

    /// Declare interest in every message type.
    pub fn subscribe_all(&mut self) -> &mut Self {
        self.all = true;
        self
    }

    /// Obtain a publishing handle. May be taken before readiness.
    pub fn outbox(&self) -> Outbox {
        Outbox {
            bus: self.bus.clone(),
            name: self.name.clone(),
        }
    }

    /// Signal readiness and receive the ordered inbox of subscribed messages.
    pub fn ready(mut self) -> Inbox {
        let (tx, rx) = mpsc::unbounded_channel();

        let subscriber = (self.all || !self.types.is_empty()).then(|| Subscriber {
            name: self.name.clone(),
            types: std::mem::take(&mut self.types),
            all: self.all,
            tx,
        });

        self.bus.participant_ready(subscriber);
        self.readied = true;
        debug!(participant = %self.name, "Bus participant ready");

        Inbox {
            rx,
            closed: self.bus.inner.closed.clone(),
        }
    }
}

impl Drop for Participant {
    fn drop(&mut self) {
        if !self.readied {
            self.bus.participant_ready(None);
        }
    }
}

// ============================================================================
// Inbox / Outbox
// ============================================================================

/// Publishing handle for one participant.
#[derive(Clone)]
pub struct Outbox {
    bus: Bus,
    name: Arc<str>,
}

impl Outbox {
    /// Publish a message to every subscriber of its type.
    ///
    /// Waits for the readiness barrier before delivering.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Closed`] if the bus is closed.
    pub async fn publish<T: BusMessage>(&self, message: T) -> Result<(), BusError> {
        self.bus.wait_ready().await?;
        self.bus.deliver(&self.name, message)?;
        Ok(())
    }

    /// The bus this outbox publishes to.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }
}

/// Ordered stream of every message a participant subscribed to.
pub struct Inbox {
    rx: mpsc::UnboundedReceiver<Envelope>,
    closed: CancellationToken,
}

impl Inbox {
    /// Receive the next message, or `None` once the bus is closed.
    pub async fn recv(&mut self) -> Option<Envelope> {
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => None,
            envelope = self.rx.recv() => envelope,
        }
    }

    /// Narrow the inbox to messages of a single type.
    pub fn typed<T: BusMessage + Clone>(self) -> TypedInbox<T> {
        TypedInbox {
            inner: self,
            _marker: PhantomData,
        }
    }
}

/// An [`Inbox`] yielding only messages of type `T`.
pub struct TypedInbox<T> {
    inner: Inbox,
    _marker: PhantomData<fn() -> T>,
}

impl<T: BusMessage + Clone> TypedInbox<T> {
    /// Receive the next `T`, skipping messages of any other type.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            let envelope = self.inner.recv().await?;
            if let Some(message) = envelope.downcast_ref::<T>() {
                return Some(message.clone());
            }
        }
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
