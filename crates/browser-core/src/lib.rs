//! # Browser Core
//!
//! Concurrency primitives shared by every stage of the module browser
//! pipeline.
//!
//! This crate provides:
//! - [`queue::Queue`]: an unbounded FIFO used to absorb bursts of work
//! - [`dispatcher::Dispatcher`]: a bounded-concurrency worker pool that drains
//!   an inbound stream into a queue and hands work to free executors
//! - [`bus::Bus`]: the in-process publish/subscribe bus joining all components
//! - [`messages`]: the message types exchanged over the bus
//!
//! ## Usage
//!
//! ```rust
//! use browser_core::queue::Queue;
//!
//! let mut queue = Queue::new();
//! queue.push("first");
//! queue.push("second");
//!
//! assert_eq!(queue.pop(), Some("first"));
//! assert_eq!(queue.peek(), Some(&"second"));
//! ```

pub mod bus;
pub mod dispatcher;
pub mod error;
pub mod logger;
pub mod messages;
pub mod queue;

pub use bus::{Bus, BusMessage, Envelope, Inbox, Outbox, Participant};
pub use dispatcher::{Dispatcher, TaskHandler, TaskSource, WorkerId};
pub use error::{BusError, DispatchError, ValidationError};
pub use messages::{
    CredentialField, CredentialProvided, CredentialRequested, ModuleDiscovered,
    ModuleDownloaded, RepoFound, RepoId, RepoLost,
};
pub use queue::Queue;

// Re-exported so downstream crates share one cancellation type.
pub use tokio_util::sync::CancellationToken;
