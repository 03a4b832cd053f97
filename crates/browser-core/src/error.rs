//! Error types for the core pipeline primitives.

use thiserror::Error;

use crate::dispatcher::WorkerId;

/// Errors raised by the in-process message bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// The bus was closed before the operation could complete.
    #[error("message bus closed")]
    Closed,
}

/// Reasons a [`Dispatcher`](crate::dispatcher::Dispatcher) run ended early.
///
/// A run only returns `Ok` when its task source is exhausted.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The governing cancellation token fired.
    #[error("dispatcher '{dispatcher}' cancelled")]
    Cancelled { dispatcher: String },

    /// A handler returned an error, aborting the run.
    #[error("dispatcher '{dispatcher}' worker {worker_id} failed: {source}")]
    Handler {
        dispatcher: String,
        worker_id: WorkerId,
        #[source]
        source: anyhow::Error,
    },

    /// An executor task panicked.
    #[error("dispatcher '{dispatcher}' executor panicked: {message}")]
    ExecutorPanicked { dispatcher: String, message: String },
}

impl DispatchError {
    /// Returns true if the run ended because it was asked to stop.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Input validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A required field is missing.
    #[error("Required field missing: {field}")]
    Required { field: String },

    /// A field has an invalid format.
    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },
}
