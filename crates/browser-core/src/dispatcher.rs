//! Bounded-concurrency worker pool.
//!
//! A [`Dispatcher`] drains an inbound [`TaskSource`] into an unbounded
//! [`Queue`] and hands the head of that queue to whichever executor becomes
//! free first. Producers never wait on handler execution: the queue absorbs
//! bursts and only parallelism is bounded.
//!
//! Dispatch order equals arrival order. Completion order across executors is
//! unspecified.
//!
//! # Examples
//!
//! ```
//! use async_trait::async_trait;
//! use browser_core::dispatcher::{Dispatcher, TaskHandler, WorkerId};
//! use tokio_util::sync::CancellationToken;
//!
//! struct Print;
//!
//! #[async_trait]
//! impl TaskHandler<u32> for Print {
//!     async fn handle(
//!         &self,
//!         _cancel: &CancellationToken,
//!         worker: WorkerId,
//!         item: u32,
//!     ) -> anyhow::Result<()> {
//!         println!("worker {worker} handled {item}");
//!         Ok(())
//!     }
//! }
//!
//! # tokio_test::block_on(async {
//! let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
//! for i in 0..10 {
//!     tx.send(i).unwrap();
//! }
//! drop(tx);
//!
//! let dispatcher = Dispatcher::new("print", Print).with_workers(3);
//! dispatcher.run(&CancellationToken::new(), rx).await.unwrap();
//! # });
//! ```

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bus::{BusMessage, TypedInbox};
use crate::error::DispatchError;
use crate::queue::Queue;

// ============================================================================
// Worker Identity
// ============================================================================

/// Stable identity of one executor within a dispatcher, numbered from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(usize);

impl WorkerId {
    pub fn get(&self) -> usize {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Seams
// ============================================================================

/// Inbound stream of work items.
///
/// `next` must be cancel-safe: the dispatcher drops the returned future when
/// another event wins the race, and no item may be lost when that happens.
#[async_trait]
pub trait TaskSource<M>: Send {
    /// The next item, or `None` once the source is exhausted.
    async fn next(&mut self) -> Option<M>;
}

#[async_trait]
impl<M: Send> TaskSource<M> for mpsc::UnboundedReceiver<M> {
    async fn next(&mut self) -> Option<M> {
        self.recv().await
    }
}

#[async_trait]
impl<M: BusMessage + Clone> TaskSource<M> for TypedInbox<M> {
    async fn next(&mut self) -> Option<M> {
        self.recv().await
    }
}

/// Processes one work item.
#[async_trait]
pub trait TaskHandler<M>: Send + Sync + 'static {
    /// Handle `item` on executor `worker`.
    ///
    /// `cancel` fires when the dispatcher shuts down. Returning an error
    /// aborts the whole dispatcher run.
    async fn handle(
        &self,
        cancel: &CancellationToken,
        worker: WorkerId,
        item: M,
    ) -> anyhow::Result<()>;
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Number of executors used when none is configured.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

/// Worker pool draining one task source through a fixed set of executors.
pub struct Dispatcher<H> {
    name: Arc<str>,
    workers: usize,
    handler: Arc<H>,
}

impl<H> Dispatcher<H> {
    /// Create a dispatcher with [`default_workers`] executors.
    pub fn new(name: impl Into<Arc<str>>, handler: H) -> Self {
        Self {
            name: name.into(),
            workers: default_workers(),
            handler: Arc::new(handler),
        }
    }

    /// Set the executor count. Zero is treated as one.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run until the source is exhausted, `cancel` fires or a handler fails.
    ///
    /// On shutdown no further input is read, executors finish their
    /// in-flight item and exit, and this returns once all of them have.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::Handler`] with the first handler failure
    /// - [`DispatchError::Cancelled`] if `cancel` fired
    /// - [`DispatchError::ExecutorPanicked`] if an executor panicked
    pub async fn run<M, S>(&self, cancel: &CancellationToken, mut source: S) -> Result<(), DispatchError>
    where
        M: Send + 'static,
        S: TaskSource<M>,
        H: TaskHandler<M>,
    {
        let group = cancel.child_token();

        // Capacity equals the executor count: each executor has at most one
        // outstanding slot, so offering readiness never blocks.
        let (ready_tx, mut ready_rx) = mpsc::channel::<oneshot::Sender<M>>(self.workers);

        let mut executors = JoinSet::new();
        for id in 1..=self.workers {
            executors.spawn(execute(
                self.name.clone(),
                WorkerId(id),
                self.handler.clone(),
                group.clone(),
                ready_tx.clone(),
            ));
        }
        drop(ready_tx);

        info!(dispatcher = %self.name, workers = self.workers, "Dispatcher started");

        let mut queue = Queue::new();
        let mut source_open = true;
        let mut first_error = None;

        loop {
            if !source_open && queue.is_empty() {
                debug!(dispatcher = %self.name, "Source exhausted and queue drained");
                break;
            }

            tokio::select! {
                _ = group.cancelled() => break,

                Some(slot) = ready_rx.recv(), if !queue.is_empty() => {
                    if slot.is_closed() {
                        continue;
                    }
                    if let Some(item) = queue.pop() {
                        if slot.send(item).is_err() {
                            warn!(dispatcher = %self.name, "Executor exited before accepting an item");
                        }
                    }
                }

                item = source.next(), if source_open => match item {
                    Some(item) => queue.push(item),
                    None => source_open = false,
                },

                Some(joined) = executors.join_next() => {
                    // Executors only exit early on failure.
                    first_error = first_error.or(joined_error(&self.name, joined));
                    group.cancel();
                    break;
                }
            }
        }

        drop(ready_rx);

        while let Some(joined) = executors.join_next().await {
            if let Some(err) = joined_error(&self.name, joined) {
                first_error.get_or_insert(err);
            }
        }

        if !queue.is_empty() {
            debug!(dispatcher = %self.name, abandoned = queue.len(), "Dispatcher stopped with queued items");
        }

        match first_error {
            Some(err) => {
                error!(dispatcher = %self.name, error = %err, "Dispatcher failed");
                Err(err)
            }
            None if group.is_cancelled() => {
                info!(dispatcher = %self.name, "Dispatcher cancelled");
                Err(DispatchError::Cancelled {
                    dispatcher: self.name.to_string(),
                })
            }
            None => {
                info!(dispatcher = %self.name, "Dispatcher finished");
                Ok(())
            }
        }
    }
}

impl<H> fmt::Debug for Dispatcher<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("name", &self.name)
            .field("workers", &self.workers)
            .finish()
    }
}

fn joined_error(
    dispatcher: &str,
    joined: Result<Result<(), DispatchError>, tokio::task::JoinError>,
) -> Option<DispatchError> {
    match joined {
        Ok(Ok(())) => None,
        Ok(Err(err)) => Some(err),
        Err(join_err) => Some(DispatchError::ExecutorPanicked {
            dispatcher: dispatcher.to_string(),
            message: join_err.to_string(),
        }),
    }
}

/// Executor loop: offer a slot, wait for an item, handle it, repeat.
///
/// Exits when the coordinator stops accepting slots or drops the one offered.
async fn execute<M, H>(
    dispatcher: Arc<str>,
    worker: WorkerId,
    handler: Arc<H>,
    cancel: CancellationToken,
    ready: mpsc::Sender<oneshot::Sender<M>>,
) -> Result<(), DispatchError>
where
    M: Send + 'static,
    H: TaskHandler<M>,
{
    loop {
        let (slot, item) = oneshot::channel();
        if ready.send(slot).await.is_err() {
            return Ok(());
        }

        let Ok(item) = item.await else {
            return Ok(());
        };

        if let Err(source) = handler.handle(&cancel, worker, item).await {
            cancel.cancel();
            return Err(DispatchError::Handler {
                dispatcher: dispatcher.to_string(),
                worker_id: worker,
                source,
            });
        }
    }
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;
