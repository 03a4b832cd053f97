//! Tests for the bounded-concurrency dispatcher.

use super::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

// ============================================================================
// Test Handlers
// ============================================================================

/// Tracks how many invocations run at once and which items completed.
#[derive(Default)]
struct ConcurrencyProbe {
    running: AtomicUsize,
    max_running: AtomicUsize,
    completed: Mutex<Vec<u32>>,
    delay: Duration,
}

#[async_trait]
impl TaskHandler<u32> for ConcurrencyProbe {
    async fn handle(&self, _cancel: &CancellationToken, _worker: WorkerId, item: u32) -> anyhow::Result<()> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;

        self.running.fetch_sub(1, Ordering::SeqCst);
        self.completed.lock().unwrap().push(item);
        Ok(())
    }
}

/// Never completes until cancelled; counts how many items were started.
#[derive(Default)]
struct Stalled {
    started: AtomicUsize,
}

#[async_trait]
impl TaskHandler<u32> for Arc<Stalled> {
    async fn handle(&self, cancel: &CancellationToken, _worker: WorkerId, _item: u32) -> anyhow::Result<()> {
        self.started.fetch_add(1, Ordering::SeqCst);
        cancel.cancelled().await;
        Ok(())
    }
}

/// Records the order items are handed out in.
#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<(WorkerId, u32)>>,
}

#[async_trait]
impl TaskHandler<u32> for Arc<Recorder> {
    async fn handle(&self, _cancel: &CancellationToken, worker: WorkerId, item: u32) -> anyhow::Result<()> {
        self.seen.lock().unwrap().push((worker, item));
        Ok(())
    }
}

/// Fails on one specific item.
struct FailOn {
    poison: u32,
    handled: AtomicUsize,
}

#[async_trait]
impl TaskHandler<u32> for Arc<FailOn> {
    async fn handle(&self, _cancel: &CancellationToken, _worker: WorkerId, item: u32) -> anyhow::Result<()> {
        if item == self.poison {
            anyhow::bail!("cannot process item {item}");
        }
        self.handled.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn source_of(items: impl IntoIterator<Item = u32>) -> mpsc::UnboundedReceiver<u32> {
    let (tx, rx) = mpsc::unbounded_channel();
    for item in items {
        tx.send(item).unwrap();
    }
    rx
}

// ============================================================================
// Tests
// ============================================================================

mod concurrency_tests {
    use super::*;

    /// Verify no more than N handlers ever run at once and all M items complete.
    #[tokio::test]
    async fn test_bounded_concurrency_completes_burst() {
        const WORKERS: usize = 4;
        const BURST: u32 = 40;

        let probe = Arc::new(ConcurrencyProbe {
            delay: Duration::from_millis(5),
            ..Default::default()
        });

        let dispatcher = Dispatcher::new("probe", ProbeHandle(probe.clone())).with_workers(WORKERS);
        let result = dispatcher
            .run(&CancellationToken::new(), source_of(0..BURST))
            .await;

        assert!(result.is_ok(), "unexpected error: {result:?}");
        assert!(probe.max_running.load(Ordering::SeqCst) <= WORKERS);
        assert!(probe.max_running.load(Ordering::SeqCst) > 1, "work should overlap");

        let mut completed = probe.completed.lock().unwrap().clone();
        completed.sort_unstable();
        assert_eq!(completed, (0..BURST).collect::<Vec<_>>());
    }

    /// Verify zero workers is clamped to one executor.
    #[test]
    fn test_zero_workers_clamped() {
        let dispatcher = Dispatcher::new("clamped", ProbeHandle(Arc::default())).with_workers(0);
        assert_eq!(dispatcher.workers(), 1);
    }

    #[test]
    fn test_default_workers_positive() {
        assert!(default_workers() >= 1);
    }

    struct ProbeHandle(Arc<ConcurrencyProbe>);

    #[async_trait]
    impl TaskHandler<u32> for ProbeHandle {
        async fn handle(&self, cancel: &CancellationToken, worker: WorkerId, item: u32) -> anyhow::Result<()> {
            self.0.handle(cancel, worker, item).await
        }
    }
}

mod ingestion_tests {
    use super::*;

    /// Verify producers keep publishing while every handler is stalled.
    #[tokio::test]
    async fn test_publishing_never_blocks_on_handlers() {
        const WORKERS: usize = 2;
        const PUBLISHED: u32 = 10_000;

        let stalled = Arc::new(Stalled::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let dispatcher = Dispatcher::new("stalled", stalled.clone()).with_workers(WORKERS);
        let run = {
            let cancel = cancel.clone();
            tokio::spawn(async move { dispatcher.run(&cancel, rx).await })
        };

        let publishing = tokio::time::timeout(Duration::from_secs(5), async {
            for i in 0..PUBLISHED {
                tx.send(i).unwrap();
                if i % 500 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        })
        .await;
        assert!(publishing.is_ok(), "publishing blocked on stalled handlers");

        // Let the coordinator drain the inbox into its queue.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(stalled.started.load(Ordering::SeqCst), WORKERS);

        cancel.cancel();
        let result = run.await.unwrap();
        assert!(matches!(result, Err(DispatchError::Cancelled { .. })));
        assert_eq!(stalled.started.load(Ordering::SeqCst), WORKERS);
    }
}

mod ordering_tests {
    use super::*;

    /// Verify a single executor sees items in arrival order.
    #[tokio::test]
    async fn test_dispatch_order_matches_arrival() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = Dispatcher::new("ordered", recorder.clone()).with_workers(1);

        dispatcher
            .run(&CancellationToken::new(), source_of(0..200))
            .await
            .unwrap();

        let seen = recorder.seen.lock().unwrap();
        let items: Vec<u32> = seen.iter().map(|(_, item)| *item).collect();
        assert_eq!(items, (0..200).collect::<Vec<_>>());
        assert!(seen.iter().all(|(worker, _)| worker.get() == 1));
    }

    /// Verify worker identities are stable and within 1..=N.
    #[tokio::test]
    async fn test_worker_ids_in_range() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = Dispatcher::new("ids", recorder.clone()).with_workers(3);

        dispatcher
            .run(&CancellationToken::new(), source_of(0..50))
            .await
            .unwrap();

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen.len(), 50);
        assert!(seen.iter().all(|(worker, _)| (1..=3).contains(&worker.get())));
    }
}

mod failure_tests {
    use super::*;

    /// Verify a handler error aborts the run with that error.
    #[tokio::test]
    async fn test_handler_error_is_fail_fast() {
        let handler = Arc::new(FailOn {
            poison: 5,
            handled: AtomicUsize::new(0),
        });
        let (tx, rx) = mpsc::unbounded_channel();
        for i in 0..10 {
            tx.send(i).unwrap();
        }
        // Keep the sender alive: the run must end because of the failure,
        // not because the source was exhausted.
        let dispatcher = Dispatcher::new("failing", handler.clone()).with_workers(1);

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            dispatcher.run(&CancellationToken::new(), rx),
        )
        .await
        .expect("dispatcher did not stop after handler failure");

        match result {
            Err(DispatchError::Handler { worker_id, source, .. }) => {
                assert_eq!(worker_id.get(), 1);
                assert!(source.to_string().contains("item 5"));
            }
            other => panic!("expected handler error, got {other:?}"),
        }
        assert_eq!(handler.handled.load(Ordering::SeqCst), 5);
        drop(tx);
    }

    /// Verify an externally cancelled run reports cancellation.
    #[tokio::test]
    async fn test_cancellation_reported() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let (_tx, rx) = mpsc::unbounded_channel::<u32>();
        let dispatcher = Dispatcher::new("cancelled", Arc::new(Recorder::default()));

        let result = dispatcher.run(&cancel, rx).await;
        assert!(result.unwrap_err().is_cancelled());
    }
}
