use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use super::BatchProcessor;
use crate::{
    clock::Clock,
    observability::{AuditSink, LiveMetrics},
    store::QueueStore,
    SyncError, SyncResult,
    types::{AuditEvent, QueueId, QueuePatch, QueuePhase, QueueStatus, SyncQueue, TenantId},
};

/// Sending half of a queue's cancellation flag
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Ask the driver to stop before its next batch
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Receiving half, checked by the driver before each batch fetch
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn pair() -> (CancelHandle, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, CancelSignal { rx })
    }

    /// A signal that never fires
    pub fn never() -> Self {
        let (_, signal) = Self::pair();
        signal
    }

    pub fn is_canceled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested; pends forever if the
    /// handle is gone without canceling
    async fn canceled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Drives a queue from `pending` to a terminal state.
///
/// Owns every queue-level status transition. Batches run one after the
/// other with `batch_delay` between them; the whole loop races a
/// wall-clock timeout.
#[derive(Clone)]
pub struct QueueDriver {
    store: Arc<dyn QueueStore>,
    processor: BatchProcessor,
    audit: Arc<dyn AuditSink>,
    metrics: Arc<LiveMetrics>,
    clock: Arc<dyn Clock>,
}

impl QueueDriver {
    pub fn new(
        store: Arc<dyn QueueStore>,
        processor: BatchProcessor,
        audit: Arc<dyn AuditSink>,
        metrics: Arc<LiveMetrics>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            processor,
            audit,
            metrics,
            clock,
        }
    }

    /// Run a queue to completion or failure.
    ///
    /// Returns the terminal queue record; a failed queue is still `Ok`.
    /// `Err` means the queue could not be started, or its terminal state
    /// could not be recorded.
    #[instrument(skip(self, cancel), fields(tenant_id = %tenant, queue_id = %queue_id))]
    pub async fn run(
        &self,
        tenant: &TenantId,
        queue_id: &QueueId,
        timeout: Duration,
        cancel: CancelSignal,
    ) -> SyncResult<SyncQueue> {
        let queue = self
            .store
            .get_queue(tenant, queue_id)
            .await?
            .ok_or_else(|| SyncError::QueueNotFound(queue_id.to_string()))?;

        if queue.is_terminal() {
            return Err(SyncError::QueueTerminal {
                queue_id: queue_id.to_string(),
                status: queue.status,
            });
        }

        let resumed = queue.status == QueueStatus::Processing;
        let queue = self
            .store
            .update_queue_status(
                tenant,
                queue_id,
                QueuePatch::status(QueueStatus::Processing).with_started_at(self.clock.now()),
            )
            .await?;

        if resumed {
            info!("Resuming sync queue");
        } else {
            info!(total_items = queue.total_items, "Sync queue started");
            self.audit.record(AuditEvent::queue(&queue, QueuePhase::Started, self.clock.now()));
        }

        let outcome = match tokio::time::timeout(timeout, self.process_loop(&queue, cancel)).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout(timeout)),
        };

        match outcome {
            Ok(()) => self.complete(&queue).await,
            Err(e) => self.fail(&queue, e).await,
        }
    }

    async fn process_loop(&self, queue: &SyncQueue, mut cancel: CancelSignal) -> SyncResult<()> {
        let tenant = &queue.tenant_id;
        let mut current = queue.clone();

        loop {
            if cancel.is_canceled() {
                return Err(SyncError::Canceled);
            }

            let report = self.processor.process_batch(&current).await?;
            current = report.queue;

            if let Some(reason) = report.adapter_unavailable {
                return Err(SyncError::AdapterUnavailable(reason));
            }

            if report.fetched == 0 {
                // Nothing due: either done, or every pending item is backing off
                match self.store.next_attempt_at(tenant, &current.id).await? {
                    None => return Ok(()),
                    Some(at) => {
                        let wait = (at - self.clock.now()).to_std().unwrap_or(Duration::ZERO);
                        debug!(wait_ms = wait.as_millis() as u64, "Waiting for retry backoff");
                        pause(wait, &mut cancel).await?;
                        continue;
                    }
                }
            }

            if report.counts.pending == 0 {
                return Ok(());
            }

            pause(current.config.batch_delay, &mut cancel).await?;
        }
    }

    async fn complete(&self, queue: &SyncQueue) -> SyncResult<SyncQueue> {
        let counts = self.store.item_counts(&queue.tenant_id, &queue.id).await?;
        let patch = QueuePatch::status(QueueStatus::Completed)
            .with_completed_at(self.clock.now())
            .with_counts(counts);

        match self.store.update_queue_status(&queue.tenant_id, &queue.id, patch).await {
            Ok(done) => {
                info!(
                    processed = done.processed_items,
                    failed = done.failed_items,
                    progress = done.progress,
                    "Sync queue completed"
                );
                self.metrics.increment_queues_completed();
                self.audit.record(AuditEvent::queue(&done, QueuePhase::Completed, self.clock.now()));
                Ok(done)
            }
            Err(e) => self.fail(queue, e).await,
        }
    }

    async fn fail(&self, queue: &SyncQueue, cause: SyncError) -> SyncResult<SyncQueue> {
        warn!(error = %cause, "Sync queue failing");
        let now = self.clock.now();

        let mut patch = QueuePatch::status(QueueStatus::Failed)
            .with_completed_at(now)
            .with_error(cause.to_string());
        if let Ok(counts) = self.store.item_counts(&queue.tenant_id, &queue.id).await {
            patch = patch.with_counts(counts);
        }

        self.metrics.increment_queues_failed();
        match self.store.update_queue_status(&queue.tenant_id, &queue.id, patch).await {
            Ok(failed) => {
                self.audit.record(AuditEvent::queue(&failed, QueuePhase::Failed, now));
                Ok(failed)
            }
            Err(store_error) => {
                error!(error = %store_error, cause = %cause, "Could not record queue failure");
                let mut snapshot = queue.clone();
                snapshot.status = QueueStatus::Failed;
                snapshot.completed_at = Some(now);
                snapshot.last_error = Some(cause.to_string());
                self.audit.record(AuditEvent::queue(&snapshot, QueuePhase::Failed, now));
                Err(store_error)
            }
        }
    }
}

/// Sleep for `duration` unless cancellation arrives first
async fn pause(duration: Duration, cancel: &mut CancelSignal) -> SyncResult<()> {
    if duration.is_zero() {
        return if cancel.is_canceled() { Err(SyncError::Canceled) } else { Ok(()) };
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(()),
        _ = cancel.canceled() => Err(SyncError::Canceled),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{json, Value};

    use crate::{
        adapter::SyncAdapter,
        clock::RuntimeClock,
        execution::{ItemExecutor, RetryPolicy},
        store::{MemoryQueueStore, NewQueue},
        types::{ItemStatus, NewItem, RunConfig},
        AdapterError,
    };

    /// Fails the first `failures` calls, then succeeds
    struct CountdownAdapter {
        failures: AtomicU32,
    }

    impl CountdownAdapter {
        fn new(failures: u32) -> Self {
            Self {
                failures: AtomicU32::new(failures),
            }
        }
    }

    #[async_trait]
    impl SyncAdapter for CountdownAdapter {
        fn supports(&self, _entity_type: &str) -> bool {
            true
        }

        async fn create_entity(&self, _entity_type: &str, _payload: &Value) -> Result<String, AdapterError> {
            Ok("remote".to_string())
        }

        async fn update_entity(&self, _entity_type: &str, _external_id: &str, _payload: &Value) -> Result<(), AdapterError> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(AdapterError::transient("timeout"));
            }
            Ok(())
        }

        async fn delete_entity(&self, _entity_type: &str, _external_id: &str) -> Result<(), AdapterError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct CollectingSink {
        events: Mutex<Vec<AuditEvent>>,
    }

    impl AuditSink for CollectingSink {
        fn record(&self, event: AuditEvent) {
            self.events.lock().push(event);
        }
    }

    impl CollectingSink {
        fn names(&self) -> Vec<&'static str> {
            self.events.lock().iter().map(|e| e.event_name()).collect()
        }
    }

    struct Fixture {
        store: Arc<MemoryQueueStore>,
        sink: Arc<CollectingSink>,
        driver: QueueDriver,
        tenant: TenantId,
        queue_id: QueueId,
    }

    async fn fixture(adapter: CountdownAdapter, items: usize, config: RunConfig) -> Fixture {
        let clock: Arc<dyn Clock> = Arc::new(RuntimeClock::new());
        let store = Arc::new(MemoryQueueStore::with_clock(clock.clone()));
        let sink = Arc::new(CollectingSink::default());
        let metrics = Arc::new(LiveMetrics::new());
        let tenant = TenantId::parse("acme").unwrap();

        let new_items = (0..items)
            .map(|i| NewItem::update(format!("ext-{i}"), json!({ "n": i })))
            .collect();
        let queue_id = store
            .create_queue(&tenant, NewQueue::new("product", config, new_items))
            .await
            .unwrap();

        let processor = BatchProcessor::new(
            store.clone(),
            ItemExecutor::new(Arc::new(adapter)),
            sink.clone(),
            metrics.clone(),
            clock.clone(),
            RetryPolicy::default(),
        );
        let driver = QueueDriver::new(store.clone(), processor, sink.clone(), metrics, clock);

        Fixture {
            store,
            sink,
            driver,
            tenant,
            queue_id,
        }
    }

    const TIMEOUT: Duration = Duration::from_secs(300);

    #[tokio::test(start_paused = true)]
    async fn test_run_completes_and_reports_lifecycle() {
        let config = RunConfig::default().with_batch_size(2);
        let fx = fixture(CountdownAdapter::new(0), 3, config).await;

        let queue = fx
            .driver
            .run(&fx.tenant, &fx.queue_id, TIMEOUT, CancelSignal::never())
            .await
            .unwrap();

        assert_eq!(queue.status, QueueStatus::Completed);
        assert_eq!(queue.processed_items, 3);
        assert_eq!(queue.progress, 100);
        assert!(queue.started_at.is_some());
        assert!(queue.completed_at >= queue.started_at);
        assert_eq!(fx.sink.names(), vec!["queue_started", "queue_completed"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_out_backoff_before_retrying() {
        let config = RunConfig::default()
            .with_batch_delay(Duration::ZERO)
            .with_retry_delay(Duration::from_secs(5));
        let fx = fixture(CountdownAdapter::new(1), 1, config).await;

        let started = tokio::time::Instant::now();
        let queue = fx
            .driver
            .run(&fx.tenant, &fx.queue_id, TIMEOUT, CancelSignal::never())
            .await
            .unwrap();

        assert_eq!(queue.status, QueueStatus::Completed);
        assert!(started.elapsed() >= Duration::from_secs(5));

        let items = fx.store.list_items(&fx.tenant, &fx.queue_id).await.unwrap();
        assert_eq!(items[0].status, ItemStatus::Completed);
        assert_eq!(items[0].retry_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_fails_queue_and_keeps_items_pending() {
        let fx = fixture(CountdownAdapter::new(0), 4, RunConfig::default()).await;
        let (handle, signal) = CancelSignal::pair();
        handle.cancel();

        let queue = fx
            .driver
            .run(&fx.tenant, &fx.queue_id, TIMEOUT, signal)
            .await
            .unwrap();

        assert_eq!(queue.status, QueueStatus::Failed);
        assert_eq!(queue.last_error.as_deref(), Some("Queue processing was canceled"));
        let counts = fx.store.item_counts(&fx.tenant, &fx.queue_id).await.unwrap();
        assert_eq!(counts.pending, 4);
        assert_eq!(fx.sink.names(), vec!["queue_started", "queue_failed"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_batch_delay() {
        let config = RunConfig::default()
            .with_batch_size(1)
            .with_batch_delay(Duration::from_secs(60));
        let fx = fixture(CountdownAdapter::new(0), 3, config).await;
        let (handle, signal) = CancelSignal::pair();

        let driver = fx.driver.clone();
        let tenant = fx.tenant.clone();
        let queue_id = fx.queue_id.clone();
        let task = tokio::spawn(async move { driver.run(&tenant, &queue_id, TIMEOUT, signal).await });

        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.cancel();
        let queue = task.await.unwrap().unwrap();

        assert_eq!(queue.status, QueueStatus::Failed);
        assert_eq!(queue.processed_items, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_queue_is_not_rerun() {
        let fx = fixture(CountdownAdapter::new(0), 1, RunConfig::default()).await;
        fx.driver
            .run(&fx.tenant, &fx.queue_id, TIMEOUT, CancelSignal::never())
            .await
            .unwrap();

        let again = fx
            .driver
            .run(&fx.tenant, &fx.queue_id, TIMEOUT, CancelSignal::never())
            .await;
        assert!(matches!(
            again,
            Err(SyncError::QueueTerminal { status: QueueStatus::Completed, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resumed_run_keeps_started_at() {
        let fx = fixture(CountdownAdapter::new(0), 2, RunConfig::default()).await;
        let first = fx
            .store
            .update_queue_status(
                &fx.tenant,
                &fx.queue_id,
                QueuePatch::status(QueueStatus::Processing).with_started_at(chrono::Utc::now()),
            )
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(10)).await;
        let queue = fx
            .driver
            .run(&fx.tenant, &fx.queue_id, TIMEOUT, CancelSignal::never())
            .await
            .unwrap();

        assert_eq!(queue.started_at, first.started_at);
        assert_eq!(queue.status, QueueStatus::Completed);
        // Resumed runs do not announce a second start
        assert_eq!(fx.sink.names(), vec!["queue_completed"]);
    }
}
