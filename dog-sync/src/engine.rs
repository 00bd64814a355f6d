use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::{
    adapter::SyncAdapter,
    admission::{Admission, AdmissionControl, SlidingWindowLimiter},
    clock::{Clock, RuntimeClock},
    config::SyncSettings,
    execution::{BatchProcessor, CancelHandle, CancelSignal, ItemExecutor, QueueDriver, RetryPolicy},
    observability::{
        AuditSink, BoxStream, BroadcastAuditSink, FanoutAuditSink, LiveMetrics, MetricsSnapshot,
        TracingAuditSink,
    },
    store::{MemoryQueueStore, NewQueue, QueueStore},
    SyncError, SyncResult,
    types::{AuditEvent, ItemStatus, NewItem, QueueId, RunConfig, SyncQueue, SyncQueueItem, TenantId},
};

/// Request to create one sync queue
#[derive(Debug, Clone)]
pub struct CreateQueueRequest {
    /// Raw tenant id, validated before anything else
    pub tenant_id: String,
    pub entity_type: String,
    pub items: Vec<NewItem>,
    /// Falls back to the engine's default run configuration
    pub config: Option<RunConfig>,
    /// Wall-clock budget for the driver; falls back to `default_timeout`
    pub timeout: Option<Duration>,
}

impl CreateQueueRequest {
    pub fn new(tenant_id: impl Into<String>, entity_type: impl Into<String>, items: Vec<NewItem>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            entity_type: entity_type.into(),
            items,
            config: None,
            timeout: None,
        }
    }

    pub fn with_config(mut self, config: RunConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Handle for a spawned queue driver
#[derive(Debug)]
pub struct DriverHandle {
    queue_id: QueueId,
    cancel: CancelHandle,
    join_handle: JoinHandle<SyncResult<SyncQueue>>,
}

impl DriverHandle {
    pub fn queue_id(&self) -> &QueueId {
        &self.queue_id
    }

    /// Ask the driver to stop before its next batch; the queue ends `failed`
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join_handle.is_finished()
    }

    /// Wait for the driver and return the terminal queue record
    pub async fn join(self) -> SyncResult<SyncQueue> {
        self.join_handle
            .await
            .map_err(|e| SyncError::Internal(format!("Driver join error: {}", e)))?
    }
}

/// Immediate acknowledgment of a created queue.
///
/// Dropping the receipt detaches the driver; it keeps running.
#[derive(Debug)]
pub struct QueueReceipt {
    pub queue_id: QueueId,
    pub admission: Admission,
    pub handle: DriverHandle,
}

/// Builder for [`SyncEngine`]; only the adapter is required
pub struct SyncEngineBuilder {
    adapter: Arc<dyn SyncAdapter>,
    store: Option<Arc<dyn QueueStore>>,
    admission: Option<Arc<dyn AdmissionControl>>,
    audit: Option<Arc<dyn AuditSink>>,
    clock: Option<Arc<dyn Clock>>,
    settings: SyncSettings,
}

impl SyncEngineBuilder {
    pub fn with_store(mut self, store: Arc<dyn QueueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_admission(mut self, admission: Arc<dyn AdmissionControl>) -> Self {
        self.admission = Some(admission);
        self
    }

    /// Sink that receives audit events next to the engine's event stream.
    /// Defaults to [`TracingAuditSink`].
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_settings(mut self, settings: SyncSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> SyncResult<SyncEngine> {
        let settings = self.settings;
        settings.validate()?;

        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(RuntimeClock::new()) as Arc<dyn Clock>);
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryQueueStore::with_clock(clock.clone())) as Arc<dyn QueueStore>);
        let admission = self
            .admission
            .unwrap_or_else(|| {
                Arc::new(SlidingWindowLimiter::with_clock(settings.admission, clock.clone()))
                    as Arc<dyn AdmissionControl>
            });

        let events = BroadcastAuditSink::new(settings.event_capacity);
        let external = self
            .audit
            .unwrap_or_else(|| Arc::new(TracingAuditSink) as Arc<dyn AuditSink>);
        let audit: Arc<dyn AuditSink> = Arc::new(
            FanoutAuditSink::new()
                .with_sink(Arc::new(events.clone()))
                .with_sink(external),
        );
        let metrics = Arc::new(LiveMetrics::new());

        let processor = BatchProcessor::new(
            store.clone(),
            ItemExecutor::new(self.adapter.clone()),
            audit.clone(),
            metrics.clone(),
            clock.clone(),
            RetryPolicy::new(settings.max_retry_backoff, settings.retry_jitter),
        );
        let driver = QueueDriver::new(store.clone(), processor, audit, metrics.clone(), clock);

        Ok(SyncEngine {
            active: Arc::new(DashSet::new()),
            workers: Arc::new(Semaphore::new(settings.max_concurrent_queues)),
            store,
            adapter: self.adapter,
            admission,
            events,
            metrics,
            driver: Arc::new(driver),
            settings: Arc::new(settings),
        })
    }
}

/// Entry point for running sync queues.
///
/// Queue creation returns as soon as the queue is persisted; the driver
/// runs on a tokio task, bounded by `max_concurrent_queues`. Drivers
/// waiting for a slot leave their queue in `pending`.
#[derive(Clone)]
pub struct SyncEngine {
    store: Arc<dyn QueueStore>,
    adapter: Arc<dyn SyncAdapter>,
    admission: Arc<dyn AdmissionControl>,
    events: BroadcastAuditSink,
    metrics: Arc<LiveMetrics>,
    driver: Arc<QueueDriver>,
    workers: Arc<Semaphore>,
    /// Queues with a live driver, from spawn until the task exits
    active: Arc<DashSet<QueueId>>,
    settings: Arc<SyncSettings>,
}

/// Registration of a live driver; dropping it frees the queue for `resume`
struct ActiveDriver {
    active: Arc<DashSet<QueueId>>,
    queue_id: QueueId,
}

impl Drop for ActiveDriver {
    fn drop(&mut self) {
        self.active.remove(&self.queue_id);
    }
}

impl SyncEngine {
    pub fn builder(adapter: Arc<dyn SyncAdapter>) -> SyncEngineBuilder {
        SyncEngineBuilder {
            adapter,
            store: None,
            admission: None,
            audit: None,
            clock: None,
            settings: SyncSettings::default(),
        }
    }

    /// Validate, admit and persist a queue, then start its driver.
    ///
    /// Validation runs before admission so malformed requests do not use
    /// up a tenant's quota. Nothing is persisted unless both pass.
    #[instrument(skip(self, request), fields(tenant_id = %request.tenant_id, entity_type = %request.entity_type, items = request.items.len()))]
    pub async fn create_queue(&self, request: CreateQueueRequest) -> SyncResult<QueueReceipt> {
        let tenant = TenantId::parse(request.tenant_id)?;
        let config = request
            .config
            .unwrap_or_else(|| self.settings.default_run.clone());
        let timeout = request.timeout.unwrap_or(self.settings.default_timeout);
        let new_queue = NewQueue::new(request.entity_type, config, request.items);
        self.validate(&new_queue)?;
        if timeout.is_zero() {
            return Err(SyncError::InvalidConfig("timeout must be greater than zero".to_string()));
        }

        let admission = self.admit(&tenant).await?;

        let queue_id = self.store.create_queue(&tenant, new_queue).await?;
        self.metrics.increment_queues_created();
        info!(queue_id = %queue_id, remaining = admission.remaining, "Sync queue created");

        let registration = self.register(&queue_id)?;
        let handle = self.spawn_driver(tenant, queue_id.clone(), timeout, registration);
        Ok(QueueReceipt {
            queue_id,
            admission,
            handle,
        })
    }

    /// Current queue record; absent and foreign queues look the same
    pub async fn get_queue_status(&self, tenant: &TenantId, queue_id: &QueueId) -> SyncResult<SyncQueue> {
        self.store
            .get_queue(tenant, queue_id)
            .await?
            .ok_or_else(|| SyncError::QueueNotFound(queue_id.to_string()))
    }

    pub async fn list_items(&self, tenant: &TenantId, queue_id: &QueueId) -> SyncResult<Vec<SyncQueueItem>> {
        self.store.list_items(tenant, queue_id).await
    }

    /// Create a new queue from the unfinished items of a terminal queue.
    ///
    /// `pending` and `failed` items are copied in their original order with
    /// fresh retry counters. Without `config` the original run configuration
    /// is reused. The new queue goes through admission like any other.
    #[instrument(skip(self, config), fields(tenant_id = %tenant, queue_id = %queue_id))]
    pub async fn resubmit(
        &self,
        tenant: &TenantId,
        queue_id: &QueueId,
        config: Option<RunConfig>,
    ) -> SyncResult<QueueReceipt> {
        let queue = self.get_queue_status(tenant, queue_id).await?;
        if !queue.is_terminal() {
            return Err(SyncError::QueueActive(queue_id.to_string()));
        }

        let items: Vec<NewItem> = self
            .store
            .list_items(tenant, queue_id)
            .await?
            .into_iter()
            .filter(|item| item.status != ItemStatus::Completed)
            .map(|item| NewItem {
                external_id: item.external_id,
                operation: item.operation,
                payload: item.payload,
            })
            .collect();

        info!(items = items.len(), "Resubmitting unfinished items");
        let request = CreateQueueRequest {
            tenant_id: tenant.to_string(),
            entity_type: queue.entity_type,
            items,
            config: Some(config.unwrap_or(queue.config)),
            timeout: None,
        };
        self.create_queue(request).await
    }

    /// Start a new driver for a queue left `pending` or `processing`, e.g.
    /// after a process restart. Committed batches are not replayed.
    ///
    /// Fails with [`SyncError::QueueActive`] while this engine still has a
    /// driver for the queue, including one waiting for a worker slot.
    #[instrument(skip(self), fields(tenant_id = %tenant, queue_id = %queue_id))]
    pub async fn resume(&self, tenant: &TenantId, queue_id: &QueueId) -> SyncResult<DriverHandle> {
        self.resume_with_timeout(tenant, queue_id, self.settings.default_timeout)
            .await
    }

    /// [`resume`](Self::resume) with an explicit wall-clock budget
    pub async fn resume_with_timeout(
        &self,
        tenant: &TenantId,
        queue_id: &QueueId,
        timeout: Duration,
    ) -> SyncResult<DriverHandle> {
        if timeout.is_zero() {
            return Err(SyncError::InvalidConfig("timeout must be greater than zero".to_string()));
        }
        let queue = self.get_queue_status(tenant, queue_id).await?;
        if queue.is_terminal() {
            return Err(SyncError::QueueTerminal {
                queue_id: queue_id.to_string(),
                status: queue.status,
            });
        }
        let registration = self.register(&queue.id)?;
        info!(queue_id = %queue.id, "Resuming queue driver");
        Ok(self.spawn_driver(tenant.clone(), queue.id, timeout, registration))
    }

    /// Raw audit event receiver covering every tenant
    pub fn subscribe(&self) -> broadcast::Receiver<AuditEvent> {
        self.events.subscribe()
    }

    /// Audit events for one tenant
    pub fn event_stream(&self, tenant: TenantId) -> BoxStream<AuditEvent> {
        self.events.event_stream(tenant)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    fn validate(&self, queue: &NewQueue) -> SyncResult<()> {
        queue.check_item_count()?;
        queue.config.validate()?;
        if queue.entity_type.trim().is_empty() {
            return Err(SyncError::InvalidConfig("entity_type must not be empty".to_string()));
        }
        if !self.adapter.supports(&queue.entity_type) {
            return Err(SyncError::UnsupportedEntityType(queue.entity_type.clone()));
        }
        Ok(())
    }

    async fn admit(&self, tenant: &TenantId) -> SyncResult<Admission> {
        let admission = self.admission.check(tenant).await?;
        if !admission.allowed {
            self.metrics.increment_admissions_rejected();
            warn!(reset_at = %admission.reset_at, "Queue creation rate limited");
        }
        admission.into_result()
    }

    /// Claim the queue for one driver; fails if another one is live
    fn register(&self, queue_id: &QueueId) -> SyncResult<ActiveDriver> {
        if !self.active.insert(queue_id.clone()) {
            return Err(SyncError::QueueActive(queue_id.to_string()));
        }
        Ok(ActiveDriver {
            active: self.active.clone(),
            queue_id: queue_id.clone(),
        })
    }

    fn spawn_driver(
        &self,
        tenant: TenantId,
        queue_id: QueueId,
        timeout: Duration,
        registration: ActiveDriver,
    ) -> DriverHandle {
        let (cancel, signal) = CancelSignal::pair();
        let driver = self.driver.clone();
        let workers = self.workers.clone();
        let task_queue_id = queue_id.clone();

        let join_handle = tokio::spawn(async move {
            let _registration = registration;
            let _permit = workers
                .acquire_owned()
                .await
                .map_err(|_| SyncError::Internal("worker pool closed".to_string()))?;

            let result = driver.run(&tenant, &task_queue_id, timeout, signal).await;
            if let Err(e) = &result {
                error!(tenant_id = %tenant, queue_id = %task_queue_id, error = %e, "Queue driver stopped");
            }
            result
        });

        DriverHandle {
            queue_id,
            cancel,
            join_handle,
        }
    }
}
