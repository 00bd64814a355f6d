use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use super::{ItemExecutor, ItemOutcome, RetryPolicy};
use crate::{
    clock::Clock,
    observability::{AuditSink, LiveMetrics},
    store::QueueStore,
    SyncResult,
    types::{AuditEvent, ItemCounts, ItemStatus, ItemUpdate, QueuePatch, SyncQueue},
};

/// What one batch pass did
#[derive(Debug, Clone)]
pub struct BatchReport {
    /// Items fetched; zero means no work is due right now
    pub fetched: usize,
    pub completed: usize,
    pub retried: usize,
    pub failed: usize,
    /// Stored tallies after the batch was committed
    pub counts: ItemCounts,
    /// Queue header with refreshed counters
    pub queue: SyncQueue,
    /// Set when the adapter reported a connection failure; the batch was
    /// cut short after that item
    pub adapter_unavailable: Option<String>,
}

/// Processes one bounded slice of a queue's pending items.
///
/// Items are executed sequentially in fetch order and all resulting
/// updates are written back in a single atomic store call.
#[derive(Clone)]
pub struct BatchProcessor {
    store: Arc<dyn QueueStore>,
    executor: ItemExecutor,
    audit: Arc<dyn AuditSink>,
    metrics: Arc<LiveMetrics>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

impl BatchProcessor {
    pub fn new(
        store: Arc<dyn QueueStore>,
        executor: ItemExecutor,
        audit: Arc<dyn AuditSink>,
        metrics: Arc<LiveMetrics>,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            executor,
            audit,
            metrics,
            clock,
            retry,
        }
    }

    #[instrument(skip(self, queue), fields(tenant_id = %queue.tenant_id, queue_id = %queue.id))]
    pub async fn process_batch(&self, queue: &SyncQueue) -> SyncResult<BatchReport> {
        let tenant = &queue.tenant_id;
        let config = &queue.config;

        let items = self
            .store
            .fetch_pending_items(tenant, &queue.id, config.batch_size, self.clock.now())
            .await?;

        if items.is_empty() {
            let counts = self.store.item_counts(tenant, &queue.id).await?;
            debug!(pending = counts.pending, "No items due");
            return Ok(BatchReport {
                fetched: 0,
                completed: 0,
                retried: 0,
                failed: 0,
                counts,
                queue: queue.clone(),
                adapter_unavailable: None,
            });
        }

        let mut updates = Vec::with_capacity(items.len());
        let mut exhausted = Vec::new();
        let mut adapter_unavailable = None;

        for item in &items {
            let outcome = self.executor.execute(&queue.entity_type, item).await;
            let now = self.clock.now();

            match outcome {
                ItemOutcome::Succeeded { created_external_id } => {
                    updates.push(ItemUpdate::completed(item, created_external_id, now));
                }
                ItemOutcome::Failed { error } => {
                    let attempts = item.retry_count + 1;
                    let message = error.to_string();

                    let update = if attempts < config.max_retries {
                        let delay = self.retry.delay_for(config.retry_delay, attempts);
                        let next_attempt_at = now
                            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
                        ItemUpdate::retry(item, message.clone(), next_attempt_at)
                    } else {
                        exhausted.push(AuditEvent::ItemFailed {
                            tenant_id: tenant.clone(),
                            queue_id: queue.id.clone(),
                            item_id: item.id,
                            external_id: item.external_id.clone(),
                            operation: item.operation,
                            retry_count: attempts,
                            error: message.clone(),
                            at: now,
                        });
                        ItemUpdate::failed(item, message.clone(), now)
                    };
                    updates.push(update);

                    if error.is_connection_failure() {
                        warn!(item_id = %item.id, error = %message, "Adapter unreachable, cutting batch short");
                        adapter_unavailable = Some(error.message().to_string());
                        break;
                    }
                }
            }
        }

        let completed = updates.iter().filter(|u| u.status == ItemStatus::Completed).count();
        let failed = updates.iter().filter(|u| u.status == ItemStatus::Failed).count();
        let retried = updates.len() - completed - failed;

        self.store.update_items(tenant, &queue.id, updates).await?;

        // Only report permanent failures that were actually committed
        for event in exhausted {
            self.audit.record(event);
        }
        self.metrics
            .record_batch(completed as u64, retried as u64, failed as u64);

        let counts = self.store.item_counts(tenant, &queue.id).await?;
        let refreshed = self
            .store
            .update_queue_status(tenant, &queue.id, QueuePatch::counts(counts))
            .await?;

        info!(
            fetched = items.len(),
            completed,
            retried,
            failed,
            progress = refreshed.progress,
            "Batch committed"
        );

        Ok(BatchReport {
            fetched: items.len(),
            completed,
            retried,
            failed,
            counts,
            queue: refreshed,
            adapter_unavailable,
        })
    }
}
