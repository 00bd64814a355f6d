use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use super::{NewQueue, QueueStore};
use crate::{
    clock::{Clock, RuntimeClock},
    SyncError, SyncResult,
    types::{
        ItemCounts, ItemId, ItemStatus, ItemUpdate, QueueId, QueuePatch, QueueStatus,
        SyncQueue, SyncQueueItem, TenantId,
    },
};

#[derive(Default)]
struct MemoryState {
    queues: HashMap<QueueId, SyncQueue>,
    /// queue_id -> item_id -> item; BTreeMap keeps insertion order
    items: HashMap<QueueId, BTreeMap<ItemId, SyncQueueItem>>,
}

impl MemoryState {
    fn queue(&self, tenant: &TenantId, queue_id: &QueueId) -> SyncResult<&SyncQueue> {
        self.queues
            .get(queue_id)
            .filter(|queue| &queue.tenant_id == tenant)
            .ok_or_else(|| SyncError::QueueNotFound(queue_id.to_string()))
    }

    fn items(&self, tenant: &TenantId, queue_id: &QueueId) -> SyncResult<&BTreeMap<ItemId, SyncQueueItem>> {
        self.queue(tenant, queue_id)?;
        self.items
            .get(queue_id)
            .ok_or_else(|| SyncError::QueueNotFound(queue_id.to_string()))
    }

    fn counts(&self, tenant: &TenantId, queue_id: &QueueId) -> SyncResult<ItemCounts> {
        let items = self.items(tenant, queue_id)?;
        let mut counts = ItemCounts {
            total: items.len() as u32,
            ..ItemCounts::default()
        };
        for item in items.values() {
            match item.status {
                ItemStatus::Pending => counts.pending += 1,
                ItemStatus::Completed => counts.completed += 1,
                ItemStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }
}

/// In-memory queue store for tests, development and single-process use
pub struct MemoryQueueStore {
    state: Arc<RwLock<MemoryState>>,
    next_item_id: AtomicU64,
    clock: Arc<dyn Clock>,
    unavailable: AtomicBool,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(RuntimeClock::new()))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(RwLock::new(MemoryState::default())),
            next_item_id: AtomicU64::new(1),
            clock,
            unavailable: AtomicBool::new(false),
        }
    }

    /// Simulate an unreachable store (for testing)
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> SyncResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(SyncError::StoreUnavailable("memory store marked unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

impl Default for MemoryQueueStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn create_queue(&self, tenant: &TenantId, queue: NewQueue) -> SyncResult<QueueId> {
        self.check_available()?;
        queue.check_item_count()?;

        let now = self.clock.now();
        let queue_id = QueueId::new();
        let total_items = queue.items.len() as u32;

        let items: BTreeMap<ItemId, SyncQueueItem> = queue
            .items
            .into_iter()
            .map(|new_item| {
                let id = ItemId(self.next_item_id.fetch_add(1, Ordering::SeqCst));
                let item = SyncQueueItem {
                    id,
                    queue_id: queue_id.clone(),
                    tenant_id: tenant.clone(),
                    external_id: new_item.external_id,
                    operation: new_item.operation,
                    payload: new_item.payload,
                    status: ItemStatus::Pending,
                    retry_count: 0,
                    last_error: None,
                    created_external_id: None,
                    next_attempt_at: None,
                    created_at: now,
                    updated_at: now,
                    processed_at: None,
                };
                (id, item)
            })
            .collect();

        let header = SyncQueue {
            id: queue_id.clone(),
            tenant_id: tenant.clone(),
            entity_type: queue.entity_type,
            status: QueueStatus::Pending,
            total_items,
            processed_items: 0,
            failed_items: 0,
            progress: 0,
            config: queue.config,
            last_error: None,
            created_at: now,
            started_at: None,
            completed_at: None,
        };

        let mut state = self.state.write();
        state.queues.insert(queue_id.clone(), header);
        state.items.insert(queue_id.clone(), items);

        debug!(tenant_id = %tenant, queue_id = %queue_id, total_items, "Stored sync queue");
        Ok(queue_id)
    }

    async fn get_queue(&self, tenant: &TenantId, queue_id: &QueueId) -> SyncResult<Option<SyncQueue>> {
        self.check_available()?;
        let state = self.state.read();
        match state.queue(tenant, queue_id) {
            Ok(queue) => Ok(Some(queue.clone())),
            Err(SyncError::QueueNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn fetch_pending_items(
        &self,
        tenant: &TenantId,
        queue_id: &QueueId,
        limit: usize,
        now: DateTime<Utc>,
    ) -> SyncResult<Vec<SyncQueueItem>> {
        self.check_available()?;
        let state = self.state.read();
        let items = state.items(tenant, queue_id)?;

        Ok(items
            .values()
            .filter(|item| &item.tenant_id == tenant && item.is_due(now))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn update_items(
        &self,
        tenant: &TenantId,
        queue_id: &QueueId,
        updates: Vec<ItemUpdate>,
    ) -> SyncResult<()> {
        self.check_available()?;
        let now = self.clock.now();
        let mut state = self.state.write();

        let queue = state.queue(tenant, queue_id)?;
        if queue.is_terminal() {
            return Err(SyncError::QueueTerminal {
                queue_id: queue_id.to_string(),
                status: queue.status,
            });
        }

        // Validate the whole batch before touching any row
        let items = state.items(tenant, queue_id)?;
        for update in &updates {
            let item = items
                .get(&update.item_id)
                .filter(|item| &item.tenant_id == tenant)
                .ok_or_else(|| SyncError::ItemNotFound(update.item_id.to_string()))?;
            if item.status.is_terminal() {
                return Err(SyncError::InvalidItemTransition {
                    from: item.status,
                    to: update.status,
                });
            }
        }

        let items = state
            .items
            .get_mut(queue_id)
            .ok_or_else(|| SyncError::QueueNotFound(queue_id.to_string()))?;
        for update in &updates {
            if let Some(item) = items.get_mut(&update.item_id) {
                item.apply(update, now);
            }
        }

        debug!(tenant_id = %tenant, queue_id = %queue_id, updated = updates.len(), "Applied item updates");
        Ok(())
    }

    async fn update_queue_status(
        &self,
        tenant: &TenantId,
        queue_id: &QueueId,
        patch: QueuePatch,
    ) -> SyncResult<SyncQueue> {
        self.check_available()?;
        let mut state = self.state.write();

        let current = state.queue(tenant, queue_id)?;
        if current.is_terminal() {
            return Err(SyncError::QueueTerminal {
                queue_id: queue_id.to_string(),
                status: current.status,
            });
        }
        if let Some(next) = patch.status {
            if !current.status.can_transition_to(next) {
                return Err(SyncError::InvalidTransition {
                    from: current.status,
                    to: next,
                });
            }
        }

        let queue = state
            .queues
            .get_mut(queue_id)
            .ok_or_else(|| SyncError::QueueNotFound(queue_id.to_string()))?;
        if let Some(status) = patch.status {
            queue.status = status;
        }
        if queue.started_at.is_none() {
            queue.started_at = patch.started_at;
        }
        if patch.completed_at.is_some() {
            queue.completed_at = patch.completed_at;
        }
        if let Some(counts) = patch.counts {
            queue.apply_counts(counts);
        }
        if patch.last_error.is_some() {
            queue.last_error = patch.last_error;
        }

        Ok(queue.clone())
    }

    async fn item_counts(&self, tenant: &TenantId, queue_id: &QueueId) -> SyncResult<ItemCounts> {
        self.check_available()?;
        self.state.read().counts(tenant, queue_id)
    }

    async fn next_attempt_at(
        &self,
        tenant: &TenantId,
        queue_id: &QueueId,
    ) -> SyncResult<Option<DateTime<Utc>>> {
        self.check_available()?;
        let state = self.state.read();
        let items = state.items(tenant, queue_id)?;

        Ok(items
            .values()
            .filter(|item| item.status == ItemStatus::Pending)
            .filter_map(|item| item.next_attempt_at)
            .min())
    }

    async fn list_items(&self, tenant: &TenantId, queue_id: &QueueId) -> SyncResult<Vec<SyncQueueItem>> {
        self.check_available()?;
        let state = self.state.read();
        let items = state.items(tenant, queue_id)?;
        Ok(items.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NewItem, RunConfig};
    use serde_json::json;

    fn tenant(id: &str) -> TenantId {
        TenantId::parse(id).unwrap()
    }

    fn new_queue(n: usize) -> NewQueue {
        let items = (0..n)
            .map(|i| NewItem::update(format!("ext-{i}"), json!({ "n": i })))
            .collect();
        NewQueue::new("product", RunConfig::default(), items)
    }

    #[tokio::test]
    async fn test_create_and_fetch_in_insertion_order() {
        let store = MemoryQueueStore::new();
        let acme = tenant("acme");
        let queue_id = store.create_queue(&acme, new_queue(5)).await.unwrap();

        let batch = store
            .fetch_pending_items(&acme, &queue_id, 3, Utc::now())
            .await
            .unwrap();
        let external: Vec<_> = batch.iter().map(|i| i.external_id.as_str()).collect();
        assert_eq!(external, vec!["ext-0", "ext-1", "ext-2"]);
        assert!(batch.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[tokio::test]
    async fn test_update_items_is_all_or_nothing() {
        let store = MemoryQueueStore::new();
        let acme = tenant("acme");
        let queue_id = store.create_queue(&acme, new_queue(2)).await.unwrap();
        let items = store.list_items(&acme, &queue_id).await.unwrap();

        let good = ItemUpdate::completed(&items[0], None, Utc::now());
        let mut bogus = ItemUpdate::completed(&items[1], None, Utc::now());
        bogus.item_id = ItemId(u64::MAX);

        let result = store.update_items(&acme, &queue_id, vec![good, bogus]).await;
        assert!(matches!(result, Err(SyncError::ItemNotFound(_))));

        let counts = store.item_counts(&acme, &queue_id).await.unwrap();
        assert_eq!(counts.pending, 2);
        assert_eq!(counts.completed, 0);
    }

    #[tokio::test]
    async fn test_terminal_items_cannot_be_rewritten() {
        let store = MemoryQueueStore::new();
        let acme = tenant("acme");
        let queue_id = store.create_queue(&acme, new_queue(1)).await.unwrap();
        let items = store.list_items(&acme, &queue_id).await.unwrap();

        store
            .update_items(&acme, &queue_id, vec![ItemUpdate::completed(&items[0], None, Utc::now())])
            .await
            .unwrap();
        let again = store
            .update_items(&acme, &queue_id, vec![ItemUpdate::failed(&items[0], "x".into(), Utc::now())])
            .await;
        assert!(matches!(again, Err(SyncError::InvalidItemTransition { .. })));
    }

    #[tokio::test]
    async fn test_started_at_is_set_once() {
        let store = MemoryQueueStore::new();
        let acme = tenant("acme");
        let queue_id = store.create_queue(&acme, new_queue(1)).await.unwrap();

        let first = Utc::now();
        let later = first + chrono::Duration::seconds(30);
        store
            .update_queue_status(&acme, &queue_id, QueuePatch::status(QueueStatus::Processing).with_started_at(first))
            .await
            .unwrap();
        let queue = store
            .update_queue_status(&acme, &queue_id, QueuePatch::status(QueueStatus::Processing).with_started_at(later))
            .await
            .unwrap();
        assert_eq!(queue.started_at, Some(first));
    }

    #[tokio::test]
    async fn test_unavailable_store_errors() {
        let store = MemoryQueueStore::new();
        store.set_unavailable(true);
        let result = store.create_queue(&tenant("acme"), new_queue(1)).await;
        assert!(matches!(result, Err(SyncError::StoreUnavailable(_))));
    }
}
