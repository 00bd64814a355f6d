pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    SyncError, SyncResult,
    types::{
        ItemCounts, ItemUpdate, NewItem, QueueId, QueuePatch, RunConfig, SyncQueue,
        SyncQueueItem, TenantId,
    },
};

pub use memory::MemoryQueueStore;

/// Hard cap on items per queue
pub const MAX_QUEUE_ITEMS: usize = 10_000;

/// Everything needed to persist a queue header and its items
#[derive(Debug, Clone)]
pub struct NewQueue {
    pub entity_type: String,
    pub config: RunConfig,
    pub items: Vec<NewItem>,
}

impl NewQueue {
    pub fn new(entity_type: impl Into<String>, config: RunConfig, items: Vec<NewItem>) -> Self {
        Self {
            entity_type: entity_type.into(),
            config,
            items,
        }
    }

    /// Item-count bounds every store enforces
    pub fn check_item_count(&self) -> SyncResult<()> {
        match self.items.len() {
            0 => Err(SyncError::EmptyQueue),
            n if n > MAX_QUEUE_ITEMS => Err(SyncError::TooManyItems {
                count: n,
                max: MAX_QUEUE_ITEMS,
            }),
            _ => Ok(()),
        }
    }
}

/// Durable record of queue headers and items.
///
/// Every operation is scoped by an explicit tenant. A row whose stored
/// tenant differs from the caller's is reported exactly like a missing row.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Persist a `pending` queue header and its `pending` items in one unit
    async fn create_queue(&self, tenant: &TenantId, queue: NewQueue) -> SyncResult<QueueId>;

    /// Read a queue header; `None` when absent or owned by another tenant
    async fn get_queue(&self, tenant: &TenantId, queue_id: &QueueId) -> SyncResult<Option<SyncQueue>>;

    /// Up to `limit` pending items due at `now`, in insertion order
    async fn fetch_pending_items(
        &self,
        tenant: &TenantId,
        queue_id: &QueueId,
        limit: usize,
        now: DateTime<Utc>,
    ) -> SyncResult<Vec<SyncQueueItem>>;

    /// Apply all updates atomically; either every update lands or none does
    async fn update_items(
        &self,
        tenant: &TenantId,
        queue_id: &QueueId,
        updates: Vec<ItemUpdate>,
    ) -> SyncResult<()>;

    /// Apply a header patch, enforcing the queue state machine
    async fn update_queue_status(
        &self,
        tenant: &TenantId,
        queue_id: &QueueId,
        patch: QueuePatch,
    ) -> SyncResult<SyncQueue>;

    /// Item tallies by status
    async fn item_counts(&self, tenant: &TenantId, queue_id: &QueueId) -> SyncResult<ItemCounts>;

    /// Earliest `next_attempt_at` among pending items that are backing off
    async fn next_attempt_at(
        &self,
        tenant: &TenantId,
        queue_id: &QueueId,
    ) -> SyncResult<Option<DateTime<Utc>>>;

    /// All items of a queue in insertion order
    async fn list_items(&self, tenant: &TenantId, queue_id: &QueueId) -> SyncResult<Vec<SyncQueueItem>>;
}
