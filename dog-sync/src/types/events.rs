use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ItemId, Operation, QueueId, SyncQueue, TenantId};

/// Queue lifecycle phase reported to the audit sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueuePhase {
    Started,
    Completed,
    Failed,
}

impl QueuePhase {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Counters carried on lifecycle events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub total: u32,
    pub processed: u32,
    pub failed: u32,
}

impl From<&SyncQueue> for QueueCounts {
    fn from(queue: &SyncQueue) -> Self {
        Self {
            total: queue.total_items,
            processed: queue.processed_items,
            failed: queue.failed_items,
        }
    }
}

/// Minimal stable event protocol for the audit sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditEvent {
    /// Queue started, completed or failed
    Queue {
        tenant_id: TenantId,
        entity_type: String,
        phase: QueuePhase,
        queue_id: QueueId,
        counts: QueueCounts,
        error: Option<String>,
        at: DateTime<Utc>,
    },

    /// An item exhausted its retries
    ItemFailed {
        tenant_id: TenantId,
        queue_id: QueueId,
        item_id: ItemId,
        external_id: String,
        operation: Operation,
        retry_count: u32,
        error: String,
        at: DateTime<Utc>,
    },
}

impl AuditEvent {
    /// Lifecycle event for `queue` in `phase`
    pub fn queue(queue: &SyncQueue, phase: QueuePhase, at: DateTime<Utc>) -> Self {
        Self::Queue {
            tenant_id: queue.tenant_id.clone(),
            entity_type: queue.entity_type.clone(),
            phase,
            queue_id: queue.id.clone(),
            counts: QueueCounts::from(queue),
            error: queue.last_error.clone(),
            at,
        }
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Queue { phase, .. } => match phase {
                QueuePhase::Started => "queue_started",
                QueuePhase::Completed => "queue_completed",
                QueuePhase::Failed => "queue_failed",
            },
            Self::ItemFailed { .. } => "item_failed",
        }
    }

    pub fn tenant_id(&self) -> &TenantId {
        match self {
            Self::Queue { tenant_id, .. } | Self::ItemFailed { tenant_id, .. } => tenant_id,
        }
    }

    pub fn queue_id(&self) -> &QueueId {
        match self {
            Self::Queue { queue_id, .. } | Self::ItemFailed { queue_id, .. } => queue_id,
        }
    }

    pub fn timestamp(&self) -> &DateTime<Utc> {
        match self {
            Self::Queue { at, .. } | Self::ItemFailed { at, .. } => at,
        }
    }
}
