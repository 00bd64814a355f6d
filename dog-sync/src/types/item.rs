use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ItemId, QueueId, TenantId};

/// Operation an item applies against the external system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Item status; there is no persisted `processing` state for items
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Completed,
    Failed,
}

impl ItemStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Submission data for one item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewItem {
    /// Identifier in the external system, or a local placeholder for creates
    pub external_id: String,
    pub operation: Operation,
    pub payload: Value,
}

impl NewItem {
    pub fn create(external_id: impl Into<String>, payload: Value) -> Self {
        Self {
            external_id: external_id.into(),
            operation: Operation::Create,
            payload,
        }
    }

    pub fn update(external_id: impl Into<String>, payload: Value) -> Self {
        Self {
            external_id: external_id.into(),
            operation: Operation::Update,
            payload,
        }
    }

    pub fn delete(external_id: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            operation: Operation::Delete,
            payload: Value::Null,
        }
    }
}

/// One entity-level operation within a queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncQueueItem {
    pub id: ItemId,
    pub queue_id: QueueId,
    pub tenant_id: TenantId,
    pub external_id: String,
    pub operation: Operation,
    pub payload: Value,
    pub status: ItemStatus,
    /// Failed attempts so far
    pub retry_count: u32,
    pub last_error: Option<String>,
    /// Id the external system assigned on a successful create
    pub created_external_id: Option<String>,
    /// Earliest time a retried item may be fetched again
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl SyncQueueItem {
    /// Pending and due for an attempt at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == ItemStatus::Pending && self.next_attempt_at.map_or(true, |at| at <= now)
    }

    /// Apply a batch update to this row
    pub fn apply(&mut self, update: &ItemUpdate, now: DateTime<Utc>) {
        self.status = update.status;
        self.retry_count = update.retry_count;
        if update.last_error.is_some() {
            self.last_error = update.last_error.clone();
        }
        if update.created_external_id.is_some() {
            self.created_external_id = update.created_external_id.clone();
        }
        self.next_attempt_at = update.next_attempt_at;
        if update.processed_at.is_some() {
            self.processed_at = update.processed_at;
        }
        self.updated_at = now;
    }
}

/// Result of one attempt, written back by the batch processor
#[derive(Debug, Clone, PartialEq)]
pub struct ItemUpdate {
    pub item_id: ItemId,
    pub status: ItemStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub created_external_id: Option<String>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl ItemUpdate {
    /// Successful attempt
    pub fn completed(item: &SyncQueueItem, created_external_id: Option<String>, at: DateTime<Utc>) -> Self {
        Self {
            item_id: item.id,
            status: ItemStatus::Completed,
            retry_count: item.retry_count,
            last_error: None,
            created_external_id,
            next_attempt_at: None,
            processed_at: Some(at),
        }
    }

    /// Failed attempt with retries left
    pub fn retry(item: &SyncQueueItem, error: String, next_attempt_at: DateTime<Utc>) -> Self {
        Self {
            item_id: item.id,
            status: ItemStatus::Pending,
            retry_count: item.retry_count + 1,
            last_error: Some(error),
            created_external_id: None,
            next_attempt_at: Some(next_attempt_at),
            processed_at: None,
        }
    }

    /// Failed attempt that exhausted the retry budget
    pub fn failed(item: &SyncQueueItem, error: String, at: DateTime<Utc>) -> Self {
        Self {
            item_id: item.id,
            status: ItemStatus::Failed,
            retry_count: item.retry_count + 1,
            last_error: Some(error),
            created_external_id: None,
            next_attempt_at: None,
            processed_at: Some(at),
        }
    }
}
