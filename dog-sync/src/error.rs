use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{ItemStatus, QueueStatus};

/// Result type for sync queue operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors surfaced by the sync engine, its store and its driver
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    #[error("Invalid tenant id: {0:?}")]
    InvalidTenant(String),

    #[error("A sync queue needs at least one item")]
    EmptyQueue,

    #[error("Too many items: {count} (max: {max})")]
    TooManyItems { count: usize, max: usize },

    #[error("Invalid run configuration: {0}")]
    InvalidConfig(String),

    #[error("Entity type not supported by adapter: {0}")]
    UnsupportedEntityType(String),

    #[error("Rate limit exceeded: {remaining} remaining, resets at {reset_at}")]
    RateLimited {
        remaining: u32,
        reset_at: DateTime<Utc>,
    },

    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Queue item not found: {0}")]
    ItemNotFound(String),

    #[error("Queue {queue_id} is already {status}")]
    QueueTerminal { queue_id: String, status: QueueStatus },

    #[error("Queue {0} is still running")]
    QueueActive(String),

    #[error("Invalid queue transition: {from} -> {to}")]
    InvalidTransition { from: QueueStatus, to: QueueStatus },

    #[error("Invalid item transition: {from} -> {to}")]
    InvalidItemTransition { from: ItemStatus, to: ItemStatus },

    #[error("Queue store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Queue processing timed out after {0:?}")]
    Timeout(Duration),

    #[error("Queue processing was canceled")]
    Canceled,

    #[error("External adapter unavailable: {0}")]
    AdapterUnavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Validation errors are raised before anything is persisted
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidTenant(_)
                | Self::EmptyQueue
                | Self::TooManyItems { .. }
                | Self::InvalidConfig(_)
                | Self::UnsupportedEntityType(_)
        )
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Failure reported by an external system adapter call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    /// Timeout, remote 5xx or similar; worth another attempt
    #[error("Transient adapter error: {0}")]
    Transient(String),

    /// The remote system rejected the payload
    #[error("Adapter rejected request: {0}")]
    Rejected(String),

    /// The remote system cannot be reached at all
    #[error("Adapter unavailable: {0}")]
    Unavailable(String),
}

impl AdapterError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Connection failures abort the whole queue rather than one item
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Transient(msg) | Self::Rejected(msg) | Self::Unavailable(msg) => msg,
        }
    }
}
