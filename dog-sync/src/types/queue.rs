use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{QueueId, TenantId};
use crate::{SyncError, SyncResult};

/// Queue lifecycle: `pending -> processing -> {completed, failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl QueueStatus {
    /// Completed and failed queues accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// `processing -> processing` is allowed so that a resumed driver run
    /// can re-enter the loop.
    pub fn can_transition_to(&self, next: QueueStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-queue run configuration, fixed once the queue is created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Items fetched and processed per batch
    pub batch_size: usize,
    /// Pause between two batches
    pub batch_delay: Duration,
    /// Attempts an item gets before it is failed permanently
    pub max_retries: u32,
    /// Base delay before a failed item becomes eligible again
    pub retry_delay: Duration,
}

impl RunConfig {
    pub const MAX_BATCH_SIZE: usize = 1000;
    pub const MAX_BATCH_DELAY: Duration = Duration::from_secs(60);
    pub const MAX_RETRIES: u32 = 10;
    pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(3600);

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_batch_delay(mut self, batch_delay: Duration) -> Self {
        self.batch_delay = batch_delay;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Check every field against its accepted range
    pub fn validate(&self) -> SyncResult<()> {
        if self.batch_size == 0 || self.batch_size > Self::MAX_BATCH_SIZE {
            return Err(SyncError::InvalidConfig(format!(
                "batch_size must be between 1 and {}, got {}",
                Self::MAX_BATCH_SIZE,
                self.batch_size
            )));
        }
        if self.batch_delay > Self::MAX_BATCH_DELAY {
            return Err(SyncError::InvalidConfig(format!(
                "batch_delay must be at most {}ms, got {}ms",
                Self::MAX_BATCH_DELAY.as_millis(),
                self.batch_delay.as_millis()
            )));
        }
        if self.max_retries == 0 || self.max_retries > Self::MAX_RETRIES {
            return Err(SyncError::InvalidConfig(format!(
                "max_retries must be between 1 and {}, got {}",
                Self::MAX_RETRIES,
                self.max_retries
            )));
        }
        if self.retry_delay > Self::MAX_RETRY_DELAY {
            return Err(SyncError::InvalidConfig(format!(
                "retry_delay must be at most {}ms, got {}ms",
                Self::MAX_RETRY_DELAY.as_millis(),
                self.retry_delay.as_millis()
            )));
        }
        Ok(())
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            batch_delay: Duration::from_millis(1000),
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
        }
    }
}

/// Item tallies a queue's counters are derived from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemCounts {
    pub total: u32,
    pub pending: u32,
    pub completed: u32,
    pub failed: u32,
}

impl ItemCounts {
    /// `round(100 * completed / total)`
    pub fn progress(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        let pct = (200 * u64::from(self.completed) + u64::from(self.total)) / (2 * u64::from(self.total));
        pct.min(100) as u8
    }
}

/// One synchronization run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncQueue {
    pub id: QueueId,
    pub tenant_id: TenantId,
    pub entity_type: String,
    pub status: QueueStatus,
    pub total_items: u32,
    pub processed_items: u32,
    pub failed_items: u32,
    /// Derived from item counts, 0-100
    pub progress: u8,
    pub config: RunConfig,
    /// Reason the queue failed, if it did
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SyncQueue {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Overwrite the derived counters from stored item counts
    pub fn apply_counts(&mut self, counts: ItemCounts) {
        self.processed_items = counts.completed;
        self.failed_items = counts.failed;
        self.progress = counts.progress();
    }
}

/// Partial update of a queue header, applied by the store in one step
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueuePatch {
    pub status: Option<QueueStatus>,
    /// Written only if the queue has no `started_at` yet
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub counts: Option<ItemCounts>,
    pub last_error: Option<String>,
}

impl QueuePatch {
    pub fn status(status: QueueStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn counts(counts: ItemCounts) -> Self {
        Self {
            counts: Some(counts),
            ..Self::default()
        }
    }

    pub fn with_started_at(mut self, at: DateTime<Utc>) -> Self {
        self.started_at = Some(at);
        self
    }

    pub fn with_completed_at(mut self, at: DateTime<Utc>) -> Self {
        self.completed_at = Some(at);
        self
    }

    pub fn with_counts(mut self, counts: ItemCounts) -> Self {
        self.counts = Some(counts);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(error.into());
        self
    }
}
