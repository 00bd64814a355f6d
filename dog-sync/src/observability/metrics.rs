use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Live counters for sync engine activity
#[derive(Debug, Default)]
pub struct LiveMetrics {
    queues_created: AtomicU64,
    queues_completed: AtomicU64,
    queues_failed: AtomicU64,
    admissions_rejected: AtomicU64,
    items_completed: AtomicU64,
    items_retried: AtomicU64,
    items_failed: AtomicU64,
    batches_processed: AtomicU64,
}

impl LiveMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_queues_created(&self) {
        self.queues_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_queues_completed(&self) {
        self.queues_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_queues_failed(&self) {
        self.queues_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_admissions_rejected(&self) {
        self.admissions_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Tally the outcome of one batch
    pub fn record_batch(&self, completed: u64, retried: u64, failed: u64) {
        self.batches_processed.fetch_add(1, Ordering::Relaxed);
        self.items_completed.fetch_add(completed, Ordering::Relaxed);
        self.items_retried.fetch_add(retried, Ordering::Relaxed);
        self.items_failed.fetch_add(failed, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queues_created: self.queues_created.load(Ordering::Relaxed),
            queues_completed: self.queues_completed.load(Ordering::Relaxed),
            queues_failed: self.queues_failed.load(Ordering::Relaxed),
            admissions_rejected: self.admissions_rejected.load(Ordering::Relaxed),
            items_completed: self.items_completed.load(Ordering::Relaxed),
            items_retried: self.items_retried.load(Ordering::Relaxed),
            items_failed: self.items_failed.load(Ordering::Relaxed),
            batches_processed: self.batches_processed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`LiveMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub queues_created: u64,
    pub queues_completed: u64,
    pub queues_failed: u64,
    pub admissions_rejected: u64,
    pub items_completed: u64,
    pub items_retried: u64,
    pub items_failed: u64,
    pub batches_processed: u64,
}

impl MetricsSnapshot {
    /// Share of finished items that completed, as a percentage
    pub fn item_success_rate(&self) -> f64 {
        let finished = self.items_completed + self.items_failed;
        if finished == 0 {
            100.0
        } else {
            (self.items_completed as f64 / finished as f64) * 100.0
        }
    }
}
