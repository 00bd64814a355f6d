//! Per-tenant admission control for queue creation.
//!
//! [`SlidingWindowLimiter`] keeps its state in process memory, which makes it
//! advisory once several engine processes share the same tenants.
//! [`FixedWindowLimiter`] counts through a [`CounterStore`] that can be backed
//! by a shared store so every instance sees the same totals.

pub mod sliding;
pub mod fixed;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{SyncError, SyncResult, types::TenantId};

pub use sliding::SlidingWindowLimiter;
pub use fixed::{CounterStore, FixedWindowLimiter, MemoryCounterStore};

/// Outcome of one admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Admission {
    pub allowed: bool,
    pub limit: u32,
    /// Requests still allowed in the current window
    pub remaining: u32,
    /// When the next slot frees up
    pub reset_at: DateTime<Utc>,
}

impl Admission {
    /// Turn a rejection into [`SyncError::RateLimited`]
    pub fn into_result(self) -> SyncResult<Self> {
        if self.allowed {
            Ok(self)
        } else {
            Err(SyncError::RateLimited {
                remaining: self.remaining,
                reset_at: self.reset_at,
            })
        }
    }
}

/// Request-rate gate consulted before a queue is created
#[async_trait]
pub trait AdmissionControl: Send + Sync {
    /// Count one request for `tenant` and report whether it is admitted
    async fn check(&self, tenant: &TenantId) -> SyncResult<Admission>;
}

/// Limit and window shared by the limiter implementations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionPolicy {
    pub limit: u32,
    pub window: Duration,
}

impl AdmissionPolicy {
    pub fn new(limit: u32, window: Duration) -> SyncResult<Self> {
        if limit == 0 {
            return Err(SyncError::InvalidConfig("admission limit must be greater than 0".to_string()));
        }
        if window.is_zero() {
            return Err(SyncError::InvalidConfig("admission window must be greater than zero".to_string()));
        }
        Ok(Self { limit, window })
    }

    pub(crate) fn window_chrono(&self) -> chrono::Duration {
        const MAX_WINDOW_MS: u128 = 365 * 24 * 60 * 60 * 1000;
        chrono::Duration::milliseconds(self.window.as_millis().min(MAX_WINDOW_MS) as i64)
    }
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self {
            limit: 10,
            window: Duration::from_secs(60),
        }
    }
}

/// Admits everything; for trusted internal callers
#[derive(Debug, Clone, Copy, Default)]
pub struct Unlimited;

#[async_trait]
impl AdmissionControl for Unlimited {
    async fn check(&self, _tenant: &TenantId) -> SyncResult<Admission> {
        Ok(Admission {
            allowed: true,
            limit: u32::MAX,
            remaining: u32::MAX,
            reset_at: Utc::now(),
        })
    }
}
