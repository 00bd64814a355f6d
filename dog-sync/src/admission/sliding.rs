use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

use super::{Admission, AdmissionControl, AdmissionPolicy};
use crate::{
    clock::{Clock, RuntimeClock},
    SyncResult,
    types::TenantId,
};

/// In-process sliding-window limiter.
///
/// Each tenant keeps the timestamps of its admitted requests. Timestamps
/// older than the window are evicted on every check, and tenants with
/// nothing left in their window are dropped from the map.
pub struct SlidingWindowLimiter {
    policy: AdmissionPolicy,
    windows: DashMap<TenantId, VecDeque<DateTime<Utc>>>,
    clock: Arc<dyn Clock>,
}

impl SlidingWindowLimiter {
    pub fn new(policy: AdmissionPolicy) -> Self {
        Self::with_clock(policy, Arc::new(RuntimeClock::new()))
    }

    pub fn with_clock(policy: AdmissionPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy,
            windows: DashMap::new(),
            clock,
        }
    }

    pub fn policy(&self) -> AdmissionPolicy {
        self.policy
    }

    /// Number of tenants currently tracked
    pub fn tracked_tenants(&self) -> usize {
        self.windows.len()
    }
}

#[async_trait]
impl AdmissionControl for SlidingWindowLimiter {
    async fn check(&self, tenant: &TenantId) -> SyncResult<Admission> {
        let now = self.clock.now();
        let window = self.policy.window_chrono();
        let cutoff = now - window;

        // Drop tenants whose whole window has expired
        self.windows
            .retain(|_, stamps| stamps.back().is_some_and(|at| *at > cutoff));

        let mut entry = self.windows.entry(tenant.clone()).or_default();
        let stamps = entry.value_mut();
        while stamps.front().is_some_and(|at| *at <= cutoff) {
            stamps.pop_front();
        }

        let used = stamps.len() as u32;
        let allowed = used < self.policy.limit;
        if allowed {
            stamps.push_back(now);
        }

        let remaining = self.policy.limit.saturating_sub(stamps.len() as u32);
        let reset_at = stamps.front().map_or(now, |oldest| *oldest + window);

        debug!(tenant_id = %tenant, allowed, remaining, "Admission check");
        Ok(Admission {
            allowed,
            limit: self.policy.limit,
            remaining,
            reset_at,
        })
    }
}
