use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use tracing::debug;

use super::{Admission, AdmissionControl, AdmissionPolicy};
use crate::{
    clock::{Clock, RuntimeClock},
    SyncError, SyncResult,
    types::TenantId,
};

/// Atomic counters with expiry, the primitive a shared store provides
/// (e.g. `INCR` + `EXPIRE`).
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment `key` and return the new value. A fresh key starts at 1 and
    /// expires at `expires_at`.
    async fn increment(&self, key: &str, expires_at: DateTime<Utc>) -> SyncResult<u64>;
}

/// Process-local [`CounterStore`]
pub struct MemoryCounterStore {
    counters: DashMap<String, (u64, DateTime<Utc>)>,
    clock: Arc<dyn Clock>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(RuntimeClock::new()))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            counters: DashMap::new(),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str, expires_at: DateTime<Utc>) -> SyncResult<u64> {
        let now = self.clock.now();
        self.counters.retain(|_, (_, expiry)| *expiry > now);

        let mut entry = self
            .counters
            .entry(key.to_string())
            .or_insert((0, expires_at));
        entry.0 += 1;
        Ok(entry.0)
    }
}

/// Fixed-window limiter over a [`CounterStore`].
///
/// Windows are aligned to multiples of the window length since the Unix
/// epoch. Rejected requests are counted too, matching how a shared
/// `INCR` counter behaves.
pub struct FixedWindowLimiter<S: CounterStore> {
    policy: AdmissionPolicy,
    counters: S,
    clock: Arc<dyn Clock>,
}

impl<S: CounterStore> FixedWindowLimiter<S> {
    pub fn new(policy: AdmissionPolicy, counters: S) -> Self {
        Self::with_clock(policy, counters, Arc::new(RuntimeClock::new()))
    }

    pub fn with_clock(policy: AdmissionPolicy, counters: S, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy,
            counters,
            clock,
        }
    }

    pub fn counters(&self) -> &S {
        &self.counters
    }

    fn window_bounds(&self, now: DateTime<Utc>) -> SyncResult<(i64, DateTime<Utc>)> {
        let window_ms = self.policy.window_chrono().num_milliseconds().max(1);
        let index = now.timestamp_millis().div_euclid(window_ms);
        let reset_at = Utc
            .timestamp_millis_opt((index + 1) * window_ms)
            .single()
            .ok_or_else(|| SyncError::Internal("admission window out of range".to_string()))?;
        Ok((index, reset_at))
    }
}

#[async_trait]
impl<S: CounterStore> AdmissionControl for FixedWindowLimiter<S> {
    async fn check(&self, tenant: &TenantId) -> SyncResult<Admission> {
        let now = self.clock.now();
        let (index, reset_at) = self.window_bounds(now)?;
        let key = format!("admission:{}:{}", tenant, index);

        let count = self.counters.increment(&key, reset_at).await?;
        let limit = u64::from(self.policy.limit);
        let allowed = count <= limit;
        let remaining = limit.saturating_sub(count) as u32;

        debug!(tenant_id = %tenant, allowed, remaining, window = index, "Admission check");
        Ok(Admission {
            allowed,
            limit: self.policy.limit,
            remaining,
            reset_at,
        })
    }
}
