use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::{SyncError, SyncResult};

/// Tenant identifier; every queue, item and audit event belongs to exactly one
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantId(String);

impl TenantId {
    /// Longest tenant id accepted at the queue boundary
    pub const MAX_LEN: usize = 128;

    /// Validate and wrap a tenant id.
    ///
    /// Tenant ids must be non-empty, at most [`Self::MAX_LEN`] bytes and
    /// free of whitespace and control characters.
    pub fn parse(id: impl Into<String>) -> SyncResult<Self> {
        let id = id.into();
        let valid = !id.is_empty()
            && id.len() <= Self::MAX_LEN
            && !id.chars().any(|c| c.is_whitespace() || c.is_control());

        if valid {
            Ok(Self(id))
        } else {
            Err(SyncError::InvalidTenant(id))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<&str> for TenantId {
    type Error = SyncError;

    fn try_from(id: &str) -> SyncResult<Self> {
        Self::parse(id)
    }
}

impl TryFrom<String> for TenantId {
    type Error = SyncError;

    fn try_from(id: String) -> SyncResult<Self> {
        Self::parse(id)
    }
}

/// Unique identifier for a sync queue
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueId(pub String);

impl QueueId {
    /// Generate a new unique queue ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for QueueId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for QueueId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for QueueId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Identifier of a queue item.
///
/// Item ids are assigned by the store in insertion order, so ordering by
/// id is ordering by submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(pub u64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
