//! External system adapter contract.
//!
//! The adapter owns transport, authentication and remote rate limiting.
//! It performs exactly one remote call per method invocation and never
//! retries; retry policy lives in the batch processor.

use async_trait::async_trait;
use serde_json::Value;

use crate::AdapterError;

/// Client for the external system records are reconciled with
#[async_trait]
pub trait SyncAdapter: Send + Sync {
    /// Whether this adapter can sync `entity_type`.
    ///
    /// Checked once when a queue is created, never per call.
    fn supports(&self, entity_type: &str) -> bool;

    /// Create an entity and return the id the external system assigned
    async fn create_entity(&self, entity_type: &str, payload: &Value) -> Result<String, AdapterError>;

    /// Update an existing entity
    async fn update_entity(
        &self,
        entity_type: &str,
        external_id: &str,
        payload: &Value,
    ) -> Result<(), AdapterError>;

    /// Delete an existing entity
    async fn delete_entity(&self, entity_type: &str, external_id: &str) -> Result<(), AdapterError>;
}
