//! # dog-sync: Tenant-Isolated Batch Synchronization
//!
//! **Durable, resumable queues for reconciling local records with an external system**
//!
//! A caller submits a batch of create/update/delete operations for one
//! entity type. dog-sync persists them as a queue, acknowledges
//! immediately, and a background driver works through the queue in
//! bounded batches against a [`SyncAdapter`].
//!
//! ## Guarantees
//!
//! - **Tenant Isolation**: every store operation takes an explicit tenant; foreign queues look missing
//! - **Atomic Batches**: all item updates of one batch commit together or not at all
//! - **Bounded Retries**: failed items return to `pending` with exponential backoff until `max_retries`
//! - **Resumable Progress**: counters are derived from stored items, so a re-run driver picks up where it stopped
//! - **Admission Control**: per-tenant rate limiting before anything is persisted
//! - **Structured Observability**: audit events, `tracing` spans and live counters
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dog_sync::prelude::*;
//! use serde_json::{json, Value};
//!
//! struct Crm;
//!
//! #[async_trait]
//! impl SyncAdapter for Crm {
//!     fn supports(&self, entity_type: &str) -> bool {
//!         entity_type == "contact"
//!     }
//!
//!     async fn create_entity(&self, _entity_type: &str, _payload: &Value) -> Result<String, AdapterError> {
//!         Ok("crm-42".to_string())
//!     }
//!
//!     async fn update_entity(&self, _entity_type: &str, _id: &str, _payload: &Value) -> Result<(), AdapterError> {
//!         Ok(())
//!     }
//!
//!     async fn delete_entity(&self, _entity_type: &str, _id: &str) -> Result<(), AdapterError> {
//!         Ok(())
//!     }
//! }
//!
//! # async fn run() -> SyncResult<()> {
//! let engine = SyncEngine::builder(Arc::new(Crm)).build()?;
//!
//! let request = CreateQueueRequest::new(
//!     "tenant_123",
//!     "contact",
//!     vec![NewItem::create("local-1", json!({ "name": "Ada" }))],
//! );
//! let receipt = engine.create_queue(request).await?;
//!
//! let done = receipt.handle.join().await?;
//! assert_eq!(done.status, QueueStatus::Completed);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod types;
pub mod clock;
pub mod store;
pub mod adapter;
pub mod execution;
pub mod admission;
pub mod observability;
pub mod config;
pub mod engine;

// Core API exports
pub use engine::{SyncEngine, SyncEngineBuilder, CreateQueueRequest, QueueReceipt, DriverHandle};
pub use error::{SyncError, SyncResult, AdapterError};
pub use types::{
    TenantId, QueueId, ItemId, QueueStatus, RunConfig, SyncQueue, ItemCounts,
    Operation, ItemStatus, NewItem, SyncQueueItem, AuditEvent, QueuePhase,
};
pub use adapter::SyncAdapter;
pub use store::{QueueStore, MemoryQueueStore, NewQueue, MAX_QUEUE_ITEMS};
pub use admission::{
    Admission, AdmissionControl, AdmissionPolicy, SlidingWindowLimiter, FixedWindowLimiter,
    CounterStore, MemoryCounterStore,
};
pub use config::{SyncConfig, SyncSettings};
pub use clock::{Clock, RuntimeClock, SystemClock};

// Observability exports
pub use observability::{AuditSink, BroadcastAuditSink, TracingAuditSink, LiveMetrics, MetricsSnapshot};

/// Prelude for applications driving sync queues
pub mod prelude {
    // Engine and requests
    pub use crate::{
        SyncEngine, CreateQueueRequest, QueueReceipt, DriverHandle
    };

    // Essential types
    pub use crate::{
        TenantId, QueueId, QueueStatus, RunConfig, SyncQueue, SyncQueueItem,
        NewItem, Operation, ItemStatus, SyncError, SyncResult, AdapterError
    };

    // Collaborator seams
    pub use crate::{
        SyncAdapter, QueueStore, AdmissionControl, AuditSink
    };

    pub use async_trait::async_trait;
}
