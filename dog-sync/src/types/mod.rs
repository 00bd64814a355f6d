pub mod ids;
pub mod queue;
pub mod item;
pub mod events;

pub use ids::{TenantId, QueueId, ItemId};
pub use queue::{QueueStatus, RunConfig, SyncQueue, QueuePatch, ItemCounts};
pub use item::{Operation, ItemStatus, NewItem, SyncQueueItem, ItemUpdate};
pub use events::{AuditEvent, QueuePhase, QueueCounts};
