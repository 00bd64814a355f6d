use std::sync::Arc;

use futures::Stream;
use std::pin::Pin;
use tokio::sync::broadcast;
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tracing::{debug, error, info, warn};

use crate::types::{AuditEvent, QueuePhase, TenantId};

/// Type alias for boxed streams (stable Rust compatible)
pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send + 'static>>;

/// Receiver of queue lifecycle and item failure events.
///
/// `record` must not block; implementations buffer or drop.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Fans events out over a tokio broadcast channel
#[derive(Clone)]
pub struct BroadcastAuditSink {
    event_broadcaster: broadcast::Sender<AuditEvent>,
}

impl BroadcastAuditSink {
    pub fn new(capacity: usize) -> Self {
        let (event_broadcaster, _) = broadcast::channel(capacity.max(1));
        Self { event_broadcaster }
    }

    /// Raw receiver; lagging receivers lose the oldest events
    pub fn subscribe(&self) -> broadcast::Receiver<AuditEvent> {
        self.event_broadcaster.subscribe()
    }

    /// Events for one tenant as a stream
    pub fn event_stream(&self, tenant: TenantId) -> BoxStream<AuditEvent> {
        let stream = BroadcastStream::new(self.event_broadcaster.subscribe())
            .filter_map(|result| result.ok())
            .filter(move |event| event.tenant_id() == &tenant);

        Box::pin(stream)
    }
}

impl Default for BroadcastAuditSink {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl AuditSink for BroadcastAuditSink {
    fn record(&self, event: AuditEvent) {
        // No subscribers is fine
        let _ = self.event_broadcaster.send(event);
    }
}

/// Writes audit events as structured log lines
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        match &event {
            AuditEvent::Queue {
                tenant_id,
                entity_type,
                phase,
                queue_id,
                counts,
                error,
                ..
            } => match phase {
                QueuePhase::Failed => error!(
                    audit = event.event_name(),
                    tenant_id = %tenant_id,
                    queue_id = %queue_id,
                    entity_type = %entity_type,
                    total = counts.total,
                    processed = counts.processed,
                    failed = counts.failed,
                    error = error.as_deref().unwrap_or(""),
                    "Sync queue failed"
                ),
                _ => info!(
                    audit = event.event_name(),
                    tenant_id = %tenant_id,
                    queue_id = %queue_id,
                    entity_type = %entity_type,
                    total = counts.total,
                    processed = counts.processed,
                    failed = counts.failed,
                    "Sync queue {}",
                    phase.name()
                ),
            },
            AuditEvent::ItemFailed {
                tenant_id,
                queue_id,
                item_id,
                external_id,
                operation,
                retry_count,
                error,
                ..
            } => warn!(
                audit = event.event_name(),
                tenant_id = %tenant_id,
                queue_id = %queue_id,
                item_id = %item_id,
                external_id = %external_id,
                operation = %operation,
                retry_count,
                error = %error,
                "Sync item failed permanently"
            ),
        }
    }
}

/// Forwards every event to several sinks
#[derive(Clone, Default)]
pub struct FanoutAuditSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl FanoutAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl AuditSink for FanoutAuditSink {
    fn record(&self, event: AuditEvent) {
        debug!(audit = event.event_name(), sinks = self.sinks.len(), "Fanning out audit event");
        for sink in &self.sinks {
            sink.record(event.clone());
        }
    }
}
