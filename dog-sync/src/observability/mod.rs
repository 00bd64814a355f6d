pub mod sink;
pub mod metrics;
pub mod tracing;

pub use sink::{AuditSink, BroadcastAuditSink, TracingAuditSink, FanoutAuditSink, BoxStream};
pub use metrics::{LiveMetrics, MetricsSnapshot};
pub use self::tracing::init_tracing;
