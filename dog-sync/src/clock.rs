use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Source of the timestamps written to queue and item rows
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Clock anchored to UTC at construction and advanced by the tokio clock.
///
/// Row timestamps and driver sleeps share one time base, so a paused
/// runtime (`tokio::time::pause`) also moves persisted timestamps.
#[derive(Debug, Clone)]
pub struct RuntimeClock {
    anchor_utc: DateTime<Utc>,
    anchor: Instant,
}

impl RuntimeClock {
    pub fn new() -> Self {
        Self {
            anchor_utc: Utc::now(),
            anchor: Instant::now(),
        }
    }
}

impl Default for RuntimeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for RuntimeClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = Instant::now().saturating_duration_since(self.anchor);
        match chrono::Duration::from_std(elapsed) {
            Ok(elapsed) => self.anchor_utc + elapsed,
            Err(_) => Utc::now(),
        }
    }
}

/// Plain wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
