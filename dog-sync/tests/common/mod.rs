#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use dog_sync::{
    AdapterError, AdmissionPolicy, NewItem, RunConfig, SyncAdapter, SyncEngine, SyncSettings,
    SyncResult, admission::Unlimited,
};

/// Adapter whose failures are scripted per external id.
///
/// Each external id can be given a number of failing calls before it
/// succeeds; `u32::MAX` means it never succeeds. Every call is logged.
#[derive(Default)]
pub struct ScriptedAdapter {
    failures: Mutex<HashMap<String, (u32, AdapterError)>>,
    calls: Mutex<Vec<String>>,
    unavailable: AtomicBool,
    next_remote_id: AtomicU64,
    latency: Mutex<Option<Duration>>,
}

impl ScriptedAdapter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next `times` calls for `external_id` with a transient error
    pub fn fail(&self, external_id: &str, times: u32) {
        self.fail_with(external_id, times, AdapterError::transient("remote timeout"));
    }

    pub fn fail_with(&self, external_id: &str, times: u32, error: AdapterError) {
        self.failures
            .lock()
            .insert(external_id.to_string(), (times, error));
    }

    pub fn always_fail(&self, external_id: &str) {
        self.fail(external_id, u32::MAX);
    }

    /// Every call fails with a connection error
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Simulated remote call duration
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn calls_for(&self, external_id: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.ends_with(&format!(":{external_id}")))
            .count()
    }

    async fn call(&self, operation: &str, external_id: &str) -> Result<(), AdapterError> {
        self.calls.lock().push(format!("{operation}:{external_id}"));

        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AdapterError::unavailable("connection refused"));
        }

        let mut failures = self.failures.lock();
        if let Some((left, error)) = failures.get_mut(external_id) {
            if *left > 0 {
                if *left != u32::MAX {
                    *left -= 1;
                }
                return Err(error.clone());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SyncAdapter for ScriptedAdapter {
    fn supports(&self, entity_type: &str) -> bool {
        matches!(entity_type, "product" | "customer")
    }

    async fn create_entity(&self, _entity_type: &str, payload: &Value) -> Result<String, AdapterError> {
        let external_id = payload
            .get("local_id")
            .and_then(Value::as_str)
            .unwrap_or("new")
            .to_string();
        self.call("create", &external_id).await?;
        let n = self.next_remote_id.fetch_add(1, Ordering::SeqCst);
        Ok(format!("remote-{n}"))
    }

    async fn update_entity(&self, _entity_type: &str, external_id: &str, _payload: &Value) -> Result<(), AdapterError> {
        self.call("update", external_id).await
    }

    async fn delete_entity(&self, _entity_type: &str, external_id: &str) -> Result<(), AdapterError> {
        self.call("delete", external_id).await
    }
}

/// `n` update items with external ids `ext-0..ext-{n-1}`
pub fn update_items(n: usize) -> Vec<NewItem> {
    (0..n)
        .map(|i| NewItem::update(format!("ext-{i}"), json!({ "n": i })))
        .collect()
}

/// Run configuration without inter-batch pauses
pub fn fast_config() -> RunConfig {
    RunConfig::default()
        .with_batch_delay(Duration::ZERO)
        .with_retry_delay(Duration::from_millis(100))
}

pub fn test_settings() -> SyncSettings {
    SyncSettings {
        default_timeout: Duration::from_secs(300),
        admission: AdmissionPolicy {
            limit: 100,
            window: Duration::from_secs(60),
        },
        ..SyncSettings::default()
    }
}

/// Engine over an in-memory store with generous admission
pub fn engine(adapter: Arc<ScriptedAdapter>) -> SyncResult<SyncEngine> {
    SyncEngine::builder(adapter).with_settings(test_settings()).build()
}

/// Engine that never rate limits
pub fn unlimited_engine(adapter: Arc<ScriptedAdapter>, settings: SyncSettings) -> SyncResult<SyncEngine> {
    SyncEngine::builder(adapter)
        .with_admission(Arc::new(Unlimited))
        .with_settings(settings)
        .build()
}
