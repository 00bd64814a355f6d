//! # Sync engine configuration
//!
//! Configuration follows the DogRS convention: a flat string key/value
//! store that applications fill however they like, with a helper that
//! lifts prefixed environment variables into it.
//!
//! ```rust
//! use dog_sync::config::{SyncConfig, SyncSettings};
//!
//! let mut config = SyncConfig::new();
//! config.set("sync.max_concurrent_queues", "4");
//! config.set("sync.run.batch_size", "100");
//!
//! let settings = SyncSettings::from_config(&config).unwrap();
//! assert_eq!(settings.max_concurrent_queues, 4);
//! assert_eq!(settings.default_run.batch_size, 100);
//! ```
//!
//! With `SyncSettings::from_env("DOGSYNC__")`, the variable
//! `DOGSYNC__SYNC__ADMISSION__LIMIT=20` sets `sync.admission.limit`.
//!
//! | key | default |
//! |-----|---------|
//! | `sync.default_timeout_ms` | 300000 |
//! | `sync.max_concurrent_queues` | 8 |
//! | `sync.admission.limit` | 10 |
//! | `sync.admission.window_ms` | 60000 |
//! | `sync.max_retry_backoff_ms` | 3600000 |
//! | `sync.retry_jitter` | 0.0 |
//! | `sync.event_capacity` | 1024 |
//! | `sync.run.batch_size` | 50 |
//! | `sync.run.batch_delay_ms` | 1000 |
//! | `sync.run.max_retries` | 3 |
//! | `sync.run.retry_delay_ms` | 1000 |

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use crate::{
    admission::AdmissionPolicy,
    SyncError, SyncResult,
    types::RunConfig,
};

/// Flat key/value configuration store
#[derive(Debug, Default, Clone)]
pub struct SyncConfig {
    values: HashMap<String, String>,
}

impl SyncConfig {
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    /// Collect every environment variable starting with `prefix`
    pub fn from_env(prefix: &str) -> Self {
        Self::from_vars(std::env::vars(), prefix)
    }

    /// Same as [`Self::from_env`] over an explicit variable list.
    ///
    /// `PREFIX__SYNC__RUN__BATCH_SIZE` becomes `sync.run.batch_size`.
    pub fn from_vars<I>(vars: I, prefix: &str) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut config = Self::new();
        for (key, value) in vars {
            if let Some(stripped) = key.strip_prefix(prefix) {
                let normalized = stripped.to_lowercase().replace("__", ".");
                config.set(normalized, value);
            }
        }
        config
    }

    pub fn set<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Parse `key` if present; a malformed value is an error, not a default
    pub fn parse<T: FromStr>(&self, key: &str) -> SyncResult<Option<T>> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|_| SyncError::InvalidConfig(format!("{key}: cannot parse {raw:?}"))),
        }
    }

    fn millis(&self, key: &str) -> SyncResult<Option<Duration>> {
        Ok(self.parse::<u64>(key)?.map(Duration::from_millis))
    }
}

/// Engine-wide settings
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
    /// Wall-clock budget for one driver run
    pub default_timeout: Duration,
    /// Queues driven concurrently; further queues wait in `pending`
    pub max_concurrent_queues: usize,
    pub admission: AdmissionPolicy,
    /// Upper bound on a single retry backoff
    pub max_retry_backoff: Duration,
    /// Random spread applied to retry backoff, 0.0-1.0
    pub retry_jitter: f64,
    /// Buffered audit events per subscriber
    pub event_capacity: usize,
    /// Run configuration used when a caller supplies none
    pub default_run: RunConfig,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(300),
            max_concurrent_queues: 8,
            admission: AdmissionPolicy::default(),
            max_retry_backoff: Duration::from_secs(3600),
            retry_jitter: 0.0,
            event_capacity: 1024,
            default_run: RunConfig::default(),
        }
    }
}

impl SyncSettings {
    /// Overlay `config` on the defaults and validate the result
    pub fn from_config(config: &SyncConfig) -> SyncResult<Self> {
        let defaults = Self::default();
        let run = RunConfig {
            batch_size: config.parse("sync.run.batch_size")?.unwrap_or(defaults.default_run.batch_size),
            batch_delay: config.millis("sync.run.batch_delay_ms")?.unwrap_or(defaults.default_run.batch_delay),
            max_retries: config.parse("sync.run.max_retries")?.unwrap_or(defaults.default_run.max_retries),
            retry_delay: config.millis("sync.run.retry_delay_ms")?.unwrap_or(defaults.default_run.retry_delay),
        };

        let admission = AdmissionPolicy::new(
            config.parse("sync.admission.limit")?.unwrap_or(defaults.admission.limit),
            config.millis("sync.admission.window_ms")?.unwrap_or(defaults.admission.window),
        )?;

        let settings = Self {
            default_timeout: config.millis("sync.default_timeout_ms")?.unwrap_or(defaults.default_timeout),
            max_concurrent_queues: config
                .parse("sync.max_concurrent_queues")?
                .unwrap_or(defaults.max_concurrent_queues),
            admission,
            max_retry_backoff: config.millis("sync.max_retry_backoff_ms")?.unwrap_or(defaults.max_retry_backoff),
            retry_jitter: config.parse("sync.retry_jitter")?.unwrap_or(defaults.retry_jitter),
            event_capacity: config.parse("sync.event_capacity")?.unwrap_or(defaults.event_capacity),
            default_run: run,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_env(prefix: &str) -> SyncResult<Self> {
        Self::from_config(&SyncConfig::from_env(prefix))
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.default_timeout.is_zero() {
            return Err(SyncError::InvalidConfig("default_timeout must be greater than zero".to_string()));
        }
        if self.max_concurrent_queues == 0 {
            return Err(SyncError::InvalidConfig("max_concurrent_queues must be greater than 0".to_string()));
        }
        if !(0.0..=1.0).contains(&self.retry_jitter) {
            return Err(SyncError::InvalidConfig(format!(
                "retry_jitter must be within 0.0..=1.0, got {}",
                self.retry_jitter
            )));
        }
        if self.event_capacity == 0 {
            return Err(SyncError::InvalidConfig("event_capacity must be greater than 0".to_string()));
        }
        self.default_run.validate()
    }
}
