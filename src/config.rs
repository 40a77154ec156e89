//! Relay configuration.
//!
//! Every field has a default, so a partial document is enough:
//!
//! ```
//! use outbox_relay::RelayConfig;
//!
//! let config = RelayConfig::from_json_str(r#"{
//!     "dispatcher": { "worker_id": "relay-a", "lanes": 4, "backoff_max": "2m" },
//!     "idempotency": { "retention": "3days" }
//! }"#).unwrap();
//!
//! assert_eq!(config.dispatcher.lanes, 4);
//! assert_eq!(config.dispatcher.batch_size, 100);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dispatch::Backoff;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration document: {0}")]
    Parse(String),

    #[error("dispatcher.worker_id must not be empty")]
    EmptyWorkerId,

    #[error("dispatcher.{0} must be greater than zero")]
    Zero(&'static str),

    #[error("dispatcher.backoff_base ({base:?}) exceeds dispatcher.backoff_max ({max:?})")]
    BackoffOrder { base: Duration, max: Duration },

    #[error("idempotency.{0} must be greater than zero")]
    ZeroGuardSetting(&'static str),
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

/// Top-level settings for a relay process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub dispatcher: DispatcherConfig,
    pub idempotency: GuardConfig,
}

impl RelayConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: RelayConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.dispatcher.validate()?;
        self.idempotency.validate()
    }
}

/// Dispatcher settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Recorded as `leased_by` on every record this process leases.
    pub worker_id: String,
    /// Maximum records leased per cycle.
    pub batch_size: usize,
    /// How long a leased record stays invisible to other dispatchers.
    #[serde(with = "humantime_serde")]
    pub lease_duration: Duration,
    /// Sleep between cycles of a lane thread.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Attempts per retry budget before a record is failed.
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub backoff_base: Duration,
    #[serde(with = "humantime_serde")]
    pub backoff_max: Duration,
    /// 1 dispatches through a single global lane; more partitions by aggregate.
    pub lanes: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        DispatcherConfig {
            worker_id: format!("relay-{}", std::process::id()),
            batch_size: 100,
            lease_duration: Duration::from_secs(60),
            poll_interval: Duration::from_millis(100),
            max_attempts: 5,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(300),
            lanes: 1,
        }
    }
}

impl DispatcherConfig {
    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_lease_duration(mut self, lease: Duration) -> Self {
        self.lease_duration = lease;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max;
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max;
        self
    }

    pub fn with_lanes(mut self, lanes: u32) -> Self {
        self.lanes = lanes;
        self
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.backoff_base, self.backoff_max)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_id.trim().is_empty() {
            return Err(ConfigError::EmptyWorkerId);
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Zero("batch_size"));
        }
        if self.lease_duration.is_zero() {
            return Err(ConfigError::Zero("lease_duration"));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Zero("max_attempts"));
        }
        if self.lanes == 0 {
            return Err(ConfigError::Zero("lanes"));
        }
        if self.backoff_base > self.backoff_max {
            return Err(ConfigError::BackoffOrder {
                base: self.backoff_base,
                max: self.backoff_max,
            });
        }
        Ok(())
    }
}

/// Idempotency guard settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// How long a processed id is remembered. Must exceed the broker's
    /// maximum redelivery delay or late duplicates get through.
    #[serde(with = "humantime_serde")]
    pub retention: Duration,
    /// Sleep between sweeps of the background sweeper.
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for GuardConfig {
    fn default() -> Self {
        GuardConfig {
            retention: Duration::from_secs(24 * 60 * 60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl GuardConfig {
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retention.is_zero() {
            return Err(ConfigError::ZeroGuardSetting("retention"));
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::ZeroGuardSetting("sweep_interval"));
        }
        Ok(())
    }
}
