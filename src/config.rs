//! Runtime settings for the relay components.
//!
//! Every struct deserializes from a partial JSON document; missing fields
//! take the defaults below.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxWorkerConfig {
    /// Delay between ticks. Also the retry interval for failed rows.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Failed publish attempts before a row is parked as FAILED.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// How long a claimed row stays reserved for this worker.
    #[serde(default = "default_lease_ms")]
    pub lease_ms: u64,

    #[serde(default = "default_worker_id")]
    pub worker_id: String,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_batch_size() -> usize {
    10
}

fn default_max_retries() -> u32 {
    5
}

fn default_lease_ms() -> u64 {
    30_000
}

fn default_worker_id() -> String {
    "outbox-worker".to_string()
}

impl Default for OutboxWorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            lease_ms: default_lease_ms(),
            worker_id: default_worker_id(),
        }
    }
}

impl OutboxWorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_millis(self.lease_ms)
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease_ms = lease.as_millis() as u64;
        self
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "outbox.batch_size",
                reason: "must be at least 1".into(),
            });
        }
        if self.max_retries == 0 {
            return Err(ConfigError::Invalid {
                field: "outbox.max_retries",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Messages taken per poll round and handled concurrently.
    #[serde(default = "default_prefetch")]
    pub prefetch: usize,

    #[serde(default = "default_consumer_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
}

fn default_prefetch() -> usize {
    10
}

fn default_consumer_poll_timeout_ms() -> u64 {
    100
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            prefetch: default_prefetch(),
            poll_timeout_ms: default_consumer_poll_timeout_ms(),
        }
    }
}

impl ConsumerConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn with_prefetch(mut self, prefetch: usize) -> Self {
        self.prefetch = prefetch;
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout_ms = timeout.as_millis() as u64;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentConfig {
    /// Upper bound on a single provider call.
    #[serde(default = "default_provider_timeout_ms")]
    pub provider_timeout_ms: u64,

    /// Shared secret for provider webhook signatures.
    #[serde(default)]
    pub webhook_secret: Option<String>,
}

fn default_provider_timeout_ms() -> u64 {
    30_000
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            provider_timeout_ms: default_provider_timeout_ms(),
            webhook_secret: None,
        }
    }
}

impl PaymentConfig {
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }

    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_webhook_secret(mut self, secret: impl Into<String>) -> Self {
        self.webhook_secret = Some(secret.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyConfig {
    /// Lifetime of a stored response.
    #[serde(default = "default_idempotency_ttl_secs")]
    pub ttl_secs: u64,

    /// Lifetime of an in-progress reservation. Must exceed the provider
    /// timeout so a reservation never lapses during the call it guards.
    #[serde(default = "default_reservation_ttl_secs")]
    pub reservation_ttl_secs: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_idempotency_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_reservation_ttl_secs() -> u64 {
    60
}

fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_idempotency_ttl_secs(),
            reservation_ttl_secs: default_reservation_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl IdempotencyConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn reservation_ttl(&self) -> Duration {
        Duration::from_secs(self.reservation_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn with_reservation_ttl(mut self, ttl: Duration) -> Self {
        self.reservation_ttl_secs = ttl.as_secs();
        self
    }
}

/// All relay settings in one document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub outbox: OutboxWorkerConfig,
    #[serde(default)]
    pub consumer: ConsumerConfig,
    #[serde(default)]
    pub payment: PaymentConfig,
    #[serde(default)]
    pub idempotency: IdempotencyConfig,
}

impl RelayConfig {
    pub fn from_json_str(document: &str) -> Result<Self, ConfigError> {
        let config: RelayConfig = serde_json::from_str(document)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.outbox.validate()?;
        if self.consumer.prefetch == 0 {
            return Err(ConfigError::Invalid {
                field: "consumer.prefetch",
                reason: "must be at least 1".into(),
            });
        }
        if self.idempotency.reservation_ttl() <= self.payment.provider_timeout() {
            return Err(ConfigError::Invalid {
                field: "idempotency.reservation_ttl_secs",
                reason: format!(
                    "must exceed payment.provider_timeout_ms ({}ms)",
                    self.payment.provider_timeout_ms
                ),
            });
        }
        Ok(())
    }
}
