use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use super::store::{IdempotencyStore, Reservation};
use super::IdempotencyError;
use crate::config::IdempotencyConfig;

/// Result of [`IdempotencyGuard::check_key`].
#[derive(Debug, Clone, PartialEq)]
pub struct KeyCheck {
    pub exists: bool,
    pub stored_response: Option<serde_json::Value>,
}

/// Replays stored responses for repeated client requests.
///
/// Responses are kept as JSON for `ttl`. [`IdempotencyGuard::execute`]
/// reserves the key before running the operation, so two concurrent
/// requests with one key never both run it.
#[derive(Clone)]
pub struct IdempotencyGuard {
    store: Arc<dyn IdempotencyStore>,
    config: IdempotencyConfig,
}

impl IdempotencyGuard {
    pub fn new(store: impl IdempotencyStore + 'static) -> Self {
        Self {
            store: Arc::new(store),
            config: IdempotencyConfig::default(),
        }
    }

    pub fn with_config(mut self, config: IdempotencyConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &IdempotencyConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn IdempotencyStore> {
        &self.store
    }

    pub fn check_key(&self, key: &str) -> Result<KeyCheck, IdempotencyError> {
        validate(key)?;
        match self.store.lookup(key)? {
            None => Ok(KeyCheck {
                exists: false,
                stored_response: None,
            }),
            Some(response) => Ok(KeyCheck {
                exists: true,
                stored_response: response
                    .map(|bytes| serde_json::from_slice(&bytes))
                    .transpose()?,
            }),
        }
    }

    pub fn store_response<T: Serialize>(&self, key: &str, response: &T) -> Result<(), IdempotencyError> {
        validate(key)?;
        let bytes = serde_json::to_vec(response)?;
        self.store.complete(key, bytes, self.config.ttl())
    }

    /// Run `operation` at most once per key within the ttl.
    ///
    /// A stored response is returned without running anything. A key held
    /// by a concurrent caller is [`IdempotencyError::InProgress`]. Errors
    /// release the reservation so the client may retry.
    pub fn execute<T, E, F>(&self, key: &str, operation: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<IdempotencyError>,
        F: FnOnce() -> Result<T, E>,
    {
        self.execute_reserving(key, self.config.reservation_ttl(), operation)
    }

    /// [`execute`](Self::execute) holding the key for `reservation`.
    ///
    /// The reservation must outlast `operation`: once it lapses a same-key
    /// caller is let through.
    pub fn execute_reserving<T, E, F>(
        &self,
        key: &str,
        reservation: Duration,
        operation: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<IdempotencyError>,
        F: FnOnce() -> Result<T, E>,
    {
        validate(key)?;
        match self.store.reserve(key, reservation)? {
            Reservation::Completed(bytes) => {
                debug!(key = %key, "idempotent replay");
                return serde_json::from_slice(&bytes)
                    .map_err(|e| E::from(IdempotencyError::from(e)));
            }
            Reservation::InProgress => {
                return Err(IdempotencyError::InProgress {
                    key: key.to_string(),
                }
                .into())
            }
            Reservation::Reserved => {}
        }

        match operation() {
            Ok(response) => {
                self.store_response(key, &response)?;
                Ok(response)
            }
            Err(err) => {
                if let Err(release_err) = self.store.release(key) {
                    warn!(key = %key, error = %release_err, "failed to release idempotency reservation");
                }
                Err(err)
            }
        }
    }

    pub fn sweep_expired(&self) -> Result<usize, IdempotencyError> {
        self.store.sweep_expired()
    }
}

fn validate(key: &str) -> Result<(), IdempotencyError> {
    if key.trim().is_empty() {
        return Err(IdempotencyError::EmptyKey);
    }
    Ok(())
}
