use std::time::Duration;

use tracing::{debug, info, warn};

use super::record::{OutboxRecord, OutboxStats, OutboxStatus};
use super::store::OutboxStore;
use crate::bus::{Event, PublishError, Publisher, EVENT_ID_HEADER};
use crate::config::OutboxWorkerConfig;
use crate::domain::RepositoryError;

/// Outcome of one tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainResult {
    pub claimed: usize,
    pub published: usize,
    /// Failed attempts left Pending for a later tick.
    pub retried: usize,
    /// Failed attempts that exhausted the retry budget.
    pub parked: usize,
    /// Store errors while marking rows; those rows are retried after their lease.
    pub errors: usize,
}

/// Drains claimed outbox rows to a [`Publisher`].
///
/// Rows of one tick are published sequentially, oldest first. The poll
/// interval is the only delay between attempts on a failing row.
pub struct OutboxWorker<S, P> {
    store: S,
    publisher: P,
    config: OutboxWorkerConfig,
}

impl<S, P> OutboxWorker<S, P> {
    pub fn new(store: S, publisher: P) -> Self {
        Self {
            store,
            publisher,
            config: OutboxWorkerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: OutboxWorkerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.config.worker_id = id.into();
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.config.max_retries = max;
        self
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.config = self.config.with_lease(lease);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.config = self.config.with_poll_interval(interval);
        self
    }

    pub fn config(&self) -> &OutboxWorkerConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }
}

/// Transport message for an outbox row: persistent, routed by event type,
/// carrying the event id and the row metadata as headers.
pub fn envelope(record: &OutboxRecord) -> Result<Event, PublishError> {
    let mut event = Event::json(&record.event_id, &record.event_type, &record.payload)
        .map_err(|e| PublishError::SerializationFailed(e.to_string()))?
        .persistent()
        .with_header(EVENT_ID_HEADER, &record.event_id);
    if let Some(aggregate_id) = &record.aggregate_id {
        event = event.with_header("x-aggregate-id", aggregate_id);
    }
    for (key, value) in &record.metadata {
        event = event.with_header(key, value);
    }
    Ok(event)
}

impl<S: OutboxStore, P: Publisher> OutboxWorker<S, P> {
    /// Claim one batch and publish it.
    pub fn tick(&self) -> Result<DrainResult, RepositoryError> {
        let claimed = self.store.claim_pending(
            &self.config.worker_id,
            self.config.batch_size,
            self.config.lease(),
        )?;

        let mut result = DrainResult {
            claimed: claimed.len(),
            ..DrainResult::default()
        };
        if claimed.is_empty() {
            return Ok(result);
        }
        debug!(worker_id = %self.config.worker_id, claimed = claimed.len(), "claimed outbox batch");

        for record in &claimed {
            match envelope(record).and_then(|event| self.publisher.publish(event)) {
                Ok(()) => match self.store.mark_published(&record.event_id) {
                    Ok(()) => {
                        debug!(event_id = %record.event_id, event_type = %record.event_type, "published");
                        result.published += 1;
                    }
                    Err(e) => {
                        warn!(event_id = %record.event_id, error = %e, "published but could not mark row");
                        result.errors += 1;
                    }
                },
                Err(publish_error) => {
                    let reason = publish_error.to_string();
                    match self
                        .store
                        .record_failure(&record.event_id, &reason, self.config.max_retries)
                    {
                        Ok(OutboxStatus::Failed) => {
                            warn!(
                                event_id = %record.event_id,
                                event_type = %record.event_type,
                                attempts = record.retry_count + 1,
                                error = %reason,
                                "publish retries exhausted, row parked as FAILED"
                            );
                            result.parked += 1;
                        }
                        Ok(_) => {
                            debug!(
                                event_id = %record.event_id,
                                attempt = record.retry_count + 1,
                                error = %reason,
                                "publish failed, will retry"
                            );
                            result.retried += 1;
                        }
                        Err(e) => {
                            warn!(event_id = %record.event_id, error = %e, "could not record publish failure");
                            result.errors += 1;
                        }
                    }
                }
            }
        }

        Ok(result)
    }

    /// Requeue a parked row. Only valid for FAILED rows.
    pub fn retry_failed_event(&self, event_id: &str) -> Result<(), RepositoryError> {
        self.store.retry_failed(event_id)?;
        info!(event_id = %event_id, "failed outbox row requeued");
        Ok(())
    }

    pub fn stats(&self) -> Result<OutboxStats, RepositoryError> {
        self.store.outbox_stats()
    }
}
