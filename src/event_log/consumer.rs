use thiserror::Error;
use tracing::{debug, info, warn};

use super::record::EventLogRecord;
use super::store::EventLogStore;
use crate::bus::Event;
use crate::commit_builder::{Transaction, TransactionExt};
use crate::domain::{Repository, RepositoryError};

/// What happened to one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Effects applied and recorded.
    Applied,
    /// Already processed; nothing changed.
    Duplicate,
    /// Not an event this consumer handles.
    Ignored,
}

#[derive(Debug, Error)]
pub enum ConsumeError {
    #[error("malformed payload for {event_type}: {reason}")]
    Payload { event_type: String, reason: String },

    #[error("event {event_id} rejected: {reason}")]
    Rejected { event_id: String, reason: String },

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl ConsumeError {
    pub fn payload(event: &Event, err: impl std::fmt::Display) -> Self {
        ConsumeError::Payload {
            event_type: event.event_type.clone(),
            reason: err.to_string(),
        }
    }

    pub fn rejected(event: &Event, reason: impl Into<String>) -> Self {
        ConsumeError::Rejected {
            event_id: event.event_id().to_string(),
            reason: reason.into(),
        }
    }
}

/// Applies an inbound event's effects at most once per event id and
/// consumer name.
///
/// The business mutation, the Processed event log row and any derived outbox
/// rows are committed together. A failed attempt leaves only a Failed event
/// log row behind and the error is returned so the transport redelivers.
#[derive(Clone)]
pub struct IdempotentConsumer<R> {
    repo: R,
    name: String,
}

impl<R> IdempotentConsumer<R>
where
    R: Repository + EventLogStore,
{
    pub fn new(name: impl Into<String>, repo: R) -> Self {
        Self {
            repo,
            name: name.into(),
        }
    }

    pub fn repo(&self) -> &R {
        &self.repo
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle<F>(&self, event: &Event, apply: F) -> Result<Delivery, ConsumeError>
    where
        F: FnOnce(&mut Transaction<'_, R>, &Event) -> Result<(), ConsumeError>,
    {
        let event_id = event.event_id();
        if let Some(existing) = self.repo.event_log(&self.name, event_id)? {
            if existing.is_processed() {
                debug!(consumer = %self.name, event_id = %event_id, "duplicate delivery skipped");
                return Ok(Delivery::Duplicate);
            }
        }

        let mut tx = self.repo.transaction();
        let outcome = match apply(&mut tx, event) {
            Ok(()) => {
                tx.record_event(EventLogRecord::processed(&self.name, event));
                tx.commit_all().map_err(ConsumeError::from)
            }
            Err(err) => Err(err),
        };

        match outcome {
            Ok(()) => {
                info!(
                    consumer = %self.name,
                    event_id = %event_id,
                    event_type = %event.event_type,
                    "event applied"
                );
                Ok(Delivery::Applied)
            }
            Err(ConsumeError::Repository(RepositoryError::DuplicateKey {
                collection: "event_log",
                ..
            })) => {
                debug!(consumer = %self.name, event_id = %event_id, "lost race to a concurrent delivery");
                Ok(Delivery::Duplicate)
            }
            Err(err) => {
                let failure = self
                    .repo
                    .record_event_failure(EventLogRecord::failed(&self.name, event, err.to_string()))?;
                warn!(
                    consumer = %self.name,
                    event_id = %event_id,
                    retry_count = failure.retry_count,
                    error = %err,
                    "event processing failed"
                );
                Err(err)
            }
        }
    }
}
