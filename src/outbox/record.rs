use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash)]
pub enum OutboxStatus {
    Pending,
    Published,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OutboxStatus::Pending => "PENDING",
            OutboxStatus::Published => "PUBLISHED",
            OutboxStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable domain event awaiting publication.
///
/// Rows are appended only through a [`Transaction`](crate::Transaction) so
/// they become visible together with the state change that produced them.
/// `locked_by`/`locked_until` form the claim lease taken by a worker before
/// it publishes; an expired lease makes the row claimable again.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct OutboxRecord {
    pub event_id: String,
    pub event_type: String,
    pub aggregate_id: Option<String>,
    pub payload: serde_json::Value,
    pub metadata: BTreeMap<String, String>,
    pub status: OutboxStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub created_at: SystemTime,
    pub published_at: Option<SystemTime>,
    pub locked_by: Option<String>,
    pub locked_until: Option<SystemTime>,
}

impl OutboxRecord {
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        OutboxRecord {
            event_id: Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            aggregate_id: None,
            payload,
            metadata: BTreeMap::new(),
            status: OutboxStatus::Pending,
            retry_count: 0,
            last_error: None,
            created_at: SystemTime::now(),
            published_at: None,
            locked_by: None,
            locked_until: None,
        }
    }

    pub fn encode<T: Serialize>(
        event_type: impl Into<String>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(event_type, serde_json::to_value(payload)?))
    }

    pub fn with_aggregate(mut self, aggregate_id: impl Into<String>) -> Self {
        self.aggregate_id = Some(aggregate_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Id of the upstream event that caused this one, if any.
    pub fn with_causation_id(self, causation_id: impl Into<String>) -> Self {
        self.with_metadata("causation-id", causation_id)
    }

    /// Pending and not held by a live lease.
    pub fn is_claimable(&self, now: SystemTime) -> bool {
        self.status == OutboxStatus::Pending
            && self.locked_until.map(|until| until <= now).unwrap_or(true)
    }

    pub(crate) fn release_lease(&mut self) {
        self.locked_by = None;
        self.locked_until = None;
    }
}

/// Row counts by status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxStats {
    pub pending: usize,
    pub published: usize,
    pub failed: usize,
    pub total: usize,
}

impl OutboxStats {
    pub fn count(&mut self, status: OutboxStatus) {
        match status {
            OutboxStatus::Pending => self.pending += 1,
            OutboxStatus::Published => self.published += 1,
            OutboxStatus::Failed => self.failed += 1,
        }
        self.total += 1;
    }
}
