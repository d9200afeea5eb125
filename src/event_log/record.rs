use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::bus::Event;

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub enum EventLogStatus {
    Processed,
    Failed,
}

/// Per consumer and inbound event id: whether the consumer has applied the
/// event's effects.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct EventLogRecord {
    /// Name of the consumer that owns this row.
    pub consumer: String,
    /// Assigned by the upstream producer.
    pub event_id: String,
    pub event_type: String,
    /// The received message body, kept for audit and replay.
    pub payload: serde_json::Value,
    pub status: EventLogStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub processed_at: Option<SystemTime>,
    pub updated_at: SystemTime,
}

impl EventLogRecord {
    pub fn processed(consumer: &str, event: &Event) -> Self {
        let now = SystemTime::now();
        EventLogRecord {
            consumer: consumer.to_string(),
            event_id: event.event_id().to_string(),
            event_type: event.event_type.clone(),
            payload: audit_payload(event),
            status: EventLogStatus::Processed,
            retry_count: 0,
            last_error: None,
            processed_at: Some(now),
            updated_at: now,
        }
    }

    pub fn failed(consumer: &str, event: &Event, error: impl Into<String>) -> Self {
        EventLogRecord {
            consumer: consumer.to_string(),
            event_id: event.event_id().to_string(),
            event_type: event.event_type.clone(),
            payload: audit_payload(event),
            status: EventLogStatus::Failed,
            retry_count: 1,
            last_error: Some(error.into()),
            processed_at: None,
            updated_at: SystemTime::now(),
        }
    }

    pub fn is_processed(&self) -> bool {
        self.status == EventLogStatus::Processed
    }

    /// Unique key of the row: `(consumer, event_id)`.
    pub fn key(&self) -> (String, String) {
        (self.consumer.clone(), self.event_id.clone())
    }
}

fn audit_payload(event: &Event) -> serde_json::Value {
    serde_json::from_slice(&event.payload)
        .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(&event.payload).into_owned()))
}
