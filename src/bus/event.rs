use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Header carrying the producer-assigned event id.
pub const EVENT_ID_HEADER: &str = "x-event-id";

/// A message on the transport. `event_type` doubles as the routing key.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    pub id: String,
    pub event_type: String,
    /// JSON document.
    pub payload: Vec<u8>,
    pub headers: Vec<(String, String)>,
    pub persistent: bool,
    /// How many times this message has been handed to a subscriber, including this delivery.
    pub delivery_count: u32,
}

impl Event {
    pub fn new(id: impl Into<String>, event_type: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            event_type: event_type.into(),
            payload,
            headers: Vec::new(),
            persistent: false,
            delivery_count: 0,
        }
    }

    pub fn json<T: Serialize>(
        id: impl Into<String>,
        event_type: impl Into<String>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(id, event_type, serde_json::to_vec(payload)?))
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The producer's event id: the `x-event-id` header when present, the message id otherwise.
    pub fn event_id(&self) -> &str {
        self.header(EVENT_ID_HEADER).unwrap_or(&self.id)
    }

    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    pub fn is_redelivery(&self) -> bool {
        self.delivery_count > 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("serialization failed: {0}")]
    SerializationFailed(String),

    /// The broker received the message but did not acknowledge it.
    #[error("broker did not acknowledge: {0}")]
    Nack(String),

    #[error("event rejected: {0}")]
    Rejected(String),

    #[error("publish timeout")]
    Timeout,
}
