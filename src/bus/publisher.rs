//! Transport traits.
//!
//! Implementations might sit on RabbitMQ, NATS JetStream or Kafka. The
//! contract is at-least-once: a message that is not acked may be seen again.

use std::time::Duration;

use super::event::{Event, PublishError};

pub trait Publisher: Send + Sync {
    /// Publish one event. `Ok` means the broker acknowledged it.
    fn publish(&self, event: Event) -> Result<(), PublishError>;
}

pub trait Subscriber: Send + Sync {
    /// Wait up to `timeout` for the next delivery.
    fn poll(&self, timeout: Duration) -> Result<Option<Event>, PublishError>;

    fn ack(&self, event_id: &str) -> Result<(), PublishError>;

    /// Negative acknowledgment; the message is redelivered later.
    fn nack(&self, event_id: &str) -> Result<(), PublishError>;
}

impl<P: Publisher + ?Sized> Publisher for std::sync::Arc<P> {
    fn publish(&self, event: Event) -> Result<(), PublishError> {
        (**self).publish(event)
    }
}
