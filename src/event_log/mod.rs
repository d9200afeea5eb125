//! Event log: the per-consumer, per-event-id ledger behind idempotent
//! consumption.

mod consumer;
mod record;
mod store;

pub use consumer::{ConsumeError, Delivery, IdempotentConsumer};
pub use record::{EventLogRecord, EventLogStatus};
pub use store::EventLogStore;
