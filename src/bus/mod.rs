//! Transport boundary: events, publisher/subscriber traits, an in-memory
//! queue and the consumption loop.

mod consumer;
mod event;
mod in_memory_queue;
mod publisher;

pub use consumer::{process_batch, ConsumerStats, ConsumerThread};
pub use event::{Event, PublishError, EVENT_ID_HEADER};
pub use in_memory_queue::InMemoryQueue;
pub use publisher::{Publisher, Subscriber};
