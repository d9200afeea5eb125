//! Transactional outbox: rows written with the state change that produced
//! them, drained to the transport by a leasing worker.

mod record;
mod store;
mod thread;
mod worker;

pub use record::{OutboxRecord, OutboxStats, OutboxStatus};
pub use store::OutboxStore;
pub use thread::{OutboxWorkerThread, WorkerStats};
pub use worker::{envelope, DrainResult, OutboxWorker};
