pub mod bus;
pub mod commit_builder;
pub mod config;
mod domain;
pub mod event_log;
mod hashmap;
pub mod idempotency;
pub mod ledger;
pub mod outbox;
pub mod payment;
pub mod read_model;
pub mod totals;

pub use commit_builder::{Transaction, TransactionExt, WriteSet};
pub use config::{
    ConfigError, ConsumerConfig, IdempotencyConfig, OutboxWorkerConfig, PaymentConfig,
    RelayConfig,
};
pub use domain::{
    hydrate, Aggregate, Entity, EventRecord, PayloadError, Repository, RepositoryError,
    RepositoryExt,
};
pub use event_log::{
    ConsumeError, Delivery, EventLogRecord, EventLogStatus, EventLogStore, IdempotentConsumer,
};
pub use hashmap::{FaultPoint, HashMapRepository};
pub use outbox::{OutboxRecord, OutboxStats, OutboxStatus, OutboxStore, OutboxWorker};
pub use read_model::{ReadModel, ReadModelStore, ReadModelsExt, Versioned};
