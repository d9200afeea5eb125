//! Client request idempotency: a shared expiring key store and the guard
//! that replays stored responses.

mod guard;
mod store;
mod sweeper;

use thiserror::Error;

pub use guard::{IdempotencyGuard, KeyCheck};
pub use store::{IdempotencyStore, InMemoryIdempotencyStore, Reservation};
pub use sweeper::IdempotencySweeper;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdempotencyError {
    #[error("idempotency key must not be empty")]
    EmptyKey,

    #[error("request with idempotency key {key} is already in progress")]
    InProgress { key: String },

    #[error("idempotency response serialization failed: {0}")]
    Serde(String),

    #[error("idempotency store unavailable: {0}")]
    Storage(String),
}

impl From<serde_json::Error> for IdempotencyError {
    fn from(err: serde_json::Error) -> Self {
        IdempotencyError::Serde(err.to_string())
    }
}
