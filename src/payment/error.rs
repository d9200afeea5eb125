use thiserror::Error;

use super::status::InvalidTransition;
use crate::domain::RepositoryError;
use crate::idempotency::IdempotencyError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaymentError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("payment {0} not found")]
    NotFound(String),

    #[error("payment {0} has no provider transaction id")]
    MissingProviderTransaction(String),

    #[error("provider failed for payment {payment_id}: {message}")]
    Provider {
        payment_id: String,
        message: String,
        retryable: bool,
    },

    #[error(transparent)]
    Idempotency(#[from] IdempotencyError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl PaymentError {
    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::Provider { retryable, .. } => *retryable,
            PaymentError::Idempotency(IdempotencyError::InProgress { .. }) => true,
            PaymentError::Repository(RepositoryError::ConcurrentWrite { .. }) => true,
            _ => false,
        }
    }
}
