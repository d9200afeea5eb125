//! Donation ledger: records donations and settles them from payment events.

mod donation;
mod service;

use thiserror::Error;

use crate::domain::RepositoryError;

pub use donation::{Donation, DonationStatus, DonationView};
pub use service::{
    LedgerService, RecordDonation, DONATION_CREATED, DONATION_REFUNDED, LEDGER_CONSUMER,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("donation {0} not found")]
    NotFound(String),

    #[error("cannot {action} donation {donation_id} in status {status}")]
    InvalidState {
        donation_id: String,
        status: DonationStatus,
        action: &'static str,
    },

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}
