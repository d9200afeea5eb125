use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Payment lifecycle.
///
/// ```text
/// Pending -> Authorized -> Captured -> Completed
///                                  \-> Refunded
/// ```
///
/// Failed is not part of the table. It is entered through
/// [`PaymentStatus::fail`] from any non-terminal state when the provider
/// reports a failure.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentStatus {
    #[default]
    Pending,
    Authorized,
    Captured,
    Completed,
    Failed,
    Refunded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid payment transition from {from} to {to}")]
pub struct InvalidTransition {
    pub from: PaymentStatus,
    pub to: PaymentStatus,
}

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 6] = [
        PaymentStatus::Pending,
        PaymentStatus::Authorized,
        PaymentStatus::Captured,
        PaymentStatus::Completed,
        PaymentStatus::Failed,
        PaymentStatus::Refunded,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Authorized => "AUTHORIZED",
            PaymentStatus::Captured => "CAPTURED",
            PaymentStatus::Completed => "COMPLETED",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Refunded => "REFUNDED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PaymentStatus::Completed | PaymentStatus::Failed | PaymentStatus::Refunded
        )
    }

    /// The adjacency table. Failed never appears as a target here.
    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Pending, Authorized)
                | (Authorized, Captured)
                | (Captured, Completed)
                | (Captured, Refunded)
        )
    }

    pub fn transition_to(self, next: PaymentStatus) -> Result<PaymentStatus, InvalidTransition> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    /// The escape path to Failed.
    pub fn fail(self) -> Result<PaymentStatus, InvalidTransition> {
        if self.is_terminal() {
            Err(InvalidTransition {
                from: self,
                to: PaymentStatus::Failed,
            })
        } else {
            Ok(PaymentStatus::Failed)
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
