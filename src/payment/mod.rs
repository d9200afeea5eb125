//! Payment state machine and the transactional mutator around it.

mod error;
mod payment;
mod provider;
mod service;
mod simulated;
mod status;

pub use error::PaymentError;
pub use payment::{Payment, PaymentView};
pub use provider::{
    sign_webhook, verify_hmac_signature, Authorization, AuthorizeRequest, Capture,
    CaptureRequest, PaymentProvider, ProviderFailure, ProviderKind, ProviderResult, Refund,
    RefundRequest,
};
pub use service::{
    AuthorizePayment, CreatePayment, PaymentService, PAYMENT_AUTHORIZED, PAYMENT_CAPTURED,
    PAYMENT_COMPLETED, PAYMENT_FAILED, PAYMENT_INITIATED, PAYMENT_REFUNDED,
};
pub use simulated::{ProviderCall, SimulatedProvider};
pub use status::{InvalidTransition, PaymentStatus};
