use std::collections::BTreeMap;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::PaymentError;
use super::payment::{Payment, PaymentView};
use super::provider::{
    AuthorizeRequest, CaptureRequest, PaymentProvider, ProviderFailure, ProviderKind,
    ProviderResult, RefundRequest,
};
use super::status::PaymentStatus;
use crate::commit_builder::TransactionExt;
use crate::config::PaymentConfig;
use crate::domain::{Repository, RepositoryError, RepositoryExt};
use crate::idempotency::IdempotencyGuard;
use crate::outbox::OutboxRecord;

pub const PAYMENT_INITIATED: &str = "PaymentInitiated";
pub const PAYMENT_AUTHORIZED: &str = "PaymentAuthorized";
pub const PAYMENT_CAPTURED: &str = "PaymentCaptured";
pub const PAYMENT_COMPLETED: &str = "PaymentCompleted";
pub const PAYMENT_REFUNDED: &str = "PaymentRefunded";
pub const PAYMENT_FAILED: &str = "PaymentFailed";

/// Time allowed on top of the provider timeout for loading and committing
/// under an idempotency reservation.
const RESERVATION_MARGIN: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePayment {
    pub donation_id: String,
    pub amount: u64,
    #[serde(default)]
    pub provider: ProviderKind,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizePayment {
    pub payment_method_id: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// Drives payments through their lifecycle.
///
/// Every operation loads the payment, checks the requested transition,
/// calls the provider when the transition needs one, then commits the new
/// state together with its outbox event. A provider failure commits the
/// payment as Failed (with a `PaymentFailed` event) and is then returned as
/// [`PaymentError::Provider`].
pub struct PaymentService<R> {
    repo: R,
    provider: Arc<dyn PaymentProvider>,
    config: PaymentConfig,
    guard: Option<IdempotencyGuard>,
}

impl<R: Repository> PaymentService<R> {
    pub fn new(repo: R, provider: impl PaymentProvider + 'static) -> Self {
        Self {
            repo,
            provider: Arc::new(provider),
            config: PaymentConfig::default(),
            guard: None,
        }
    }

    pub fn with_config(mut self, config: PaymentConfig) -> Self {
        self.config = config;
        self
    }

    /// Replay responses for requests carrying an idempotency key.
    pub fn with_idempotency(mut self, guard: IdempotencyGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn repo(&self) -> &R {
        &self.repo
    }

    pub fn config(&self) -> &PaymentConfig {
        &self.config
    }

    pub fn create_payment(&self, request: CreatePayment) -> Result<PaymentView, PaymentError> {
        if request.amount == 0 {
            return Err(PaymentError::Validation("amount must be positive".into()));
        }
        if request.donation_id.trim().is_empty() {
            return Err(PaymentError::Validation("donation_id is required".into()));
        }

        let key = request.idempotency_key.clone();
        self.guarded("create", key.as_deref(), || {
            let mut payment = Payment::new();
            payment.initiate(
                Uuid::new_v4().to_string(),
                request.donation_id,
                request.amount,
                request.provider,
                request.idempotency_key,
                SystemTime::now(),
            )?;
            self.commit_transition(&mut payment, PAYMENT_INITIATED)
        })
    }

    pub fn authorize(
        &self,
        payment_id: &str,
        request: AuthorizePayment,
    ) -> Result<PaymentView, PaymentError> {
        if request.payment_method_id.trim().is_empty() {
            return Err(PaymentError::Validation("payment_method_id is required".into()));
        }

        let key = request.idempotency_key.clone();
        self.guarded("authorize", key.as_deref(), || {
            let mut payment = self.load(payment_id)?;
            payment.status().transition_to(PaymentStatus::Authorized)?;

            let mut metadata = request.metadata;
            metadata.insert("payment_id".into(), payment.id().to_string());
            metadata.insert("donation_id".into(), payment.donation_id().to_string());
            let provider_request = AuthorizeRequest {
                amount: payment.amount(),
                payment_method_id: request.payment_method_id,
                metadata,
            };

            match self.call_provider("authorize", move |p| p.authorize(&provider_request)) {
                Ok(authorization) => {
                    payment.authorize(authorization.transaction_id, SystemTime::now())?;
                    self.commit_transition(&mut payment, PAYMENT_AUTHORIZED)
                }
                Err(failure) => Err(self.record_failure(payment, failure)),
            }
        })
    }

    /// Capture an authorized payment, optionally for less than the full amount.
    pub fn capture(
        &self,
        payment_id: &str,
        amount: Option<u64>,
    ) -> Result<PaymentView, PaymentError> {
        let mut payment = self.load(payment_id)?;
        payment.status().transition_to(PaymentStatus::Captured)?;
        let transaction_id = required_transaction(&payment)?;
        check_amount(&payment, amount)?;

        let provider_request = CaptureRequest {
            transaction_id,
            amount,
        };
        match self.call_provider("capture", move |p| p.capture(&provider_request)) {
            Ok(_) => {
                payment.capture(SystemTime::now())?;
                self.commit_transition(&mut payment, PAYMENT_CAPTURED)
            }
            Err(failure) => Err(self.record_failure(payment, failure)),
        }
    }

    pub fn complete(&self, payment_id: &str) -> Result<PaymentView, PaymentError> {
        let mut payment = self.load(payment_id)?;
        payment.complete(SystemTime::now())?;
        self.commit_transition(&mut payment, PAYMENT_COMPLETED)
    }

    pub fn refund(
        &self,
        payment_id: &str,
        reason: &str,
        amount: Option<u64>,
    ) -> Result<PaymentView, PaymentError> {
        let mut payment = self.load(payment_id)?;
        payment.status().transition_to(PaymentStatus::Refunded)?;
        let transaction_id = required_transaction(&payment)?;
        check_amount(&payment, amount)?;
        if reason.trim().is_empty() {
            return Err(PaymentError::Validation("refund reason is required".into()));
        }

        let provider_request = RefundRequest {
            transaction_id,
            amount,
            reason: reason.to_string(),
        };
        match self.call_provider("refund", move |p| p.refund(&provider_request)) {
            Ok(refund) => {
                payment.refund(refund.refund_id, reason.to_string(), SystemTime::now())?;
                self.commit_transition(&mut payment, PAYMENT_REFUNDED)
            }
            Err(failure) => Err(self.record_failure(payment, failure)),
        }
    }

    pub fn get_payment(&self, payment_id: &str) -> Result<PaymentView, PaymentError> {
        Ok(self.load(payment_id)?.view())
    }

    /// Check a provider webhook against the configured secret.
    pub fn verify_webhook(&self, payload: &[u8], signature: &str) -> Result<(), PaymentError> {
        let Some(secret) = self.config.webhook_secret.as_deref() else {
            return Err(PaymentError::Validation("webhook secret is not configured".into()));
        };
        if self
            .provider
            .verify_webhook_signature(payload, signature, secret)
        {
            Ok(())
        } else {
            warn!(provider = ?self.provider.kind(), "webhook signature rejected");
            Err(PaymentError::Validation("invalid webhook signature".into()))
        }
    }

    fn load(&self, payment_id: &str) -> Result<Payment, PaymentError> {
        self.repo
            .get_aggregate::<Payment>(payment_id)?
            .ok_or_else(|| PaymentError::NotFound(payment_id.to_string()))
    }

    fn commit_transition(
        &self,
        payment: &mut Payment,
        event_type: &str,
    ) -> Result<PaymentView, PaymentError> {
        let view = payment.view();
        let record = OutboxRecord::encode(event_type, &view)
            .map_err(RepositoryError::from)?
            .with_aggregate(payment.id());

        let mut tx = self.repo.transaction();
        tx.outbox(record);
        tx.commit(payment)?;

        info!(
            payment_id = %view.payment_id,
            status = %view.status,
            version = view.version,
            event_type,
            "payment transition committed"
        );
        Ok(view)
    }

    /// Commit the payment as Failed and turn the provider failure into the
    /// caller's error. A failed commit is returned instead.
    fn record_failure(&self, mut payment: Payment, failure: ProviderFailure) -> PaymentError {
        let payment_id = payment.id().to_string();
        let committed = payment
            .fail(failure.message.clone(), SystemTime::now())
            .and_then(|()| self.commit_transition(&mut payment, PAYMENT_FAILED));
        if let Err(err) = committed {
            warn!(payment_id = %payment_id, error = %err, "could not record provider failure");
            return err;
        }

        warn!(
            payment_id = %payment_id,
            error = %failure.message,
            retryable = failure.retryable,
            "provider call failed"
        );
        PaymentError::Provider {
            payment_id,
            message: failure.message,
            retryable: failure.retryable,
        }
    }

    /// Run a provider call on a helper thread, bounded by the provider timeout.
    fn call_provider<T, F>(&self, operation: &'static str, call: F) -> ProviderResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn PaymentProvider) -> ProviderResult<T> + Send + 'static,
    {
        let provider = Arc::clone(&self.provider);
        let timeout = self.config.provider_timeout();
        let (tx, rx) = mpsc::channel();

        thread::Builder::new()
            .name(format!("provider-{operation}"))
            .spawn(move || {
                let _ = tx.send(call(provider.as_ref()));
            })
            .map_err(|e| {
                ProviderFailure::retryable(format!("could not start provider {operation}: {e}"))
            })?;

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                debug!(operation, timeout_ms = timeout.as_millis() as u64, "provider call timed out");
                Err(ProviderFailure::retryable(format!(
                    "provider {operation} timed out after {}ms",
                    timeout.as_millis()
                )))
            }
            Err(RecvTimeoutError::Disconnected) => Err(ProviderFailure::retryable(format!(
                "provider {operation} aborted"
            ))),
        }
    }

    fn guarded<T, F>(
        &self,
        operation: &str,
        key: Option<&str>,
        run: F,
    ) -> Result<T, PaymentError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T, PaymentError>,
    {
        let (Some(guard), Some(key)) = (&self.guard, key) else {
            return run();
        };
        let reservation = guard.config().reservation_ttl().max(
            self.config
                .provider_timeout()
                .saturating_add(RESERVATION_MARGIN),
        );
        guard.execute_reserving(&format!("payment:{operation}:{key}"), reservation, run)
    }
}

fn required_transaction(payment: &Payment) -> Result<String, PaymentError> {
    payment
        .provider_transaction_id()
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| PaymentError::MissingProviderTransaction(payment.id().to_string()))
}

fn check_amount(payment: &Payment, amount: Option<u64>) -> Result<(), PaymentError> {
    match amount {
        Some(0) => Err(PaymentError::Validation("amount must be positive".into())),
        Some(amount) if amount > payment.amount() => Err(PaymentError::Validation(format!(
            "amount {amount} exceeds payment amount {}",
            payment.amount()
        ))),
        _ => Ok(()),
    }
}
