use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use super::error::PaymentError;
use super::provider::ProviderKind;
use super::status::PaymentStatus;
use crate::domain::{Entity, EventRecord};

/// Event-sourced payment. Every transition is guarded by [`PaymentStatus`]
/// and recorded on the entity, so replay rebuilds the same state.
#[derive(Default)]
pub struct Payment {
    pub entity: Entity,
    donation_id: String,
    amount: u64,
    provider: ProviderKind,
    status: PaymentStatus,
    provider_transaction_id: Option<String>,
    idempotency_key: Option<String>,
    failure_reason: Option<String>,
    refund_reason: Option<String>,
    refund_id: Option<String>,
    created_at: Option<SystemTime>,
    authorized_at: Option<SystemTime>,
    captured_at: Option<SystemTime>,
    completed_at: Option<SystemTime>,
    failed_at: Option<SystemTime>,
    refunded_at: Option<SystemTime>,
}

impl Payment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initiate(
        &mut self,
        payment_id: String,
        donation_id: String,
        amount: u64,
        provider: ProviderKind,
        idempotency_key: Option<String>,
        at: SystemTime,
    ) -> Result<(), PaymentError> {
        self.entity.set_id(&payment_id);
        self.entity.digest(
            "PaymentInitiated",
            &(
                &payment_id,
                &donation_id,
                amount,
                provider,
                &idempotency_key,
                at,
            ),
        )?;
        self.donation_id = donation_id;
        self.amount = amount;
        self.provider = provider;
        self.status = PaymentStatus::Pending;
        self.idempotency_key = idempotency_key;
        self.created_at = Some(at);
        Ok(())
    }

    pub fn authorize(
        &mut self,
        transaction_id: String,
        at: SystemTime,
    ) -> Result<(), PaymentError> {
        let next = self.status.transition_to(PaymentStatus::Authorized)?;
        self.entity
            .digest("PaymentAuthorized", &(&transaction_id, at))?;
        self.status = next;
        self.provider_transaction_id = Some(transaction_id);
        self.authorized_at = Some(at);
        Ok(())
    }

    pub fn capture(&mut self, at: SystemTime) -> Result<(), PaymentError> {
        let next = self.status.transition_to(PaymentStatus::Captured)?;
        self.entity.digest("PaymentCaptured", &at)?;
        self.status = next;
        self.captured_at = Some(at);
        Ok(())
    }

    pub fn complete(&mut self, at: SystemTime) -> Result<(), PaymentError> {
        let next = self.status.transition_to(PaymentStatus::Completed)?;
        self.entity.digest("PaymentCompleted", &at)?;
        self.status = next;
        self.completed_at = Some(at);
        Ok(())
    }

    pub fn refund(
        &mut self,
        refund_id: String,
        reason: String,
        at: SystemTime,
    ) -> Result<(), PaymentError> {
        let next = self.status.transition_to(PaymentStatus::Refunded)?;
        self.entity
            .digest("PaymentRefunded", &(&refund_id, &reason, at))?;
        self.status = next;
        self.refund_id = Some(refund_id);
        self.refund_reason = Some(reason);
        self.refunded_at = Some(at);
        Ok(())
    }

    pub fn fail(&mut self, reason: String, at: SystemTime) -> Result<(), PaymentError> {
        let next = self.status.fail()?;
        self.entity.digest("PaymentFailed", &(&reason, at))?;
        self.status = next;
        self.failure_reason = Some(reason);
        self.failed_at = Some(at);
        Ok(())
    }

    fn replay(&mut self, event: &EventRecord) -> Result<(), String> {
        let decode_err = |e: crate::domain::PayloadError| e.to_string();
        match event.event_name.as_str() {
            "PaymentInitiated" => {
                let (id, donation_id, amount, provider, key, at): (
                    String,
                    String,
                    u64,
                    ProviderKind,
                    Option<String>,
                    SystemTime,
                ) = event.decode().map_err(decode_err)?;
                self.initiate(id, donation_id, amount, provider, key, at)
                    .map_err(|e| e.to_string())
            }
            "PaymentAuthorized" => {
                let (txn, at): (String, SystemTime) = event.decode().map_err(decode_err)?;
                self.authorize(txn, at).map_err(|e| e.to_string())
            }
            "PaymentCaptured" => {
                let at: SystemTime = event.decode().map_err(decode_err)?;
                self.capture(at).map_err(|e| e.to_string())
            }
            "PaymentCompleted" => {
                let at: SystemTime = event.decode().map_err(decode_err)?;
                self.complete(at).map_err(|e| e.to_string())
            }
            "PaymentRefunded" => {
                let (refund_id, reason, at): (String, String, SystemTime) =
                    event.decode().map_err(decode_err)?;
                self.refund(refund_id, reason, at).map_err(|e| e.to_string())
            }
            "PaymentFailed" => {
                let (reason, at): (String, SystemTime) = event.decode().map_err(decode_err)?;
                self.fail(reason, at).map_err(|e| e.to_string())
            }
            other => Err(format!("unknown payment event {other}")),
        }
    }

    pub fn id(&self) -> &str {
        self.entity.id()
    }

    pub fn donation_id(&self) -> &str {
        &self.donation_id
    }

    pub fn amount(&self) -> u64 {
        self.amount
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    pub fn status(&self) -> PaymentStatus {
        self.status
    }

    pub fn provider_transaction_id(&self) -> Option<&str> {
        self.provider_transaction_id.as_deref()
    }

    pub fn idempotency_key(&self) -> Option<&str> {
        self.idempotency_key.as_deref()
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn refund_reason(&self) -> Option<&str> {
        self.refund_reason.as_deref()
    }

    pub fn refund_id(&self) -> Option<&str> {
        self.refund_id.as_deref()
    }

    pub fn view(&self) -> PaymentView {
        PaymentView {
            payment_id: self.entity.id().to_string(),
            donation_id: self.donation_id.clone(),
            amount: self.amount,
            provider: self.provider,
            status: self.status,
            provider_transaction_id: self.provider_transaction_id.clone(),
            failure_reason: self.failure_reason.clone(),
            refund_reason: self.refund_reason.clone(),
            refund_id: self.refund_id.clone(),
            version: self.entity.version(),
            created_at: self.created_at,
            authorized_at: self.authorized_at,
            captured_at: self.captured_at,
            completed_at: self.completed_at,
            failed_at: self.failed_at,
            refunded_at: self.refunded_at,
        }
    }
}

crate::impl_aggregate!(Payment, entity, replay);

/// Serializable payment snapshot; also the payload of payment outbox events.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentView {
    pub payment_id: String,
    pub donation_id: String,
    pub amount: u64,
    pub provider: ProviderKind,
    pub status: PaymentStatus,
    pub provider_transaction_id: Option<String>,
    pub failure_reason: Option<String>,
    pub refund_reason: Option<String>,
    pub refund_id: Option<String>,
    pub version: u64,
    pub created_at: Option<SystemTime>,
    pub authorized_at: Option<SystemTime>,
    pub captured_at: Option<SystemTime>,
    pub completed_at: Option<SystemTime>,
    pub failed_at: Option<SystemTime>,
    pub refunded_at: Option<SystemTime>,
}
