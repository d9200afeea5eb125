use std::time::SystemTime;

use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

use super::donation::{Donation, DonationView};
use super::LedgerError;
use crate::bus::Event;
use crate::commit_builder::TransactionExt;
use crate::domain::{Repository, RepositoryError, RepositoryExt};
use crate::event_log::{ConsumeError, Delivery, EventLogStore, IdempotentConsumer};
use crate::outbox::OutboxRecord;
use crate::payment::{PAYMENT_COMPLETED, PAYMENT_REFUNDED};

pub const DONATION_CREATED: &str = "DonationCreated";
pub const DONATION_REFUNDED: &str = "DonationRefunded";

/// Event log name of the ledger consumer.
pub const LEDGER_CONSUMER: &str = "ledger";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordDonation {
    pub campaign_id: String,
    pub donor_id: String,
    pub amount: u64,
}

/// The part of a payment event the ledger reads.
#[derive(Deserialize)]
struct PaymentNotice {
    payment_id: String,
    donation_id: String,
    #[serde(default)]
    refund_reason: Option<String>,
}

/// Records donations and settles them from payment events.
#[derive(Clone)]
pub struct LedgerService<R> {
    repo: R,
    consumer: IdempotentConsumer<R>,
}

impl<R> LedgerService<R>
where
    R: Repository + EventLogStore + Clone,
{
    pub fn new(repo: R) -> Self {
        Self {
            consumer: IdempotentConsumer::new(LEDGER_CONSUMER, repo.clone()),
            repo,
        }
    }

    /// Record a pledged donation and emit `DonationCreated`.
    pub fn record_donation(&self, request: RecordDonation) -> Result<DonationView, LedgerError> {
        if request.amount == 0 {
            return Err(LedgerError::Validation("amount must be positive".into()));
        }
        if request.campaign_id.trim().is_empty() {
            return Err(LedgerError::Validation("campaign_id is required".into()));
        }

        let mut donation = Donation::new();
        donation.record(
            Uuid::new_v4().to_string(),
            request.campaign_id,
            request.donor_id,
            request.amount,
            SystemTime::now(),
        )?;
        let view = donation.view();

        let mut tx = self.repo.transaction();
        tx.outbox(
            OutboxRecord::encode(DONATION_CREATED, &view)
                .map_err(RepositoryError::from)?
                .with_aggregate(&view.donation_id),
        );
        tx.commit(&mut donation)?;

        info!(donation_id = %view.donation_id, campaign_id = %view.campaign_id, amount = view.amount, "donation recorded");
        Ok(view)
    }

    pub fn get_donation(&self, donation_id: &str) -> Result<DonationView, LedgerError> {
        self.repo
            .get_aggregate::<Donation>(donation_id)?
            .map(|d| d.view())
            .ok_or_else(|| LedgerError::NotFound(donation_id.to_string()))
    }

    /// Apply a payment event at most once. `PaymentRefunded` also emits
    /// `DonationRefunded` for the totals projection.
    pub fn handle(&self, event: &Event) -> Result<Delivery, ConsumeError> {
        let refunded = match event.event_type.as_str() {
            PAYMENT_COMPLETED => false,
            PAYMENT_REFUNDED => true,
            other => {
                debug!(event_type = %other, "ledger ignores event");
                return Ok(Delivery::Ignored);
            }
        };

        self.consumer.handle(event, |tx, event| {
            let notice: PaymentNotice = event.decode().map_err(|e| ConsumeError::payload(event, e))?;
            let mut donation = tx
                .repo()
                .get_aggregate::<Donation>(&notice.donation_id)?
                .ok_or_else(|| {
                    ConsumeError::rejected(event, format!("donation {} not found", notice.donation_id))
                })?;

            if refunded {
                let reason = notice
                    .refund_reason
                    .unwrap_or_else(|| "payment refunded".to_string());
                donation
                    .refund(reason)
                    .map_err(|e| ConsumeError::rejected(event, e.to_string()))?;
                let record = OutboxRecord::encode(DONATION_REFUNDED, &donation.view())
                    .map_err(RepositoryError::from)?
                    .with_aggregate(donation.entity.id())
                    .with_causation_id(event.event_id());
                tx.outbox(record);
            } else {
                donation
                    .complete(notice.payment_id)
                    .map_err(|e| ConsumeError::rejected(event, e.to_string()))?;
            }
            tx.stage(&donation);
            Ok(())
        })
    }
}
