use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use super::LedgerError;
use crate::domain::{Entity, EventRecord};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DonationStatus {
    #[default]
    Pledged,
    Completed,
    Refunded,
}

impl DonationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DonationStatus::Pledged => "PLEDGED",
            DonationStatus::Completed => "COMPLETED",
            DonationStatus::Refunded => "REFUNDED",
        }
    }
}

impl fmt::Display for DonationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A donation pledged to a campaign, settled by its payment.
#[derive(Default)]
pub struct Donation {
    pub entity: Entity,
    campaign_id: String,
    donor_id: String,
    amount: u64,
    status: DonationStatus,
    payment_id: Option<String>,
    refund_reason: Option<String>,
    created_at: Option<SystemTime>,
}

impl Donation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &mut self,
        donation_id: String,
        campaign_id: String,
        donor_id: String,
        amount: u64,
        at: SystemTime,
    ) -> Result<(), LedgerError> {
        self.entity.set_id(&donation_id);
        self.entity.digest(
            "DonationRecorded",
            &(&donation_id, &campaign_id, &donor_id, amount, at),
        )?;
        self.campaign_id = campaign_id;
        self.donor_id = donor_id;
        self.amount = amount;
        self.status = DonationStatus::Pledged;
        self.created_at = Some(at);
        Ok(())
    }

    pub fn complete(&mut self, payment_id: String) -> Result<(), LedgerError> {
        if self.status != DonationStatus::Pledged {
            return Err(self.invalid_state("complete"));
        }
        self.entity.digest("DonationCompleted", &payment_id)?;
        self.status = DonationStatus::Completed;
        self.payment_id = Some(payment_id);
        Ok(())
    }

    /// Pledged donations can be refunded too: a captured payment may be
    /// refunded before it completes.
    pub fn refund(&mut self, reason: String) -> Result<(), LedgerError> {
        if self.status == DonationStatus::Refunded {
            return Err(self.invalid_state("refund"));
        }
        self.entity.digest("DonationRefunded", &reason)?;
        self.status = DonationStatus::Refunded;
        self.refund_reason = Some(reason);
        Ok(())
    }

    fn invalid_state(&self, action: &'static str) -> LedgerError {
        LedgerError::InvalidState {
            donation_id: self.entity.id().to_string(),
            status: self.status,
            action,
        }
    }

    fn replay(&mut self, event: &EventRecord) -> Result<(), String> {
        match event.event_name.as_str() {
            "DonationRecorded" => {
                let (id, campaign, donor, amount, at): (String, String, String, u64, SystemTime) =
                    event.decode().map_err(|e| e.to_string())?;
                self.record(id, campaign, donor, amount, at)
                    .map_err(|e| e.to_string())
            }
            "DonationCompleted" => {
                let payment_id: String = event.decode().map_err(|e| e.to_string())?;
                self.complete(payment_id).map_err(|e| e.to_string())
            }
            "DonationRefunded" => {
                let reason: String = event.decode().map_err(|e| e.to_string())?;
                self.refund(reason).map_err(|e| e.to_string())
            }
            other => Err(format!("unknown donation event {other}")),
        }
    }

    pub fn campaign_id(&self) -> &str {
        &self.campaign_id
    }

    pub fn amount(&self) -> u64 {
        self.amount
    }

    pub fn status(&self) -> DonationStatus {
        self.status
    }

    pub fn view(&self) -> DonationView {
        DonationView {
            donation_id: self.entity.id().to_string(),
            campaign_id: self.campaign_id.clone(),
            donor_id: self.donor_id.clone(),
            amount: self.amount,
            status: self.status,
            payment_id: self.payment_id.clone(),
            refund_reason: self.refund_reason.clone(),
            created_at: self.created_at,
            version: self.entity.version(),
        }
    }
}

crate::impl_aggregate!(Donation, entity, replay);

/// Donation snapshot and payload of the ledger's outbox events.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonationView {
    pub donation_id: String,
    pub campaign_id: String,
    pub donor_id: String,
    pub amount: u64,
    pub status: DonationStatus,
    pub payment_id: Option<String>,
    pub refund_reason: Option<String>,
    pub created_at: Option<SystemTime>,
    pub version: u64,
}
