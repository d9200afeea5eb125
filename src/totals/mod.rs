//! Campaign totals: a read model kept by applying signed deltas from
//! donation events, each event at most once.

mod projector;

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::read_model::ReadModel;

pub use projector::{TotalsProjector, CAMPAIGN_TOTALS_UPDATED, TOTALS_CONSUMER};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignTotals {
    pub campaign_id: String,
    pub total_amount: u64,
    pub donation_count: u64,
    pub refund_count: u64,
    pub last_updated: Option<SystemTime>,
}

impl ReadModel for CampaignTotals {
    const COLLECTION: &'static str = "campaign_totals";

    fn id(&self) -> &str {
        &self.campaign_id
    }
}

/// Signed change to one campaign's totals.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotalsDelta {
    pub amount: i64,
    pub donations: i64,
    pub refunds: i64,
}

impl CampaignTotals {
    pub fn new(campaign_id: impl Into<String>) -> Self {
        Self {
            campaign_id: campaign_id.into(),
            ..Self::default()
        }
    }

    /// Apply `delta`. Every counter clamps at zero.
    pub fn apply(&mut self, delta: TotalsDelta, at: SystemTime) {
        self.total_amount = add_clamped(self.total_amount, delta.amount);
        self.donation_count = add_clamped(self.donation_count, delta.donations);
        self.refund_count = add_clamped(self.refund_count, delta.refunds);
        self.last_updated = Some(at);
    }
}

fn add_clamped(value: u64, delta: i64) -> u64 {
    if delta >= 0 {
        value.saturating_add(delta.unsigned_abs())
    } else {
        value.saturating_sub(delta.unsigned_abs())
    }
}
