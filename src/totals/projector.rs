use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CampaignTotals, TotalsDelta};
use crate::bus::Event;
use crate::domain::{Repository, RepositoryError};
use crate::event_log::{ConsumeError, Delivery, EventLogStore, IdempotentConsumer};
use crate::ledger::{DONATION_CREATED, DONATION_REFUNDED};
use crate::outbox::OutboxRecord;
use crate::read_model::{ReadModelStore, ReadModelsExt};

pub const CAMPAIGN_TOTALS_UPDATED: &str = "CampaignTotalsUpdated";

/// Event log name of the totals consumer.
pub const TOTALS_CONSUMER: &str = "campaign-totals";

#[derive(Deserialize)]
struct DonationAmount {
    campaign_id: String,
    amount: u64,
}

#[derive(Serialize)]
struct TotalsAck<'a> {
    campaign_id: &'a str,
    source_event_id: &'a str,
    amount_delta: i64,
}

/// Maintains [`CampaignTotals`] from donation events.
///
/// The totals update, the event log row and a `CampaignTotalsUpdated`
/// acknowledgment commit together, so a redelivered event changes nothing.
#[derive(Clone)]
pub struct TotalsProjector<R> {
    consumer: IdempotentConsumer<R>,
}

impl<R> TotalsProjector<R>
where
    R: Repository + EventLogStore + ReadModelStore,
{
    pub fn new(repo: R) -> Self {
        Self {
            consumer: IdempotentConsumer::new(TOTALS_CONSUMER, repo),
        }
    }

    pub fn handle(&self, event: &Event) -> Result<Delivery, ConsumeError> {
        let refund = match event.event_type.as_str() {
            DONATION_CREATED => false,
            DONATION_REFUNDED => true,
            other => {
                debug!(event_type = %other, "totals projector ignores event");
                return Ok(Delivery::Ignored);
            }
        };

        self.consumer.handle(event, |tx, event| {
            let donation: DonationAmount =
                event.decode().map_err(|e| ConsumeError::payload(event, e))?;
            if donation.campaign_id.trim().is_empty() {
                return Err(ConsumeError::rejected(event, "campaign_id is empty"));
            }
            let amount = i64::try_from(donation.amount)
                .map_err(|_| ConsumeError::rejected(event, "amount out of range"))?;
            let delta = if refund {
                TotalsDelta {
                    amount: -amount,
                    donations: 0,
                    refunds: 1,
                }
            } else {
                TotalsDelta {
                    amount,
                    donations: 1,
                    refunds: 0,
                }
            };

            let campaign_id = donation.campaign_id.clone();
            tx.update_model::<CampaignTotals, _>(&donation.campaign_id, move |current| {
                let mut totals = current.unwrap_or_else(|| CampaignTotals::new(campaign_id));
                totals.apply(delta, SystemTime::now());
                totals
            });

            let ack = TotalsAck {
                campaign_id: &donation.campaign_id,
                source_event_id: event.event_id(),
                amount_delta: delta.amount,
            };
            tx.outbox(
                OutboxRecord::encode(CAMPAIGN_TOTALS_UPDATED, &ack)
                    .map_err(RepositoryError::from)?
                    .with_aggregate(&donation.campaign_id)
                    .with_causation_id(event.event_id()),
            );
            Ok(())
        })
    }

    pub fn totals(&self, campaign_id: &str) -> Result<Option<CampaignTotals>, RepositoryError> {
        Ok(self
            .consumer
            .repo()
            .get_model::<CampaignTotals>(campaign_id)?
            .map(|versioned| versioned.data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::OutboxStore;
    use crate::HashMapRepository;

    fn donation_event(id: &str, event_type: &str, amount: u64) -> Event {
        Event::json(
            id,
            event_type,
            &serde_json::json!({ "donation_id": "don-1", "campaign_id": "camp-1", "amount": amount }),
        )
        .unwrap()
    }

    #[test]
    fn refund_larger_than_total_clamps_to_zero() {
        let repo = HashMapRepository::new();
        let projector = TotalsProjector::new(repo.clone());

        projector
            .handle(&donation_event("e-1", DONATION_CREATED, 200))
            .unwrap();
        projector
            .handle(&donation_event("e-2", DONATION_REFUNDED, 500))
            .unwrap();

        let totals = projector.totals("camp-1").unwrap().unwrap();
        assert_eq!(totals.total_amount, 0);
        assert_eq!(totals.donation_count, 1);
        assert_eq!(totals.refund_count, 1);
        assert_eq!(repo.outbox_stats().unwrap().total, 2);
    }

    #[test]
    fn malformed_payload_fails_without_effects() {
        let repo = HashMapRepository::new();
        let projector = TotalsProjector::new(repo.clone());
        let event = Event::new("e-1", DONATION_CREATED, b"not json".to_vec());

        assert!(matches!(
            projector.handle(&event),
            Err(ConsumeError::Payload { .. })
        ));
        assert_eq!(projector.totals("camp-1").unwrap(), None);
        assert_eq!(repo.outbox_stats().unwrap().total, 0);
        assert_eq!(repo.event_log(TOTALS_CONSUMER, "e-1").unwrap().unwrap().retry_count, 1);
    }

    #[test]
    fn unrelated_events_are_ignored() {
        let projector = TotalsProjector::new(HashMapRepository::new());
        let event = Event::new("e-1", "PaymentCaptured", b"{}".to_vec());
        assert_eq!(projector.handle(&event).unwrap(), Delivery::Ignored);
    }
}
