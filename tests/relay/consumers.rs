use std::thread;

use outbox_relay::bus::Event;
use outbox_relay::ledger::{DONATION_CREATED, DONATION_REFUNDED};
use outbox_relay::totals::{TotalsProjector, CAMPAIGN_TOTALS_UPDATED, TOTALS_CONSUMER};
use outbox_relay::{
    ConsumeError, Delivery, EventLogStatus, EventLogStore, HashMapRepository, IdempotentConsumer,
    OutboxRecord, OutboxStore, Transaction,
};

use crate::support::{donation_event, init_tracing, outbox_of_type};

#[test]
fn donation_created_delivered_three_times_counts_once() {
    init_tracing();
    let repo = HashMapRepository::new();
    let projector = TotalsProjector::new(repo.clone());
    let event = donation_event("evt-500", DONATION_CREATED, "camp-1", 500);

    let outcomes: Vec<_> = (0..3).map(|_| projector.handle(&event).unwrap()).collect();
    assert_eq!(
        outcomes,
        vec![Delivery::Applied, Delivery::Duplicate, Delivery::Duplicate]
    );

    let totals = projector.totals("camp-1").unwrap().unwrap();
    assert_eq!(totals.total_amount, 500);
    assert_eq!(totals.donation_count, 1);

    let acks = outbox_of_type(&repo, CAMPAIGN_TOTALS_UPDATED);
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].payload["source_event_id"], "evt-500");
    assert_eq!(acks[0].payload["amount_delta"], 500);
    assert_eq!(
        acks[0].metadata.get("causation-id").map(String::as_str),
        Some("evt-500")
    );

    let log = repo.event_log(TOTALS_CONSUMER, "evt-500").unwrap().unwrap();
    assert_eq!(log.status, EventLogStatus::Processed);
}

#[test]
fn concurrent_duplicates_apply_once() {
    let repo = HashMapRepository::new();
    let projector = TotalsProjector::new(repo.clone());
    let event = donation_event("evt-race", DONATION_CREATED, "camp-1", 250);

    let outcomes: Vec<Delivery> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| projector.handle(&event).unwrap()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let applied = outcomes.iter().filter(|d| **d == Delivery::Applied).count();
    assert_eq!(applied, 1);
    assert_eq!(outcomes.len() - applied, 7);
    assert_eq!(
        projector.totals("camp-1").unwrap().unwrap().total_amount,
        250
    );
    assert_eq!(repo.outbox_stats().unwrap().total, 1);
}

#[test]
fn refunds_never_drive_totals_negative() {
    let repo = HashMapRepository::new();
    let projector = TotalsProjector::new(repo.clone());

    projector
        .handle(&donation_event("evt-1", DONATION_CREATED, "camp-1", 300))
        .unwrap();
    projector
        .handle(&donation_event("evt-2", DONATION_REFUNDED, "camp-1", 800))
        .unwrap();

    let totals = projector.totals("camp-1").unwrap().unwrap();
    assert_eq!(totals.total_amount, 0);
    assert_eq!(totals.refund_count, 1);

    // A refund for an unseen campaign creates it at zero.
    projector
        .handle(&donation_event("evt-3", DONATION_REFUNDED, "camp-2", 50))
        .unwrap();
    assert_eq!(projector.totals("camp-2").unwrap().unwrap().total_amount, 0);
}

#[test]
fn campaigns_are_tracked_independently() {
    let projector = TotalsProjector::new(HashMapRepository::new());
    for (id, campaign, amount) in [("a", "camp-1", 100), ("b", "camp-2", 40), ("c", "camp-1", 60)] {
        projector
            .handle(&donation_event(id, DONATION_CREATED, campaign, amount))
            .unwrap();
    }

    assert_eq!(projector.totals("camp-1").unwrap().unwrap().total_amount, 160);
    assert_eq!(projector.totals("camp-1").unwrap().unwrap().donation_count, 2);
    assert_eq!(projector.totals("camp-2").unwrap().unwrap().total_amount, 40);
}

#[test]
fn rejected_event_is_logged_as_failed_and_retried() {
    let repo = HashMapRepository::new();
    let projector = TotalsProjector::new(repo.clone());
    let bad = donation_event("evt-bad", DONATION_CREATED, "", 100);

    for attempt in 1..=2 {
        let err = projector.handle(&bad).unwrap_err();
        assert!(matches!(err, ConsumeError::Rejected { .. }));
        let log = repo.event_log(TOTALS_CONSUMER, "evt-bad").unwrap().unwrap();
        assert_eq!(log.status, EventLogStatus::Failed);
        assert_eq!(log.retry_count, attempt);
        assert!(log.last_error.is_some());
    }
    assert_eq!(repo.outbox_stats().unwrap().total, 0);
}

fn count_donor(tx: &mut Transaction<'_, HashMapRepository>, _: &Event) -> Result<(), ConsumeError> {
    tx.outbox(OutboxRecord::new(
        "DonorStatsUpdated",
        serde_json::json!({ "donations": 1 }),
    ));
    Ok(())
}

#[test]
fn a_second_consumer_of_the_same_event_is_not_a_duplicate() {
    let repo = HashMapRepository::new();
    let projector = TotalsProjector::new(repo.clone());
    let donor_stats = IdempotentConsumer::new("donor-stats", repo.clone());
    let event = donation_event("evt-shared", DONATION_CREATED, "camp-1", 120);

    assert_eq!(projector.handle(&event).unwrap(), Delivery::Applied);
    assert_eq!(donor_stats.handle(&event, count_donor).unwrap(), Delivery::Applied);
    assert_eq!(projector.handle(&event).unwrap(), Delivery::Duplicate);
    assert_eq!(donor_stats.handle(&event, count_donor).unwrap(), Delivery::Duplicate);

    assert_eq!(projector.totals("camp-1").unwrap().unwrap().total_amount, 120);
    assert_eq!(outbox_of_type(&repo, "DonorStatsUpdated").len(), 1);
    assert!(repo.event_log(TOTALS_CONSUMER, "evt-shared").unwrap().unwrap().is_processed());
    assert!(repo.event_log("donor-stats", "evt-shared").unwrap().unwrap().is_processed());
}
