use std::collections::HashSet;
use std::time::Duration;

use outbox_relay::bus::{InMemoryQueue, EVENT_ID_HEADER};
use outbox_relay::ledger::{LedgerService, DONATION_CREATED};
use outbox_relay::payment::PaymentError;
use outbox_relay::totals::{TotalsProjector, TOTALS_CONSUMER};
use outbox_relay::{
    EventLogStore, FaultPoint, HashMapRepository, OutboxRecord, OutboxStatus, OutboxStore,
    OutboxWorker, RepositoryError, TransactionExt,
};

use crate::support::{create_payment, donation_event, init_tracing, payments, pledge};

fn write_rows(repo: &HashMapRepository, types: &[&str]) -> Vec<String> {
    let mut tx = repo.transaction();
    let mut ids = Vec::new();
    for event_type in types {
        let record = OutboxRecord::new(*event_type, serde_json::json!({ "n": ids.len() }));
        ids.push(record.event_id.clone());
        tx.outbox(record);
    }
    tx.commit_all().unwrap();
    ids
}

#[test]
fn five_failed_publishes_park_the_row_until_retried() {
    init_tracing();
    let repo = HashMapRepository::new();
    let queue = InMemoryQueue::new();
    let worker = OutboxWorker::new(repo.clone(), queue.clone()).with_max_retries(5);
    let id = write_rows(&repo, &["DonationCreated"]).remove(0);

    queue.set_offline(true);
    for attempt in 1..=5u32 {
        worker.tick().unwrap();
        let row = repo.outbox_record(&id).unwrap().unwrap();
        assert_eq!(row.retry_count, attempt);
        assert!(row.last_error.is_some());
        let expected = if attempt < 5 {
            OutboxStatus::Pending
        } else {
            OutboxStatus::Failed
        };
        assert_eq!(row.status, expected);
    }

    // Parked rows are never picked up again on their own.
    queue.set_offline(false);
    let idle = worker.tick().unwrap();
    assert_eq!(idle.claimed, 0);
    assert!(queue.is_empty());
    assert_eq!(worker.stats().unwrap().failed, 1);

    worker.retry_failed_event(&id).unwrap();
    let row = repo.outbox_record(&id).unwrap().unwrap();
    assert_eq!(row.status, OutboxStatus::Pending);
    assert_eq!(row.retry_count, 0);
    assert_eq!(row.last_error, None);

    let drained = worker.tick().unwrap();
    assert_eq!(drained.published, 1);
    assert_eq!(queue.len(), 1);
    assert_eq!(
        repo.outbox_record(&id).unwrap().unwrap().status,
        OutboxStatus::Published
    );
}

#[test]
fn retrying_a_row_that_is_not_failed_is_rejected() {
    let repo = HashMapRepository::new();
    let worker = OutboxWorker::new(repo.clone(), InMemoryQueue::new());
    let id = write_rows(&repo, &["A"]).remove(0);

    assert!(matches!(
        worker.retry_failed_event(&id),
        Err(RepositoryError::InvalidState { .. })
    ));
    assert!(matches!(
        worker.retry_failed_event("missing"),
        Err(RepositoryError::NotFound { .. })
    ));
}

#[test]
fn published_messages_carry_the_event_id() {
    let repo = HashMapRepository::new();
    let queue = InMemoryQueue::new();
    let worker = OutboxWorker::new(repo.clone(), queue.clone());
    let ids = write_rows(&repo, &["A", "B", "C"]);

    worker.tick().unwrap();

    let events = queue.events();
    assert_eq!(queue.event_types(), vec!["A", "B", "C"]);
    for (event, id) in events.iter().zip(&ids) {
        assert!(event.persistent);
        assert_eq!(event.header(EVENT_ID_HEADER), Some(id.as_str()));
        assert_eq!(event.event_id(), id);
    }
}

#[test]
fn competing_workers_publish_each_row_once() {
    let repo = HashMapRepository::new();
    let queue = InMemoryQueue::new();
    let a = OutboxWorker::new(repo.clone(), queue.clone())
        .with_worker_id("a")
        .with_batch_size(2);
    let b = OutboxWorker::new(repo.clone(), queue.clone())
        .with_worker_id("b")
        .with_batch_size(2);
    write_rows(&repo, &["A", "B", "C", "D", "E"]);

    std::thread::scope(|scope| {
        for worker in [&a, &b] {
            scope.spawn(move || {
                for _ in 0..5 {
                    worker.tick().unwrap();
                }
            });
        }
    });

    let ids: Vec<_> = queue.events().into_iter().map(|e| e.id).collect();
    let unique: HashSet<_> = ids.iter().collect();
    assert_eq!(ids.len(), 5);
    assert_eq!(unique.len(), 5);
    assert_eq!(repo.outbox_stats().unwrap().published, 5);
}

#[test]
fn expired_lease_is_reclaimed() {
    let repo = HashMapRepository::new();
    write_rows(&repo, &["A"]);

    let first = repo.claim_pending("crashed", 10, Duration::ZERO).unwrap();
    assert_eq!(first.len(), 1);
    let second = repo
        .claim_pending("survivor", 10, Duration::from_secs(30))
        .unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].locked_by.as_deref(), Some("survivor"));
    assert!(repo
        .claim_pending("late", 10, Duration::from_secs(30))
        .unwrap()
        .is_empty());
}

#[test]
fn crash_between_state_and_outbox_leaves_nothing() {
    let repo = HashMapRepository::new();
    let (service, _) = payments(&repo);

    repo.inject_fault(FaultPoint::AfterEntities);
    let err = service
        .create_payment(outbox_relay::payment::CreatePayment {
            donation_id: "don-1".into(),
            amount: 100,
            ..Default::default()
        })
        .unwrap_err();
    assert!(matches!(
        err,
        PaymentError::Repository(RepositoryError::Injected(_))
    ));
    assert_eq!(repo.outbox_stats().unwrap().total, 0);

    let ledger = LedgerService::new(repo.clone());
    repo.inject_fault(FaultPoint::AfterOutbox);
    assert!(ledger
        .record_donation(outbox_relay::ledger::RecordDonation {
            campaign_id: "camp-1".into(),
            donor_id: "donor-1".into(),
            amount: 100,
        })
        .is_err());
    assert_eq!(repo.outbox_stats().unwrap().total, 0);

    // The fault fires once; the next commit goes through whole.
    let payment = create_payment(&service, "don-1", 100);
    assert_eq!(service.get_payment(&payment.payment_id).unwrap().version, 1);
    pledge(&ledger, "camp-1", 100);
    assert_eq!(repo.outbox_stats().unwrap().total, 2);
}

#[test]
fn crash_during_consumption_keeps_the_event_unprocessed() {
    let repo = HashMapRepository::new();
    let projector = TotalsProjector::new(repo.clone());
    let event = donation_event("evt-1", DONATION_CREATED, "camp-1", 500);

    for point in [
        FaultPoint::AfterEntities,
        FaultPoint::AfterOutbox,
        FaultPoint::AfterEventLog,
    ] {
        repo.inject_fault(point);
        assert!(projector.handle(&event).is_err(), "{point:?}");
        assert_eq!(projector.totals("camp-1").unwrap(), None);
        assert_eq!(repo.outbox_stats().unwrap().total, 0);
        assert!(!repo.event_log(TOTALS_CONSUMER, "evt-1").unwrap().unwrap().is_processed());
    }

    projector.handle(&event).unwrap();
    assert_eq!(projector.totals("camp-1").unwrap().unwrap().total_amount, 500);
    assert_eq!(repo.event_log(TOTALS_CONSUMER, "evt-1").unwrap().unwrap().retry_count, 3);
}
