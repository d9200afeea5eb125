use std::time::Duration;

use outbox_relay::bus::{ConsumerThread, InMemoryQueue, Publisher};
use outbox_relay::ledger::{
    DonationStatus, LedgerService, DONATION_CREATED, DONATION_REFUNDED,
};
use outbox_relay::outbox::OutboxWorkerThread;
use outbox_relay::payment::{PAYMENT_COMPLETED, PAYMENT_REFUNDED};
use outbox_relay::totals::TotalsProjector;
use outbox_relay::{ConsumerConfig, HashMapRepository, OutboxStore, OutboxWorker};

use crate::support::{card, create_payment, init_tracing, payments, pledge, wait_until};

const WAIT: Duration = Duration::from_secs(5);

#[test]
fn commits_flow_through_the_queue_into_totals() {
    init_tracing();
    let repo = HashMapRepository::new();
    let queue = InMemoryQueue::new();
    let config = ConsumerConfig::default()
        .with_prefetch(4)
        .with_poll_timeout(Duration::from_millis(10));

    let worker = OutboxWorkerThread::spawn(
        OutboxWorker::new(repo.clone(), queue.clone())
            .with_poll_interval(Duration::from_millis(10)),
    );

    // Subscriber clones share a cursor, so the kept handles observe acks.
    let ledger_sub = queue.new_subscriber(&[PAYMENT_COMPLETED, PAYMENT_REFUNDED]);
    let totals_sub = queue.new_subscriber(&[DONATION_CREATED, DONATION_REFUNDED]);

    let ledger = LedgerService::new(repo.clone());
    let ledger_consumer = {
        let ledger = ledger.clone();
        ConsumerThread::spawn(
            "ledger",
            ledger_sub.clone(),
            move |event| ledger.handle(event).map(|_| ()),
            config.clone(),
        )
    };

    let projector = TotalsProjector::new(repo.clone());
    let totals_consumer = {
        let projector = projector.clone();
        ConsumerThread::spawn(
            "totals",
            totals_sub.clone(),
            move |event| projector.handle(event).map(|_| ()),
            config,
        )
    };

    let (payments, _) = payments(&repo);

    // Donation paid in full.
    let kept = pledge(&ledger, "camp-1", 500);
    let payment = create_payment(&payments, &kept, 500);
    payments.authorize(&payment.payment_id, card()).unwrap();
    payments.capture(&payment.payment_id, None).unwrap();
    payments.complete(&payment.payment_id).unwrap();

    // Donation refunded after capture.
    let refunded = pledge(&ledger, "camp-1", 300);
    let payment = create_payment(&payments, &refunded, 300);
    payments.authorize(&payment.payment_id, card()).unwrap();
    payments.capture(&payment.payment_id, None).unwrap();
    payments
        .refund(&payment.payment_id, "donor changed mind", None)
        .unwrap();

    let settled = wait_until(WAIT, || {
        ledger_sub.acknowledged().len() == 2 && totals_sub.acknowledged().len() == 3
    });
    assert!(settled, "pipeline did not settle");
    assert_eq!(
        ledger.get_donation(&kept).unwrap().status,
        DonationStatus::Completed
    );
    assert_eq!(
        ledger.get_donation(&refunded).unwrap().status,
        DonationStatus::Refunded
    );

    // Redeliver every donation event: nothing changes.
    for event in queue.find_all_by_type(DONATION_CREATED) {
        queue.publish(event).unwrap();
    }
    assert!(wait_until(WAIT, || totals_sub.acknowledged().len() == 5));

    let totals = projector.totals("camp-1").unwrap().unwrap();
    assert_eq!(totals.total_amount, 500);
    assert_eq!(totals.donation_count, 2);
    assert_eq!(totals.refund_count, 1);

    let ledger_stats = ledger_consumer.stop();
    let totals_stats = totals_consumer.stop();
    let worker_stats = worker.stop();

    assert_eq!(ledger_stats.nacked, 0);
    assert_eq!(ledger_stats.acked, 2);
    assert_eq!(totals_stats.nacked, 0);
    assert_eq!(totals_stats.acked, 5);
    assert_eq!(worker_stats.parked, 0);
    assert_eq!(repo.outbox_stats().unwrap().pending, 0);
}
