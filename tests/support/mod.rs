#![allow(dead_code)]

use std::thread;
use std::time::{Duration, Instant};

use outbox_relay::bus::Event;
use outbox_relay::ledger::{LedgerService, RecordDonation};
use outbox_relay::payment::{
    AuthorizePayment, CreatePayment, PaymentService, PaymentView, SimulatedProvider,
};
use outbox_relay::{HashMapRepository, OutboxRecord, OutboxStore};
use tracing_subscriber::EnvFilter;

/// Install a test subscriber once. Filter with `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Poll `done` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if done() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

pub fn payments(
    repo: &HashMapRepository,
) -> (PaymentService<HashMapRepository>, SimulatedProvider) {
    let provider = SimulatedProvider::new();
    (PaymentService::new(repo.clone(), provider.clone()), provider)
}

pub fn create_payment(
    service: &PaymentService<HashMapRepository>,
    donation_id: &str,
    amount: u64,
) -> PaymentView {
    service
        .create_payment(CreatePayment {
            donation_id: donation_id.into(),
            amount,
            ..CreatePayment::default()
        })
        .expect("create payment")
}

pub fn card() -> AuthorizePayment {
    AuthorizePayment {
        payment_method_id: "pm_card_visa".into(),
        ..AuthorizePayment::default()
    }
}

pub fn pledge(ledger: &LedgerService<HashMapRepository>, campaign_id: &str, amount: u64) -> String {
    ledger
        .record_donation(RecordDonation {
            campaign_id: campaign_id.into(),
            donor_id: "donor-1".into(),
            amount,
        })
        .expect("record donation")
        .donation_id
}

pub fn donation_event(event_id: &str, event_type: &str, campaign_id: &str, amount: u64) -> Event {
    Event::json(
        event_id,
        event_type,
        &serde_json::json!({
            "donation_id": format!("don-{event_id}"),
            "campaign_id": campaign_id,
            "amount": amount,
        }),
    )
    .expect("encode donation event")
}

pub fn outbox_of_type(repo: &HashMapRepository, event_type: &str) -> Vec<OutboxRecord> {
    repo.outbox_records()
        .expect("outbox records")
        .into_iter()
        .filter(|r| r.event_type == event_type)
        .collect()
}

pub fn outbox_types(repo: &HashMapRepository) -> Vec<String> {
    repo.outbox_records()
        .expect("outbox records")
        .into_iter()
        .map(|r| r.event_type)
        .collect()
}
