use outbox_relay::payment::{
    InvalidTransition, Payment, PaymentError, PaymentService, PaymentStatus, ProviderCall,
    ProviderFailure, SimulatedProvider, PAYMENT_AUTHORIZED, PAYMENT_CAPTURED, PAYMENT_FAILED,
    PAYMENT_INITIATED, PAYMENT_REFUNDED,
};
use outbox_relay::idempotency::{IdempotencyError, IdempotencyGuard, InMemoryIdempotencyStore};
use outbox_relay::payment::AuthorizePayment;
use outbox_relay::{
    HashMapRepository, IdempotencyConfig, OutboxStore, PaymentConfig, RepositoryError,
    RepositoryExt, TransactionExt,
};
use std::thread;
use std::time::{Duration, SystemTime};

use crate::support::{card, create_payment, init_tracing, outbox_types, payments, wait_until};

#[test]
fn capture_after_refund_is_rejected() {
    init_tracing();
    let repo = HashMapRepository::new();
    let (service, provider) = payments(&repo);

    let payment = create_payment(&service, "don-1", 2_500);
    assert_eq!(payment.status, PaymentStatus::Pending);

    let authorized = service.authorize(&payment.payment_id, card()).unwrap();
    assert_eq!(authorized.status, PaymentStatus::Authorized);
    assert!(authorized.provider_transaction_id.is_some());

    service.capture(&payment.payment_id, None).unwrap();
    let refunded = service
        .refund(&payment.payment_id, "donor request", None)
        .unwrap();
    assert_eq!(refunded.status, PaymentStatus::Refunded);
    assert_eq!(refunded.refund_reason.as_deref(), Some("donor request"));
    assert!(refunded.refund_id.is_some());

    let calls_before = provider.calls().len();
    let err = service.capture(&payment.payment_id, None).unwrap_err();
    assert_eq!(
        err,
        PaymentError::InvalidTransition(InvalidTransition {
            from: PaymentStatus::Refunded,
            to: PaymentStatus::Captured,
        })
    );
    assert_eq!(provider.calls().len(), calls_before);

    assert_eq!(
        outbox_types(&repo),
        vec![PAYMENT_INITIATED, PAYMENT_AUTHORIZED, PAYMENT_CAPTURED, PAYMENT_REFUNDED]
    );
}

/// Drive a fresh payment into `status` and return its id.
fn reach(
    service: &PaymentService<HashMapRepository>,
    provider: &SimulatedProvider,
    status: PaymentStatus,
) -> String {
    let id = create_payment(service, "don-1", 1_000).payment_id;
    match status {
        PaymentStatus::Pending => {}
        PaymentStatus::Failed => {
            provider.fail_next(ProviderCall::Authorize, ProviderFailure::declined("declined"));
            service.authorize(&id, card()).unwrap_err();
        }
        PaymentStatus::Authorized => {
            service.authorize(&id, card()).unwrap();
        }
        PaymentStatus::Captured => {
            service.authorize(&id, card()).unwrap();
            service.capture(&id, None).unwrap();
        }
        PaymentStatus::Completed => {
            service.authorize(&id, card()).unwrap();
            service.capture(&id, None).unwrap();
            service.complete(&id).unwrap();
        }
        PaymentStatus::Refunded => {
            service.authorize(&id, card()).unwrap();
            service.capture(&id, None).unwrap();
            service.refund(&id, "requested", None).unwrap();
        }
    }
    assert_eq!(service.get_payment(&id).unwrap().status, status);
    id
}

fn request(
    service: &PaymentService<HashMapRepository>,
    id: &str,
    target: PaymentStatus,
) -> Result<(), PaymentError> {
    match target {
        PaymentStatus::Authorized => service.authorize(id, card()).map(|_| ()),
        PaymentStatus::Captured => service.capture(id, None).map(|_| ()),
        PaymentStatus::Completed => service.complete(id).map(|_| ()),
        PaymentStatus::Refunded => service.refund(id, "requested", None).map(|_| ()),
        other => panic!("{other} has no operation"),
    }
}

#[test]
fn disallowed_transitions_never_reach_the_provider() {
    let repo = HashMapRepository::new();
    let (service, provider) = payments(&repo);
    let targets = [
        PaymentStatus::Authorized,
        PaymentStatus::Captured,
        PaymentStatus::Completed,
        PaymentStatus::Refunded,
    ];

    for from in PaymentStatus::ALL {
        for to in targets {
            if from.can_transition_to(to) {
                continue;
            }
            let id = reach(&service, &provider, from);
            let calls = provider.calls().len();
            let rows = repo.outbox_stats().unwrap().total;
            let version = service.get_payment(&id).unwrap().version;

            let err = request(&service, &id, to).unwrap_err();
            assert_eq!(
                err,
                PaymentError::InvalidTransition(InvalidTransition { from, to }),
                "{from} -> {to}"
            );
            assert_eq!(provider.calls().len(), calls, "{from} -> {to} called the provider");
            assert_eq!(repo.outbox_stats().unwrap().total, rows);
            assert_eq!(service.get_payment(&id).unwrap().version, version);
        }
    }
}

#[test]
fn failed_refund_parks_the_payment_as_failed() {
    let repo = HashMapRepository::new();
    let (service, provider) = payments(&repo);
    let id = reach(&service, &provider, PaymentStatus::Captured);
    provider.fail_next(
        ProviderCall::Refund,
        ProviderFailure::retryable("gateway unavailable"),
    );

    let err = service.refund(&id, "requested", None).unwrap_err();
    assert!(err.is_retryable());

    let payment = service.get_payment(&id).unwrap();
    assert_eq!(payment.status, PaymentStatus::Failed);
    assert_eq!(payment.failure_reason.as_deref(), Some("gateway unavailable"));
    assert_eq!(outbox_types(&repo).last().map(String::as_str), Some(PAYMENT_FAILED));
}

#[test]
fn capture_requires_a_provider_transaction() {
    let repo = HashMapRepository::new();
    let (service, provider) = payments(&repo);
    let id = create_payment(&service, "don-1", 100).payment_id;

    // Authorized without a usable provider reference.
    let mut payment: Payment = repo.get_aggregate(&id).unwrap().unwrap();
    payment.authorize(String::new(), SystemTime::now()).unwrap();
    repo.transaction().commit(&mut payment).unwrap();

    let err = service.capture(&id, None).unwrap_err();
    assert_eq!(err, PaymentError::MissingProviderTransaction(id.clone()));
    assert!(provider.calls().is_empty());
    assert_eq!(service.get_payment(&id).unwrap().status, PaymentStatus::Authorized);
}

#[test]
fn capture_cannot_exceed_the_authorized_amount() {
    let repo = HashMapRepository::new();
    let (service, provider) = payments(&repo);
    let id = reach(&service, &provider, PaymentStatus::Authorized);

    let err = service.capture(&id, Some(5_000)).unwrap_err();
    assert!(matches!(err, PaymentError::Validation(_)));
    assert_eq!(provider.calls(), vec![ProviderCall::Authorize]);

    let partial = service.capture(&id, Some(400)).unwrap();
    assert_eq!(partial.status, PaymentStatus::Captured);
}

#[test]
fn stale_writers_get_a_concurrent_write_error() {
    let repo = HashMapRepository::new();
    let (service, _) = payments(&repo);
    let id = create_payment(&service, "don-1", 100).payment_id;

    let mut first: Payment = repo.get_aggregate(&id).unwrap().unwrap();
    let mut second: Payment = repo.get_aggregate(&id).unwrap().unwrap();
    first.authorize("txn-a".into(), SystemTime::now()).unwrap();
    second.authorize("txn-b".into(), SystemTime::now()).unwrap();

    repo.transaction().commit(&mut first).unwrap();
    let err = repo.transaction().commit(&mut second).unwrap_err();
    assert!(matches!(err, RepositoryError::ConcurrentWrite { .. }));
    assert_eq!(
        service.get_payment(&id).unwrap().provider_transaction_id.as_deref(),
        Some("txn-a")
    );
}

#[test]
fn same_key_authorize_from_two_threads_calls_the_provider_once() {
    let repo = HashMapRepository::new();
    let provider = SimulatedProvider::new();
    // A reservation shorter than the provider call is stretched to cover it.
    let guard = IdempotencyGuard::new(InMemoryIdempotencyStore::new())
        .with_config(IdempotencyConfig::default().with_reservation_ttl(Duration::ZERO));
    let service = PaymentService::new(repo.clone(), provider.clone())
        .with_config(PaymentConfig::default().with_provider_timeout(Duration::from_secs(2)))
        .with_idempotency(guard);
    let id = create_payment(&service, "don-1", 1_000).payment_id;
    provider.set_delay(Some(Duration::from_millis(300)));

    let request = AuthorizePayment {
        idempotency_key: Some("auth-1".into()),
        ..card()
    };

    let (first, second) = thread::scope(|scope| {
        let first = scope.spawn(|| service.authorize(&id, request.clone()));
        assert!(wait_until(Duration::from_secs(2), || !provider.calls().is_empty()));
        let second = scope.spawn(|| service.authorize(&id, request.clone()));
        (first.join().unwrap(), second.join().unwrap())
    });

    let authorized = first.unwrap();
    assert_eq!(authorized.status, PaymentStatus::Authorized);
    assert_eq!(
        second.unwrap_err(),
        PaymentError::Idempotency(IdempotencyError::InProgress {
            key: "payment:authorize:auth-1".into(),
        })
    );

    // Once settled, the same key replays the stored response.
    assert_eq!(service.authorize(&id, request).unwrap(), authorized);
    assert_eq!(provider.calls(), vec![ProviderCall::Authorize]);
}
