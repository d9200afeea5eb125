//! Consumption loop: fetch up to `prefetch` deliveries, run the handler on
//! each concurrently, ack successes and nack failures for redelivery.

use std::fmt;
use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::event::{Event, PublishError};
use super::publisher::Subscriber;
use crate::config::ConsumerConfig;

/// Per-round and cumulative consumption counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerStats {
    pub received: usize,
    pub acked: usize,
    pub nacked: usize,
    pub polls: usize,
}

impl ConsumerStats {
    fn absorb(&mut self, other: ConsumerStats) {
        self.received += other.received;
        self.acked += other.acked;
        self.nacked += other.nacked;
        self.polls += other.polls;
    }
}

/// Run one poll round against `subscriber`.
///
/// The first poll waits up to the configured timeout; further deliveries are
/// taken only if already available. Handlers run on scoped threads, so
/// messages in one round complete in any order.
pub fn process_batch<S, H, E>(
    subscriber: &S,
    handler: &H,
    config: &ConsumerConfig,
) -> Result<ConsumerStats, PublishError>
where
    S: Subscriber + ?Sized,
    H: Fn(&Event) -> Result<(), E> + Sync,
    E: fmt::Display,
{
    let mut stats = ConsumerStats {
        polls: 1,
        ..ConsumerStats::default()
    };

    let mut batch = Vec::with_capacity(config.prefetch);
    let mut timeout = config.poll_timeout();
    while batch.len() < config.prefetch.max(1) {
        match subscriber.poll(timeout)? {
            Some(event) => batch.push(event),
            None => break,
        }
        timeout = Duration::ZERO;
    }

    if batch.is_empty() {
        return Ok(stats);
    }
    stats.received = batch.len();
    debug!(message_count = batch.len(), "received message batch");

    let outcomes: Vec<Result<(), String>> = thread::scope(|scope| {
        let handles: Vec<_> = batch
            .iter()
            .map(|event| scope.spawn(move || handler(event).map_err(|e| e.to_string())))
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err("handler panicked".to_string()))
            })
            .collect()
    });

    // Settle every message before reporting a transport error, so none of
    // the round is left in flight.
    let mut first_error = None;
    for (event, outcome) in batch.iter().zip(outcomes) {
        let settled = match outcome {
            Ok(()) => subscriber.ack(&event.id).map(|()| stats.acked += 1),
            Err(reason) => {
                warn!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    delivery = event.delivery_count,
                    error = %reason,
                    "handler failed, message will be redelivered"
                );
                subscriber.nack(&event.id).map(|()| stats.nacked += 1)
            }
        };
        if let Err(e) = settled {
            error!(event_id = %event.id, error = %e, "could not settle message");
            first_error.get_or_insert(e);
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(stats),
    }
}

/// Background thread running [`process_batch`] until stopped.
pub struct ConsumerThread {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<ConsumerStats>>,
}

impl ConsumerThread {
    pub fn spawn<S, H, E>(name: &str, subscriber: S, handler: H, config: ConsumerConfig) -> Self
    where
        S: Subscriber + 'static,
        H: Fn(&Event) -> Result<(), E> + Send + Sync + 'static,
        E: fmt::Display,
    {
        let (stop_tx, stop_rx) = channel();
        let name = name.to_string();

        let handle = thread::spawn(move || {
            let mut stats = ConsumerStats::default();
            info!(consumer = %name, prefetch = config.prefetch, "starting consumer loop");

            loop {
                match stop_rx.recv_timeout(Duration::ZERO) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }

                match process_batch(&subscriber, &handler, &config) {
                    Ok(round) => stats.absorb(round),
                    Err(e) => {
                        error!(consumer = %name, error = %e, "error processing batch");
                        if stop_rx.recv_timeout(config.poll_timeout()).is_ok() {
                            break;
                        }
                    }
                }
            }

            info!(consumer = %name, acked = stats.acked, nacked = stats.nacked, "consumer stopped");
            stats
        });

        Self {
            stop_tx,
            handle: Some(handle),
        }
    }

    /// Stop the loop, wait for the current round and return the totals.
    pub fn stop(mut self) -> ConsumerStats {
        let _ = self.stop_tx.send(());
        self.handle
            .take()
            .map(|handle| handle.join().unwrap_or_default())
            .unwrap_or_default()
    }
}

impl Drop for ConsumerThread {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}
