//! In-memory transport for tests and single-process wiring.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

use super::event::{Event, PublishError};
use super::publisher::{Publisher, Subscriber};

#[derive(Default)]
struct Cursor {
    position: usize,
    redeliver: VecDeque<Event>,
    in_flight: Vec<Event>,
}

/// Append-only log with independent subscriber cursors.
///
/// * Clones share the log *and* the cursor, so clones compete for messages.
/// * [`InMemoryQueue::new_subscriber`] creates a fresh cursor over the same
///   log (fan-out), optionally filtered by routing key.
/// * Nacked messages are queued for redelivery on the same cursor with an
///   incremented `delivery_count`.
///
/// ```
/// use std::time::Duration;
/// use outbox_relay::bus::{Event, InMemoryQueue, Publisher, Subscriber};
///
/// let queue = InMemoryQueue::new();
/// let totals = queue.new_subscriber(&["DonationCreated"]);
///
/// queue.publish(Event::new("e-1", "PaymentCaptured", b"{}".to_vec())).unwrap();
/// queue.publish(Event::new("e-2", "DonationCreated", b"{}".to_vec())).unwrap();
///
/// let delivered = totals.poll(Duration::from_millis(10)).unwrap().unwrap();
/// assert_eq!(delivered.id, "e-2");
/// totals.ack("e-2").unwrap();
/// ```
#[derive(Clone)]
pub struct InMemoryQueue {
    log: Arc<RwLock<Vec<Event>>>,
    cursor: Arc<Mutex<Cursor>>,
    routing_keys: Arc<Vec<String>>,
    acked: Arc<Mutex<Vec<String>>>,
    offline: Arc<AtomicBool>,
    nack_next: Arc<AtomicUsize>,
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self {
            log: Arc::new(RwLock::new(Vec::new())),
            cursor: Arc::new(Mutex::new(Cursor::default())),
            routing_keys: Arc::new(Vec::new()),
            acked: Arc::new(Mutex::new(Vec::new())),
            offline: Arc::new(AtomicBool::new(false)),
            nack_next: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A subscriber over the same log with its own cursor. An empty
    /// `routing_keys` slice receives every event type.
    pub fn new_subscriber(&self, routing_keys: &[&str]) -> Self {
        Self {
            log: Arc::clone(&self.log),
            cursor: Arc::new(Mutex::new(Cursor::default())),
            routing_keys: Arc::new(routing_keys.iter().map(|k| k.to_string()).collect()),
            acked: Arc::new(Mutex::new(Vec::new())),
            offline: Arc::clone(&self.offline),
            nack_next: Arc::clone(&self.nack_next),
        }
    }

    /// While offline every publish fails with `ConnectionFailed`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// The next `count` publishes are refused with `Nack`.
    pub fn nack_next_publishes(&self, count: usize) {
        self.nack_next.store(count, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<Event> {
        self.log.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn event_types(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.event_type).collect()
    }

    pub fn find_all_by_type(&self, event_type: &str) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.log.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids acknowledged through this cursor.
    pub fn acknowledged(&self) -> Vec<String> {
        self.acked.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Deliveries handed out through this cursor and not yet acked or nacked.
    pub fn in_flight(&self) -> usize {
        self.cursor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .in_flight
            .len()
    }

    fn routes(&self, event: &Event) -> bool {
        self.routing_keys.is_empty() || self.routing_keys.iter().any(|k| *k == event.event_type)
    }

    fn cursor(&self) -> Result<MutexGuard<'_, Cursor>, PublishError> {
        self.cursor
            .lock()
            .map_err(|_| PublishError::ConnectionFailed("queue cursor lock poisoned".into()))
    }

    fn next_delivery(&self) -> Result<Option<Event>, PublishError> {
        let log = self
            .log
            .read()
            .map_err(|_| PublishError::ConnectionFailed("queue log lock poisoned".into()))?;
        let mut cursor = self.cursor()?;

        if let Some(mut event) = cursor.redeliver.pop_front() {
            event.delivery_count += 1;
            cursor.in_flight.push(event.clone());
            return Ok(Some(event));
        }

        while cursor.position < log.len() {
            let index = cursor.position;
            cursor.position += 1;
            if self.routes(&log[index]) {
                let mut event = log[index].clone();
                event.delivery_count = 1;
                cursor.in_flight.push(event.clone());
                return Ok(Some(event));
            }
        }

        Ok(None)
    }

    fn take_in_flight(&self, event_id: &str) -> Result<Event, PublishError> {
        let mut cursor = self.cursor()?;
        let index = cursor
            .in_flight
            .iter()
            .position(|e| e.id == event_id)
            .ok_or_else(|| PublishError::Rejected(format!("no delivery in flight for {event_id}")))?;
        Ok(cursor.in_flight.remove(index))
    }
}

impl Publisher for InMemoryQueue {
    fn publish(&self, event: Event) -> Result<(), PublishError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(PublishError::ConnectionFailed("queue offline".into()));
        }
        let refused = self
            .nack_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(PublishError::Nack(event.id));
        }

        self.log
            .write()
            .map_err(|_| PublishError::ConnectionFailed("queue log lock poisoned".into()))?
            .push(event);
        Ok(())
    }
}

impl Subscriber for InMemoryQueue {
    fn poll(&self, timeout: Duration) -> Result<Option<Event>, PublishError> {
        let start = Instant::now();

        loop {
            if let Some(event) = self.next_delivery()? {
                return Ok(Some(event));
            }
            if start.elapsed() >= timeout {
                return Ok(None);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn ack(&self, event_id: &str) -> Result<(), PublishError> {
        self.take_in_flight(event_id)?;
        self.acked
            .lock()
            .map_err(|_| PublishError::ConnectionFailed("queue ack lock poisoned".into()))?
            .push(event_id.to_string());
        Ok(())
    }

    fn nack(&self, event_id: &str) -> Result<(), PublishError> {
        let event = self.take_in_flight(event_id)?;
        self.cursor()?.redeliver.push_back(event);
        Ok(())
    }
}
