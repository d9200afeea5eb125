use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::IdempotencyError;

/// Outcome of [`IdempotencyStore::reserve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reservation {
    /// The caller owns the key until it completes or releases it.
    Reserved,
    /// Another caller holds an unexpired reservation.
    InProgress,
    /// A response is already stored for the key.
    Completed(Vec<u8>),
}

/// Keyed, expiring store shared by every instance of a deployment.
///
/// All operations are atomic per key. Expired entries behave as absent.
pub trait IdempotencyStore: Send + Sync {
    fn reserve(&self, key: &str, ttl: Duration) -> Result<Reservation, IdempotencyError>;

    /// Store the response for `key`, replacing any reservation.
    fn complete(&self, key: &str, response: Vec<u8>, ttl: Duration)
        -> Result<(), IdempotencyError>;

    /// Drop a reservation. Stored responses are kept.
    fn release(&self, key: &str) -> Result<(), IdempotencyError>;

    /// `(reserved, stored response)` for a live key, `None` when absent.
    fn lookup(&self, key: &str) -> Result<Option<Option<Vec<u8>>>, IdempotencyError>;

    /// Remove expired entries, returning how many were removed.
    fn sweep_expired(&self) -> Result<usize, IdempotencyError>;
}

impl<S: IdempotencyStore + ?Sized> IdempotencyStore for Arc<S> {
    fn reserve(&self, key: &str, ttl: Duration) -> Result<Reservation, IdempotencyError> {
        (**self).reserve(key, ttl)
    }

    fn complete(
        &self,
        key: &str,
        response: Vec<u8>,
        ttl: Duration,
    ) -> Result<(), IdempotencyError> {
        (**self).complete(key, response, ttl)
    }

    fn release(&self, key: &str) -> Result<(), IdempotencyError> {
        (**self).release(key)
    }

    fn lookup(&self, key: &str) -> Result<Option<Option<Vec<u8>>>, IdempotencyError> {
        (**self).lookup(key)
    }

    fn sweep_expired(&self) -> Result<usize, IdempotencyError> {
        (**self).sweep_expired()
    }
}

#[derive(Debug, Clone)]
enum Slot {
    Reserved,
    Completed(Vec<u8>),
}

#[derive(Debug, Clone)]
struct Entry {
    slot: Slot,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Longest lifetime an entry can get; larger ttls are clamped to it.
const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

fn expiry(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl.min(MAX_TTL)).unwrap_or(now)
}

/// Process-local [`IdempotencyStore`]. Clones share the same map.
#[derive(Clone, Default)]
pub struct InMemoryIdempotencyStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live and expired entries not yet swept.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl IdempotencyStore for InMemoryIdempotencyStore {
    fn reserve(&self, key: &str, ttl: Duration) -> Result<Reservation, IdempotencyError> {
        let now = Instant::now();
        let mut entries = self.entries();
        if let Some(entry) = entries.get(key).filter(|e| e.is_live(now)) {
            return Ok(match &entry.slot {
                Slot::Reserved => Reservation::InProgress,
                Slot::Completed(response) => Reservation::Completed(response.clone()),
            });
        }
        entries.insert(
            key.to_string(),
            Entry {
                slot: Slot::Reserved,
                expires_at: expiry(now, ttl),
            },
        );
        Ok(Reservation::Reserved)
    }

    fn complete(
        &self,
        key: &str,
        response: Vec<u8>,
        ttl: Duration,
    ) -> Result<(), IdempotencyError> {
        self.entries().insert(
            key.to_string(),
            Entry {
                slot: Slot::Completed(response),
                expires_at: expiry(Instant::now(), ttl),
            },
        );
        Ok(())
    }

    fn release(&self, key: &str) -> Result<(), IdempotencyError> {
        let mut entries = self.entries();
        if matches!(entries.get(key), Some(Entry { slot: Slot::Reserved, .. })) {
            entries.remove(key);
        }
        Ok(())
    }

    fn lookup(&self, key: &str) -> Result<Option<Option<Vec<u8>>>, IdempotencyError> {
        let now = Instant::now();
        let mut entries = self.entries();
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(match &entry.slot {
                Slot::Reserved => None,
                Slot::Completed(response) => Some(response.clone()),
            })),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn sweep_expired(&self) -> Result<usize, IdempotencyError> {
        let now = Instant::now();
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        Ok(before - entries.len())
    }
}
