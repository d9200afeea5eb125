use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

use crate::commit_builder::{ModelUpdate, WriteSet};
use crate::domain::{Entity, EventRecord, Repository, RepositoryError};
use crate::event_log::{EventLogRecord, EventLogStatus, EventLogStore};
use crate::outbox::{OutboxRecord, OutboxStats, OutboxStatus, OutboxStore};
use crate::read_model::{ReadModelStore, Versioned};

/// Points inside a commit where [`HashMapRepository::inject_fault`] can
/// simulate a crash.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultPoint {
    /// Entity streams written, outbox not yet.
    AfterEntities,
    /// Outbox written, event log not yet.
    AfterOutbox,
    /// Event log written, read models not yet.
    AfterEventLog,
}

impl FaultPoint {
    fn as_str(self) -> &'static str {
        match self {
            FaultPoint::AfterEntities => "after entity write",
            FaultPoint::AfterOutbox => "after outbox write",
            FaultPoint::AfterEventLog => "after event log write",
        }
    }
}

#[derive(Default)]
struct Tables {
    streams: HashMap<String, Vec<EventRecord>>,
    outbox: Vec<OutboxRecord>,
    event_log: HashMap<(String, String), EventLogRecord>,
    models: HashMap<String, Versioned<Vec<u8>>>,
}

impl Tables {
    fn outbox_mut(&mut self, event_id: &str) -> Result<&mut OutboxRecord, RepositoryError> {
        self.outbox
            .iter_mut()
            .find(|r| r.event_id == event_id)
            .ok_or_else(|| RepositoryError::NotFound {
                collection: "outbox",
                key: event_id.to_string(),
            })
    }
}

enum Undo {
    Stream(String, Option<Vec<EventRecord>>),
    OutboxLen(usize),
    EventLog((String, String), Option<EventLogRecord>),
    Model(String, Option<Versioned<Vec<u8>>>),
}

/// In-process store for entity streams, the outbox, the event log and read
/// models. Clones share the same tables.
#[derive(Clone, Default)]
pub struct HashMapRepository {
    tables: Arc<RwLock<Tables>>,
    fault: Arc<Mutex<Option<FaultPoint>>>,
}

impl HashMapRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next commit fail at `point`, after part of its writes were
    /// applied. The commit must roll back completely.
    pub fn inject_fault(&self, point: FaultPoint) {
        if let Ok(mut fault) = self.fault.lock() {
            *fault = Some(point);
        }
    }

    fn take_fault(&self) -> Result<Option<FaultPoint>, RepositoryError> {
        Ok(self
            .fault
            .lock()
            .map_err(|_| RepositoryError::LockPoisoned("fault injection"))?
            .take())
    }

    fn read(&self, operation: &'static str) -> Result<RwLockReadGuard<'_, Tables>, RepositoryError> {
        self.tables
            .read()
            .map_err(|_| RepositoryError::LockPoisoned(operation))
    }

    fn write(&self, operation: &'static str) -> Result<RwLockWriteGuard<'_, Tables>, RepositoryError> {
        self.tables
            .write()
            .map_err(|_| RepositoryError::LockPoisoned(operation))
    }
}

fn validate(tables: &Tables, writes: &WriteSet<'_>) -> Result<(), RepositoryError> {
    for entity in &writes.entities {
        if entity.id().is_empty() {
            return Err(RepositoryError::MissingId);
        }
        let stored = tables
            .streams
            .get(entity.id())
            .map(|events| events.len() as u64)
            .unwrap_or(0);
        if stored != entity.committed_version() {
            return Err(RepositoryError::ConcurrentWrite {
                id: entity.id().to_string(),
                expected: entity.committed_version(),
                actual: stored,
            });
        }
    }

    let mut staged = HashSet::new();
    for record in &writes.outbox {
        let exists = tables.outbox.iter().any(|r| r.event_id == record.event_id);
        if exists || !staged.insert(record.event_id.as_str()) {
            return Err(RepositoryError::DuplicateKey {
                collection: "outbox",
                key: record.event_id.clone(),
            });
        }
    }

    let mut staged = HashSet::new();
    for record in &writes.event_log {
        let key = record.key();
        let processed = tables
            .event_log
            .get(&key)
            .is_some_and(|r| r.is_processed());
        if record.is_processed() && (processed || !staged.insert(key)) {
            return Err(RepositoryError::DuplicateKey {
                collection: "event_log",
                key: format!("{}/{}", record.consumer, record.event_id),
            });
        }
    }

    Ok(())
}

fn check_fault(fault: Option<FaultPoint>, at: FaultPoint) -> Result<(), RepositoryError> {
    if fault == Some(at) {
        return Err(RepositoryError::Injected(at.as_str()));
    }
    Ok(())
}

fn apply(
    tables: &mut Tables,
    writes: &mut WriteSet<'_>,
    fault: Option<FaultPoint>,
    undo: &mut Vec<Undo>,
) -> Result<(), RepositoryError> {
    for entity in writes.entities.iter().filter(|e| e.has_uncommitted()) {
        let previous = tables
            .streams
            .insert(entity.id().to_string(), entity.events().to_vec());
        undo.push(Undo::Stream(entity.id().to_string(), previous));
    }
    check_fault(fault, FaultPoint::AfterEntities)?;

    undo.push(Undo::OutboxLen(tables.outbox.len()));
    tables.outbox.append(&mut writes.outbox);
    check_fault(fault, FaultPoint::AfterOutbox)?;

    for mut record in writes.event_log.drain(..) {
        let key = record.key();
        let previous = tables.event_log.get(&key).cloned();
        if let Some(previous) = &previous {
            record.retry_count = record.retry_count.max(previous.retry_count);
        }
        undo.push(Undo::EventLog(key.clone(), previous));
        tables.event_log.insert(key, record);
    }
    check_fault(fault, FaultPoint::AfterEventLog)?;

    for ModelUpdate { key, apply: update } in writes.models.drain(..) {
        let previous = tables.models.get(&key).cloned();
        let data = update(previous.as_ref().map(|v| v.data.as_slice()))?;
        let version = previous.as_ref().map(|v| v.version).unwrap_or(0) + 1;
        tables.models.insert(key.clone(), Versioned { data, version });
        undo.push(Undo::Model(key, previous));
    }

    Ok(())
}

fn rollback(tables: &mut Tables, undo: Vec<Undo>) {
    for step in undo.into_iter().rev() {
        match step {
            Undo::Stream(id, Some(events)) => {
                tables.streams.insert(id, events);
            }
            Undo::Stream(id, None) => {
                tables.streams.remove(&id);
            }
            Undo::OutboxLen(len) => tables.outbox.truncate(len),
            Undo::EventLog(id, Some(record)) => {
                tables.event_log.insert(id, record);
            }
            Undo::EventLog(id, None) => {
                tables.event_log.remove(&id);
            }
            Undo::Model(key, Some(model)) => {
                tables.models.insert(key, model);
            }
            Undo::Model(key, None) => {
                tables.models.remove(&key);
            }
        }
    }
}

impl Repository for HashMapRepository {
    fn get(&self, id: &str) -> Result<Option<Entity>, RepositoryError> {
        let tables = self.read("read")?;
        Ok(tables.streams.get(id).map(|events| {
            let mut entity = Entity::with_id(id);
            entity.load_from_history(events.clone());
            entity
        }))
    }

    fn commit(&self, mut writes: WriteSet<'_>) -> Result<(), RepositoryError> {
        let fault = self.take_fault()?;
        let outbox_rows = writes.outbox.len();
        {
            let mut tables = self.write("commit")?;
            validate(&tables, &writes)?;

            let mut undo = Vec::new();
            if let Err(err) = apply(&mut tables, &mut writes, fault, &mut undo) {
                rollback(&mut tables, undo);
                warn!(error = %err, "commit rolled back");
                return Err(err);
            }
        }

        for entity in writes.entities.iter_mut() {
            entity.mark_committed();
        }
        debug!(
            entities = writes.entities.len(),
            outbox_rows,
            "commit applied"
        );
        Ok(())
    }
}

impl OutboxStore for HashMapRepository {
    fn fetch_pending(&self, limit: usize) -> Result<Vec<OutboxRecord>, RepositoryError> {
        let tables = self.read("outbox read")?;
        Ok(tables
            .outbox
            .iter()
            .filter(|r| r.status == OutboxStatus::Pending)
            .take(limit)
            .cloned()
            .collect())
    }

    fn claim_pending(
        &self,
        worker_id: &str,
        limit: usize,
        lease: Duration,
    ) -> Result<Vec<OutboxRecord>, RepositoryError> {
        let mut tables = self.write("outbox claim")?;
        let now = SystemTime::now();
        let locked_until = now.checked_add(lease).unwrap_or(now);

        let mut claimed = Vec::new();
        for record in tables.outbox.iter_mut() {
            if claimed.len() >= limit {
                break;
            }
            if !record.is_claimable(now) {
                continue;
            }
            record.locked_by = Some(worker_id.to_string());
            record.locked_until = Some(locked_until);
            claimed.push(record.clone());
        }

        Ok(claimed)
    }

    fn mark_published(&self, event_id: &str) -> Result<(), RepositoryError> {
        let mut tables = self.write("outbox write")?;
        let record = tables.outbox_mut(event_id)?;
        if record.status == OutboxStatus::Published {
            return Ok(());
        }
        record.status = OutboxStatus::Published;
        record.published_at = Some(SystemTime::now());
        record.release_lease();
        Ok(())
    }

    fn record_failure(
        &self,
        event_id: &str,
        error: &str,
        max_retries: u32,
    ) -> Result<OutboxStatus, RepositoryError> {
        let mut tables = self.write("outbox write")?;
        let record = tables.outbox_mut(event_id)?;
        if record.status != OutboxStatus::Pending {
            return Ok(record.status);
        }
        record.retry_count = record.retry_count.saturating_add(1);
        record.last_error = Some(error.to_string());
        if record.retry_count >= max_retries {
            record.status = OutboxStatus::Failed;
        }
        record.release_lease();
        Ok(record.status)
    }

    fn mark_failed(&self, event_id: &str, error: &str) -> Result<(), RepositoryError> {
        let mut tables = self.write("outbox write")?;
        let record = tables.outbox_mut(event_id)?;
        if record.status == OutboxStatus::Published {
            return Err(RepositoryError::InvalidState {
                collection: "outbox",
                key: event_id.to_string(),
                expected: "PENDING",
                actual: record.status.to_string(),
            });
        }
        record.status = OutboxStatus::Failed;
        record.last_error = Some(error.to_string());
        record.release_lease();
        Ok(())
    }

    fn retry_failed(&self, event_id: &str) -> Result<(), RepositoryError> {
        let mut tables = self.write("outbox write")?;
        let record = tables.outbox_mut(event_id)?;
        if record.status != OutboxStatus::Failed {
            return Err(RepositoryError::InvalidState {
                collection: "outbox",
                key: event_id.to_string(),
                expected: "FAILED",
                actual: record.status.to_string(),
            });
        }
        record.status = OutboxStatus::Pending;
        record.retry_count = 0;
        record.last_error = None;
        record.release_lease();
        Ok(())
    }

    fn outbox_record(&self, event_id: &str) -> Result<Option<OutboxRecord>, RepositoryError> {
        let tables = self.read("outbox read")?;
        Ok(tables
            .outbox
            .iter()
            .find(|r| r.event_id == event_id)
            .cloned())
    }

    fn outbox_records(&self) -> Result<Vec<OutboxRecord>, RepositoryError> {
        Ok(self.read("outbox read")?.outbox.clone())
    }

    fn outbox_stats(&self) -> Result<OutboxStats, RepositoryError> {
        let tables = self.read("outbox read")?;
        let mut stats = OutboxStats::default();
        for record in &tables.outbox {
            stats.count(record.status);
        }
        Ok(stats)
    }
}

impl EventLogStore for HashMapRepository {
    fn event_log(
        &self,
        consumer: &str,
        event_id: &str,
    ) -> Result<Option<EventLogRecord>, RepositoryError> {
        let key = (consumer.to_string(), event_id.to_string());
        Ok(self.read("event log read")?.event_log.get(&key).cloned())
    }

    fn record_event_failure(&self, mut record: EventLogRecord) -> Result<EventLogRecord, RepositoryError> {
        let mut tables = self.write("event log write")?;
        let key = record.key();
        if let Some(existing) = tables.event_log.get(&key) {
            if existing.is_processed() {
                return Ok(existing.clone());
            }
            record.retry_count = existing.retry_count.saturating_add(1);
        } else {
            record.retry_count = record.retry_count.max(1);
        }
        record.status = EventLogStatus::Failed;
        record.updated_at = SystemTime::now();
        tables.event_log.insert(key, record.clone());
        Ok(record)
    }
}

impl ReadModelStore for HashMapRepository {
    fn get_raw(&self, key: &str) -> Result<Option<Versioned<Vec<u8>>>, RepositoryError> {
        Ok(self.read("read model read")?.models.get(key).cloned())
    }
}
