use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use super::error::RepositoryError;
use super::event_record::EventRecord;

/// Versioned event stream backing every aggregate.
///
/// `version` counts all events, `committed_version` counts the events known
/// to be persisted. The difference is what the next commit appends, and the
/// store compares `committed_version` against its own stream length to
/// detect concurrent writers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Entity {
    id: String,
    version: u64,
    committed_version: u64,
    events: Vec<EventRecord>,
    #[serde(skip, default)]
    replaying: bool,
    timestamp: SystemTime,
}

impl Default for Entity {
    fn default() -> Self {
        Entity {
            id: String::new(),
            version: 0,
            committed_version: 0,
            events: Vec::new(),
            replaying: false,
            timestamp: SystemTime::now(),
        }
    }
}

impl Entity {
    pub fn new() -> Self {
        Entity::default()
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        let mut entity = Entity::default();
        entity.id = id.into();
        entity
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = id.into();
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn committed_version(&self) -> u64 {
        self.committed_version
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    pub fn events(&self) -> &[EventRecord] {
        &self.events
    }

    /// Events recorded since the last load or commit.
    pub fn new_events(&self) -> &[EventRecord] {
        let start = (self.committed_version as usize).min(self.events.len());
        &self.events[start..]
    }

    pub fn has_uncommitted(&self) -> bool {
        self.version > self.committed_version
    }

    /// Record an event. No-op while replaying history. Nothing is recorded
    /// when the payload cannot be encoded.
    pub fn digest<T: Serialize>(
        &mut self,
        name: impl Into<String>,
        payload: &T,
    ) -> Result<(), RepositoryError> {
        if self.replaying {
            return Ok(());
        }

        let bytes = bitcode::serialize(payload)?;
        let sequence = self.events.len() as u64 + 1;
        self.events.push(EventRecord::new(name, bytes, sequence));
        self.version = self.events.len() as u64;
        self.timestamp = SystemTime::now();
        Ok(())
    }

    pub fn load_from_history(&mut self, history: Vec<EventRecord>) {
        self.events = history;
        self.version = self.events.len() as u64;
        self.committed_version = self.version;
        if let Some(last) = self.events.last() {
            self.timestamp = last.timestamp;
        }
    }

    pub fn mark_committed(&mut self) {
        self.committed_version = self.version;
    }

    pub fn is_replaying(&self) -> bool {
        self.replaying
    }

    pub fn set_replaying(&mut self, replaying: bool) {
        self.replaying = replaying;
    }
}
