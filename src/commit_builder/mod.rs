//! Transaction - stage entities, outbox rows, event log rows and read model
//! updates, then apply them in one atomic commit.
//!
//! ## Example
//!
//! ```ignore
//! let mut tx = repo.transaction();
//! tx.outbox(OutboxRecord::encode("PaymentCaptured", &view)?)
//!     .update_model::<CampaignTotals, _>("campaign-1", |t| bump(t));
//! tx.commit(&mut payment)?;
//! ```

use crate::domain::{Aggregate, Entity, Repository, RepositoryError};
use crate::event_log::EventLogRecord;
use crate::outbox::OutboxRecord;
use crate::read_model::{model_key, ReadModel};

/// Read-modify-write of one stored read model, evaluated inside the commit.
pub type ModelFn =
    Box<dyn FnOnce(Option<&[u8]>) -> Result<Vec<u8>, RepositoryError> + Send>;

pub struct ModelUpdate {
    /// Storage key: "COLLECTION:id"
    pub key: String,
    pub apply: ModelFn,
}

/// Everything one commit writes.
#[derive(Default)]
pub struct WriteSet<'a> {
    pub entities: Vec<&'a mut Entity>,
    pub outbox: Vec<OutboxRecord>,
    pub event_log: Vec<EventLogRecord>,
    pub models: Vec<ModelUpdate>,
}

/// Builder for one atomic commit against `R`.
pub struct Transaction<'r, R: ?Sized> {
    repo: &'r R,
    entities: Vec<Entity>,
    outbox: Vec<OutboxRecord>,
    event_log: Vec<EventLogRecord>,
    models: Vec<ModelUpdate>,
}

impl<'r, R: Repository + ?Sized> Transaction<'r, R> {
    pub fn new(repo: &'r R) -> Self {
        Self {
            repo,
            entities: Vec::new(),
            outbox: Vec::new(),
            event_log: Vec::new(),
            models: Vec::new(),
        }
    }

    pub fn repo(&self) -> &'r R {
        self.repo
    }

    /// Stage a copy of an aggregate's entity. Use [`Transaction::commit`] for
    /// the aggregate whose committed version the caller keeps using.
    pub fn stage<A: Aggregate>(&mut self, aggregate: &A) -> &mut Self {
        self.entities.push(aggregate.entity().clone());
        self
    }

    pub fn outbox(&mut self, record: OutboxRecord) -> &mut Self {
        self.outbox.push(record);
        self
    }

    pub fn record_event(&mut self, record: EventLogRecord) -> &mut Self {
        self.event_log.push(record);
        self
    }

    /// Update a read model from its stored value (`None` if absent) while
    /// the commit holds the store's write lock.
    pub fn update_model<M, F>(&mut self, id: &str, update: F) -> &mut Self
    where
        M: ReadModel,
        F: FnOnce(Option<M>) -> M + Send + 'static,
    {
        self.models.push(ModelUpdate {
            key: model_key::<M>(id),
            apply: Box::new(move |current| {
                let current = current.map(serde_json::from_slice::<M>).transpose()?;
                Ok(serde_json::to_vec(&update(current))?)
            }),
        });
        self
    }

    /// Commit everything staged plus `aggregate`, marking its entity committed.
    pub fn commit<A: Aggregate>(self, aggregate: &mut A) -> Result<(), RepositoryError> {
        let Transaction {
            repo,
            mut entities,
            outbox,
            event_log,
            models,
        } = self;
        let mut refs: Vec<&mut Entity> = entities.iter_mut().collect();
        refs.push(aggregate.entity_mut());
        repo.commit(WriteSet {
            entities: refs,
            outbox,
            event_log,
            models,
        })
    }

    /// Commit everything staged without a primary aggregate.
    pub fn commit_all(self) -> Result<(), RepositoryError> {
        let Transaction {
            repo,
            mut entities,
            outbox,
            event_log,
            models,
        } = self;
        repo.commit(WriteSet {
            entities: entities.iter_mut().collect(),
            outbox,
            event_log,
            models,
        })
    }
}

/// Start a [`Transaction`] from any repository.
pub trait TransactionExt: Repository {
    fn transaction(&self) -> Transaction<'_, Self> {
        Transaction::new(self)
    }
}

impl<R: Repository> TransactionExt for R {}
