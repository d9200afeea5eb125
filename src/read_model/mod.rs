//! Read models: materialized views updated inside the same commit as the
//! events that change them.
//!
//! Models are stored as JSON under `"COLLECTION:id"` keys. Writes go through
//! [`Transaction::update_model`](crate::Transaction::update_model): an update
//! function evaluated against the stored value while the commit holds the
//! store's write lock, so increments are atomic.

use serde::{de::DeserializeOwned, Serialize};

use crate::domain::RepositoryError;

/// Trait for types that can be stored as read models.
pub trait ReadModel: Serialize + DeserializeOwned + Clone + Send + 'static {
    /// Collection name, used as the key prefix.
    const COLLECTION: &'static str;

    fn id(&self) -> &str;
}

/// A read model together with the number of writes it has seen.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub data: T,
    pub version: u64,
}

/// Raw access to stored read models.
pub trait ReadModelStore {
    fn get_raw(&self, key: &str) -> Result<Option<Versioned<Vec<u8>>>, RepositoryError>;
}

/// Typed reads on top of [`ReadModelStore`].
pub trait ReadModelsExt: ReadModelStore {
    fn get_model<M: ReadModel>(&self, id: &str) -> Result<Option<Versioned<M>>, RepositoryError> {
        let Some(raw) = self.get_raw(&model_key::<M>(id))? else {
            return Ok(None);
        };
        let data = serde_json::from_slice(&raw.data)?;
        Ok(Some(Versioned {
            data,
            version: raw.version,
        }))
    }
}

impl<S: ReadModelStore + ?Sized> ReadModelsExt for S {}

pub fn model_key<M: ReadModel>(id: &str) -> String {
    format!("{}:{}", M::COLLECTION, id)
}
