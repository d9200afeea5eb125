use super::entity::Entity;
use super::error::RepositoryError;
use crate::commit_builder::WriteSet;

/// Entity storage with all-or-nothing commits.
///
/// A [`WriteSet`] is applied completely or not at all: entity streams,
/// outbox rows, event log rows and read model updates become visible
/// together. Implementations must enforce optimistic concurrency on entity
/// versions and uniqueness of outbox and processed event log ids.
pub trait Repository {
    fn get(&self, id: &str) -> Result<Option<Entity>, RepositoryError>;

    fn commit(&self, writes: WriteSet<'_>) -> Result<(), RepositoryError>;
}
