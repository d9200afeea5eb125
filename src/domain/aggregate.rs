use std::fmt;

use super::entity::Entity;
use super::error::RepositoryError;
use super::event_record::EventRecord;
use super::repository::Repository;

/// A domain type whose state is derived from its entity's event stream.
pub trait Aggregate: Sized + Default {
    type ReplayError: fmt::Display;

    fn entity(&self) -> &Entity;
    fn entity_mut(&mut self) -> &mut Entity;
    fn replay_event(&mut self, event: &EventRecord) -> Result<(), Self::ReplayError>;
}

/// Implement [`Aggregate`] for a struct holding an `Entity` field and an
/// inherent `fn(&mut self, &EventRecord) -> Result<(), E>` replay method.
#[macro_export]
macro_rules! impl_aggregate {
    ($ty:ty, $entity:ident, $replay:ident) => {
        $crate::impl_aggregate!($ty, $entity, $replay, String);
    };
    ($ty:ty, $entity:ident, $replay:ident, $err:ty) => {
        impl $crate::Aggregate for $ty {
            type ReplayError = $err;

            fn entity(&self) -> &$crate::Entity {
                &self.$entity
            }

            fn entity_mut(&mut self) -> &mut $crate::Entity {
                &mut self.$entity
            }

            fn replay_event(
                &mut self,
                event: &$crate::EventRecord,
            ) -> Result<(), Self::ReplayError> {
                Self::$replay(self, event)
            }
        }
    };
}

/// Hydrate an aggregate from an entity by replaying its events.
pub fn hydrate<A: Aggregate>(entity: Entity) -> Result<A, RepositoryError> {
    let mut aggregate = A::default();
    *aggregate.entity_mut() = entity;

    let events = aggregate.entity().events().to_vec();
    aggregate.entity_mut().set_replaying(true);
    for event in &events {
        if let Err(err) = aggregate.replay_event(event) {
            aggregate.entity_mut().set_replaying(false);
            return Err(RepositoryError::Replay(err.to_string()));
        }
    }
    aggregate.entity_mut().set_replaying(false);

    Ok(aggregate)
}

/// Aggregate-aware reads for any [`Repository`].
pub trait RepositoryExt: Repository {
    fn get_aggregate<A: Aggregate>(&self, id: &str) -> Result<Option<A>, RepositoryError> {
        let Some(entity) = self.get(id)? else {
            return Ok(None);
        };
        Ok(Some(hydrate::<A>(entity)?))
    }
}

impl<R: Repository + ?Sized> RepositoryExt for R {}
