mod aggregate;
mod entity;
mod error;
mod event_record;
mod repository;

pub use aggregate::{hydrate, Aggregate, RepositoryExt};
pub use entity::Entity;
pub use error::RepositoryError;
pub use event_record::{EventRecord, PayloadError};
pub use repository::Repository;
