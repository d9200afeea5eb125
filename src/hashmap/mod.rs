mod repository;

pub use repository::{FaultPoint, HashMapRepository};
