use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    #[error("repository lock poisoned during {0}")]
    LockPoisoned(&'static str),

    #[error("concurrent write detected for entity {id} (expected version {expected}, got {actual})")]
    ConcurrentWrite {
        id: String,
        expected: u64,
        actual: u64,
    },

    #[error("duplicate key {key} in {collection}")]
    DuplicateKey {
        collection: &'static str,
        key: String,
    },

    #[error("{key} not found in {collection}")]
    NotFound {
        collection: &'static str,
        key: String,
    },

    #[error("{key} in {collection} is {actual}, expected {expected}")]
    InvalidState {
        collection: &'static str,
        key: String,
        expected: &'static str,
        actual: String,
    },

    #[error("cannot commit an entity without an id")]
    MissingId,

    #[error("replay error: {0}")]
    Replay(String),

    #[error("serialization error: {0}")]
    Serde(String),

    #[error("injected fault {0}")]
    Injected(&'static str),
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serde(err.to_string())
    }
}

impl From<bitcode::Error> for RepositoryError {
    fn from(err: bitcode::Error) -> Self {
        RepositoryError::Serde(err.to_string())
    }
}
