//! Error types for the registry store.

use gridreg_core::RegistryError;
use gridreg_predicate::PredicateError;
use thiserror::Error;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open registry database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("invalid registration key: {0}")]
    InvalidKey(String),

    #[error("schema lookup failed: {0}")]
    Schema(String),

    #[error(transparent)]
    Predicate(#[from] PredicateError),
}

/// Storage failures are never retried by the registry itself.
impl From<StoreError> for RegistryError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Predicate(p) => p.into(),
            other => RegistryError::permanent(other.to_string()),
        }
    }
}
