//! Error classes surfaced by the registry.

use thiserror::Error;

/// Result type alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// The two error classes a registry caller can observe.
///
/// `Permanent` errors (malformed predicate, unknown VDB, forwarding
/// disallowed, storage failure) must not be retried as-is. `Temporary`
/// errors (VDB not yet online, no reachable replica) should be retried
/// after a backoff.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("{0}")]
    Permanent(String),

    #[error("{0}")]
    Temporary(String),
}

impl RegistryError {
    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn temporary(msg: impl Into<String>) -> Self {
        Self::Temporary(msg.into())
    }

    /// Whether a caller may retry the same call later.
    pub fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Permanent(msg) | Self::Temporary(msg) => msg,
        }
    }
}
