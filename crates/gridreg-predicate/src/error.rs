//! Predicate analyzer errors.

use std::fmt;

use gridreg_core::RegistryError;
use thiserror::Error;

pub type PredicateResult<T> = Result<T, PredicateError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PredicateError {
    #[error("syntax error in predicate at offset {offset}: {message}")]
    Parse { message: String, offset: usize },

    #[error("predicate is not simple: {0}")]
    NotSimple(NotSimpleReason),

    #[error("producer predicate must be a conjunction of column = value terms: {0}")]
    NotProducerPredicate(String),
}

/// The construct that made a query too complex to register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotSimpleReason {
    /// Join over this many source tables.
    Join(usize),
    Distinct,
    GroupBy,
    Having,
    OrderBy,
    Aggregate(String),
    /// OR, NOT, IN, BETWEEN, NOT LIKE, IS NULL, sub-selects or
    /// column-to-column comparisons.
    ComplexOperator,
}

impl fmt::Display for NotSimpleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Join(n) => write!(f, "joins are not supported ({n} tables in FROM)"),
            Self::Distinct => f.write_str("DISTINCT is not supported"),
            Self::GroupBy => f.write_str("GROUP BY is not supported"),
            Self::Having => f.write_str("HAVING is not supported"),
            Self::OrderBy => f.write_str("ORDER BY is not supported"),
            Self::Aggregate(name) => write!(f, "aggregate function {name} is not supported"),
            Self::ComplexOperator => f.write_str(
                "only AND-ed comparisons (=, <>, <, <=, >, >=, LIKE) between a column and a literal are supported",
            ),
        }
    }
}

impl From<PredicateError> for RegistryError {
    fn from(e: PredicateError) -> Self {
        RegistryError::permanent(e.to_string())
    }
}
