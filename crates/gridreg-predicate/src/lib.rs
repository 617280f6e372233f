//! gridreg-predicate — predicate analysis for registry matching.
//!
//! Parses consumer and producer predicates into `column OP literal` terms,
//! classifies consumer queries as simple or complex, and implements the
//! conservative contradiction test used to decide which producers a
//! consumer can skip.
//!
//! The test errs on the side of inclusion: a producer is only excluded when
//! a shared column makes the two predicates provably disjoint.

pub mod ast;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod predicate;
pub mod token;

pub use ast::Literal;
pub use error::{NotSimpleReason, PredicateError, PredicateResult};
pub use predicate::{
    Operator, ParsedPredicate, PredicateColumn, ProducerPredicate, contradicts, infer_column_type,
};
