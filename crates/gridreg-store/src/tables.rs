//! redb table definitions for the registry store.
//!
//! Registrations are JSON values keyed by `{table}|{id}|{address}`. The
//! fixed-column index tables hold one typed value per producer predicate
//! column, keyed by `{table}|{id}|{address}|{column}` so that a producer's
//! index rows share its registration key as a prefix.

use redb::TableDefinition;

/// Producer registrations.
pub const PRODUCERS: TableDefinition<&str, &[u8]> = TableDefinition::new("producers");

/// Consumer registrations.
pub const CONSUMERS: TableDefinition<&str, &[u8]> = TableDefinition::new("consumers");

/// Producer predicate values of INTEGER columns.
pub const FIXED_INT: TableDefinition<&str, i64> = TableDefinition::new("fixed_int");

/// Producer predicate values of REAL columns.
pub const FIXED_REAL: TableDefinition<&str, f64> = TableDefinition::new("fixed_real");

/// Producer predicate values of VARCHAR columns.
pub const FIXED_STRING: TableDefinition<&str, &str> = TableDefinition::new("fixed_string");

/// Last accepted replication timestamp, keyed by peer host.
pub const INCOMING_REPLICATION: TableDefinition<&str, u64> =
    TableDefinition::new("incoming_replication");
