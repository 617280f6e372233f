//! gridreg-core — shared types for the grid registry.
//!
//! Holds the registration model (producers, consumers, endpoints), the
//! replication wire types exchanged between registry replicas, the
//! two-class error type, the schema lookup seam, and the `gridreg.toml`
//! configuration model.

pub mod config;
pub mod error;
pub mod replication;
pub mod schema;
pub mod types;
pub mod wire;

pub use config::{RegistryConfig, RegistrySettings, TableSchemaConfig, VdbConfig};
pub use error::{RegistryError, RegistryResult};
pub use replication::{ReplicaOutcome, ReplicationLogEntry, ReplicationMessage};
pub use schema::{ColumnType, SchemaLookup, StaticSchema};
pub use types::*;
