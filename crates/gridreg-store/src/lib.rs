//! gridreg-store — per-VDB registration store for the grid registry.
//!
//! Backed by [redb](https://docs.rs/redb). Each VDB gets its own database
//! holding producer and consumer registrations, a typed index of producer
//! predicate values, and the last replication timestamp accepted from each
//! peer.
//!
//! Registrations are JSON-serialized into `&[u8]` value columns keyed by
//! `{table}|{id}|{address}`. Index rows extend that key with `|{column}` so
//! a producer's index rows can be found and dropped by prefix.
//!
//! `RegistryStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StoreError, StoreResult};
pub use store::RegistryStore;
pub use types::*;
