//! gridreg-registry — registry instances, replication, and the VDB service.
//!
//! Each VDB hosted on this node gets a [`RegistryInstance`] wrapping its
//! store. Instances replicate to the other hosts of the VDB with
//! timestamp-versioned incremental messages, falling back to a full
//! snapshot whenever a peer reports a gap. The [`RegistryService`] routes
//! calls by VDB name, forwarding to a remote replica when this node does
//! not host the VDB.
//!
//! # Architecture
//!
//! ```text
//! RegistryService
//!   └── per VDB
//!       ├── RegistryInstance (store, delta log, lifecycle)
//!       │   ├── cleanup loop   → purge expired rows, marks cleaned
//!       │   └── readiness timer → Starting → Online
//!       ├── ReplicationSender → PeerTransport → peer add_replica()
//!       └── RemoteRegistry    → PeerTransport → peer execute()
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

mod cleanup;
pub mod instance;
pub mod loopback;
pub mod remote;
pub mod replication;
pub mod service;
pub mod status;
pub mod transport;

pub use instance::{InstanceState, RegistryInstance};
pub use loopback::LoopbackTransport;
pub use remote::RemoteRegistry;
pub use replication::{ReplicationSender, SendState, SendTaskStatus, apply_replica};
pub use service::{RegistryService, StoreLocation};
pub use transport::{CallReply, HttpTransport, PeerTransport, RegistryCall, TransportError};

/// Lock a mutex, recovering the guard if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
