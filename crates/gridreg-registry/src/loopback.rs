//! In-process peer transport: delivers straight into other
//! [`RegistryService`]s in the same process, keyed by hostname.
//!
//! Used to run several replicas side by side without sockets.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, Weak};

use gridreg_core::{ReplicaOutcome, ReplicationMessage, host_of_url};

use crate::service::RegistryService;
use crate::transport::{BoxFuture, CallReply, PeerTransport, RegistryCall, TransportError};

#[derive(Default)]
pub struct LoopbackTransport {
    services: RwLock<HashMap<String, Weak<RegistryService>>>,
    unreachable: RwLock<HashSet<String>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `service` reachable under `host`.
    pub fn attach(&self, host: &str, service: &Arc<RegistryService>) {
        self.services
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(host.to_lowercase(), Arc::downgrade(service));
    }

    /// Simulate a network partition towards `host`.
    pub fn set_reachable(&self, host: &str, reachable: bool) {
        let mut unreachable = self.unreachable.write().unwrap_or_else(|e| e.into_inner());
        if reachable {
            unreachable.remove(&host.to_lowercase());
        } else {
            unreachable.insert(host.to_lowercase());
        }
    }

    fn target(&self, peer: &str) -> Result<Arc<RegistryService>, TransportError> {
        let host = host_of_url(peer).unwrap_or(peer).to_lowercase();
        let refused = |message: &str| TransportError::Connect {
            peer: peer.to_string(),
            message: message.to_string(),
        };
        if self
            .unreachable
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&host)
        {
            return Err(refused("host unreachable"));
        }
        self.services
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&host)
            .and_then(Weak::upgrade)
            .ok_or_else(|| refused("connection refused"))
    }
}

impl PeerTransport for LoopbackTransport {
    fn send_replica<'a>(
        &'a self,
        peer: &'a str,
        message: &'a ReplicationMessage,
    ) -> BoxFuture<'a, Result<ReplicaOutcome, TransportError>> {
        Box::pin(async move {
            let service = self.target(peer)?;
            service
                .add_replica(message.clone())
                .await
                .map_err(TransportError::Remote)
        })
    }

    fn forward<'a>(
        &'a self,
        peer: &'a str,
        vdb: &'a str,
        call: &'a RegistryCall,
    ) -> BoxFuture<'a, Result<CallReply, TransportError>> {
        Box::pin(async move {
            let service = self.target(peer)?;
            service
                .execute(vdb, call.clone(), false)
                .await
                .map_err(TransportError::Remote)
        })
    }
}
