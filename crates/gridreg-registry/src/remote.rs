//! Forwarding to a replica of a VDB this node does not host.

use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use gridreg_core::wire::{
    MatchingProducersRequest, RegisterProducerRequest, UnregisterConsumerRequest,
    UnregisterProducerRequest,
};
use gridreg_core::{ConsumerEntry, ProducerEntry, RegistryError, RegistryResult};

use crate::lock;
use crate::transport::{CallReply, PeerTransport, RegistryCall, TransportError};

/// Proxy for the registry replicas of one VDB.
///
/// Sticks to the last replica that answered and fails over to the others
/// in configuration order when it cannot be reached.
pub struct RemoteRegistry {
    vdb: String,
    peers: Vec<String>,
    current: Mutex<Option<String>>,
    transport: Arc<dyn PeerTransport>,
}

impl RemoteRegistry {
    pub fn new(vdb: impl Into<String>, peers: Vec<String>, transport: Arc<dyn PeerTransport>) -> Self {
        Self {
            vdb: vdb.into(),
            peers,
            current: Mutex::new(None),
            transport,
        }
    }

    pub fn peers(&self) -> &[String] {
        &self.peers
    }

    /// The replica that answered last, if any.
    pub fn current_peer(&self) -> Option<String> {
        lock(&self.current).clone()
    }

    /// Run `call` on the first replica that can take it.
    ///
    /// Permanent errors reported by a replica are returned at once; anything
    /// else moves on to the next replica.
    pub async fn call(&self, call: &RegistryCall) -> RegistryResult<CallReply> {
        let preferred = self.current_peer();
        let candidates = preferred
            .iter()
            .chain(self.peers.iter().filter(|p| Some(*p) != preferred.as_ref()));

        for peer in candidates {
            match self.transport.forward(peer, &self.vdb, call).await {
                Ok(reply) => {
                    debug!(vdb = %self.vdb, %peer, call = call.name(), "call forwarded");
                    *lock(&self.current) = Some(peer.clone());
                    return Ok(reply);
                }
                Err(TransportError::Remote(e)) if !e.is_temporary() => return Err(e),
                Err(e) => {
                    warn!(vdb = %self.vdb, %peer, call = call.name(), error = %e, "replica unavailable; trying next");
                    let mut current = lock(&self.current);
                    if current.as_deref() == Some(peer.as_str()) {
                        *current = None;
                    }
                }
            }
        }
        Err(RegistryError::temporary(format!(
            "Could not find registry service for vdb {}",
            self.vdb
        )))
    }

    pub async fn register_producer_table(
        &self,
        request: RegisterProducerRequest,
    ) -> RegistryResult<Vec<ConsumerEntry>> {
        match self.call(&RegistryCall::RegisterProducer(request)).await? {
            CallReply::Consumers(consumers) => Ok(consumers),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn unregister_producer_table(&self, request: UnregisterProducerRequest) -> RegistryResult<()> {
        self.call(&RegistryCall::UnregisterProducer(request)).await.map(drop)
    }

    pub async fn unregister_continuous_consumer(
        &self,
        request: UnregisterConsumerRequest,
    ) -> RegistryResult<()> {
        self.call(&RegistryCall::UnregisterConsumer(request)).await.map(drop)
    }

    pub async fn get_matching_producers_for_tables(
        &self,
        request: MatchingProducersRequest,
    ) -> RegistryResult<Vec<ProducerEntry>> {
        producers(self.call(&RegistryCall::MatchingProducers(request)).await?)
    }

    pub async fn get_all_producers_for_table(&self, table_name: &str) -> RegistryResult<Vec<ProducerEntry>> {
        producers(
            self.call(&RegistryCall::AllProducersForTable {
                table_name: table_name.to_string(),
            })
            .await?,
        )
    }
}

fn producers(reply: CallReply) -> RegistryResult<Vec<ProducerEntry>> {
    match reply {
        CallReply::Producers(producers) => Ok(producers),
        other => Err(unexpected(&other)),
    }
}

fn unexpected(reply: &CallReply) -> RegistryError {
    RegistryError::permanent(format!("unexpected reply from remote registry: {reply:?}"))
}
