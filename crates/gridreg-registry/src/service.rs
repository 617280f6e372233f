//! The registry service: every VDB known to this node, keyed by name.
//!
//! Calls for a VDB hosted here go to its [`RegistryInstance`]; calls for a
//! VDB hosted elsewhere go to a [`RemoteRegistry`] when forwarding is
//! allowed.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::RwLock;
use tracing::{debug, info};

use gridreg_core::wire::{
    MatchingProducersRequest, RegisterProducerRequest, UnregisterConsumerRequest,
    UnregisterProducerRequest,
};
use gridreg_core::{
    ConsumerEntry, ProducerEntry, RegistryError, RegistryResult, RegistrySettings, ReplicaOutcome,
    ReplicationMessage, SchemaLookup, epoch_secs, host_of_url, normalize_vdb_name,
};
use gridreg_predicate::ParsedPredicate;
use gridreg_store::RegistryStore;

use crate::instance::RegistryInstance;
use crate::remote::RemoteRegistry;
use crate::replication::ReplicationSender;
use crate::status;
use crate::transport::{CallReply, PeerTransport, RegistryCall};

/// Where instance stores live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    /// One redb file per VDB in this directory.
    Directory(PathBuf),
    InMemory,
}

/// Everything the service knows about one VDB.
pub(crate) struct VdbEntry {
    pub(crate) name: String,
    pub(crate) instance: Option<Arc<RegistryInstance>>,
    pub(crate) sender: Option<ReplicationSender>,
    pub(crate) remote: Option<Arc<RemoteRegistry>>,
    /// Replica URLs other than this node; `None` until first configured.
    pub(crate) peers: Option<BTreeSet<String>>,
}

impl VdbEntry {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            instance: None,
            sender: None,
            remote: None,
            peers: None,
        }
    }

    fn stop(&mut self) {
        if let Some(sender) = self.sender.take() {
            sender.shutdown();
        }
        if let Some(instance) = self.instance.take() {
            instance.shutdown();
        }
        self.remote = None;
    }
}

enum Route {
    Local(Arc<RegistryInstance>),
    Remote(Arc<RemoteRegistry>),
}

pub struct RegistryService {
    hostname: String,
    location: StoreLocation,
    settings: RegistrySettings,
    schema: Arc<dyn SchemaLookup>,
    transport: Arc<dyn PeerTransport>,
    vdbs: RwLock<HashMap<String, VdbEntry>>,
    online: AtomicBool,
}

impl RegistryService {
    pub fn new(
        hostname: impl Into<String>,
        location: StoreLocation,
        settings: RegistrySettings,
        schema: Arc<dyn SchemaLookup>,
        transport: Arc<dyn PeerTransport>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            location,
            settings,
            schema,
            transport,
            vdbs: RwLock::new(HashMap::new()),
            online: AtomicBool::new(true),
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    fn check_online(&self) -> RegistryResult<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RegistryError::temporary("registry service is shutting down"))
        }
    }

    // ── VDB topology ───────────────────────────────────────────────

    /// Create or reconfigure a VDB from the full list of its replica URLs.
    ///
    /// This node hosts an instance when one of the URLs names its hostname;
    /// the remaining URLs become replication peers and forwarding targets.
    pub async fn create_vdb(&self, vdb: &str, replicas: &[String]) -> RegistryResult<()> {
        self.check_online()?;
        let name = normalize_vdb_name(vdb);

        let mut hosted = false;
        let mut peers = BTreeSet::new();
        for url in replicas {
            let host = host_of_url(url).ok_or_else(|| {
                RegistryError::permanent(format!("replica url '{url}' of VDB {name} has no host"))
            })?;
            if host.eq_ignore_ascii_case(&self.hostname) {
                hosted = true;
            } else {
                peers.insert(url.clone());
            }
        }

        let mut vdbs = self.vdbs.write().await;
        let store = if hosted && vdbs.get(&name).is_none_or(|e| e.instance.is_none()) {
            Some(self.open_store(&name)?)
        } else {
            None
        };
        let entry = vdbs
            .entry(name.clone())
            .or_insert_with(|| VdbEntry::new(&name));
        let peers_changed = entry.peers.as_ref() != Some(&peers);

        if let Some(store) = store {
            let instance = RegistryInstance::new(store, self.settings.clone());
            instance.start(!peers.is_empty());
            entry.instance = Some(instance);
        } else if !hosted {
            if let Some(instance) = entry.instance.take() {
                instance.shutdown();
            }
        }

        if entry.instance.is_none() || peers_changed {
            if let Some(sender) = entry.sender.take() {
                sender.shutdown();
            }
        }
        if entry.sender.is_none() && !peers.is_empty() {
            if let Some(instance) = &entry.instance {
                let sender = ReplicationSender::new(
                    Arc::clone(instance),
                    peers.iter().cloned().collect(),
                    self.hostname.clone(),
                    Arc::clone(&self.transport),
                    self.settings.clone(),
                );
                sender.start();
                entry.sender = Some(sender);
            }
        }

        if peers_changed {
            entry.remote = (!peers.is_empty()).then(|| {
                Arc::new(RemoteRegistry::new(
                    name.clone(),
                    peers.iter().cloned().collect(),
                    Arc::clone(&self.transport),
                ))
            });
            entry.peers = Some(peers);
        }

        info!(
            vdb = %name,
            hosted,
            peers = entry.peers.as_ref().map_or(0, BTreeSet::len),
            "VDB configured"
        );
        Ok(())
    }

    fn open_store(&self, vdb: &str) -> RegistryResult<RegistryStore> {
        let store = match &self.location {
            StoreLocation::Directory(dir) => {
                std::fs::create_dir_all(dir).map_err(|e| {
                    RegistryError::permanent(format!(
                        "cannot create data directory {}: {e}",
                        dir.display()
                    ))
                })?;
                let path = dir.join(format!("{}.redb", vdb.to_lowercase()));
                RegistryStore::open(&path, vdb, Arc::clone(&self.schema))?
            }
            StoreLocation::InMemory => RegistryStore::open_in_memory(vdb, Arc::clone(&self.schema))?,
        };
        Ok(store.with_replication_lag(self.settings.replication_lag_secs))
    }

    /// Stop the VDB's instance and replication and forget it.
    pub async fn disable_vdb(&self, vdb: &str) -> RegistryResult<()> {
        self.check_online()?;
        let name = normalize_vdb_name(vdb);
        let mut entry = self
            .vdbs
            .write()
            .await
            .remove(&name)
            .ok_or_else(|| not_recognised(&name))?;
        entry.stop();
        info!(vdb = %name, "VDB disabled");
        Ok(())
    }

    /// Stop every VDB. Later calls fail with a temporary error.
    pub async fn shutdown(&self) {
        self.online.store(false, Ordering::SeqCst);
        let mut vdbs = self.vdbs.write().await;
        for (_, mut entry) in vdbs.drain() {
            entry.stop();
        }
        info!("registry service shut down");
    }

    pub async fn vdb_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.vdbs.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// The local instance of a VDB, if this node hosts it.
    pub async fn instance(&self, vdb: &str) -> Option<Arc<RegistryInstance>> {
        self.vdbs
            .read()
            .await
            .get(&normalize_vdb_name(vdb))
            .and_then(|e| e.instance.clone())
    }

    async fn route(&self, vdb: &str, can_forward: bool) -> RegistryResult<Route> {
        self.check_online()?;
        let name = normalize_vdb_name(vdb);
        let vdbs = self.vdbs.read().await;
        let entry = vdbs.get(&name).ok_or_else(|| not_recognised(&name))?;
        if let Some(instance) = &entry.instance {
            return Ok(Route::Local(Arc::clone(instance)));
        }
        if !can_forward {
            return Err(RegistryError::permanent(format!(
                "Forwarding of VDB: {name} is not permitted"
            )));
        }
        entry
            .remote
            .clone()
            .map(Route::Remote)
            .ok_or_else(|| RegistryError::permanent(format!("VDB: {name} has no replicas")))
    }

    // ── Registry operations ────────────────────────────────────────

    pub async fn register_producer_table(
        &self,
        vdb: &str,
        can_forward: bool,
        request: RegisterProducerRequest,
    ) -> RegistryResult<Vec<ConsumerEntry>> {
        match self.route(vdb, can_forward).await? {
            Route::Local(instance) => instance.register_producer_table(request.into()),
            Route::Remote(remote) => remote.register_producer_table(request).await,
        }
    }

    pub async fn unregister_producer_table(
        &self,
        vdb: &str,
        can_forward: bool,
        request: UnregisterProducerRequest,
    ) -> RegistryResult<()> {
        match self.route(vdb, can_forward).await? {
            Route::Local(instance) => {
                instance.unregister_producer_table(&request.table_name, &request.endpoint)
            }
            Route::Remote(remote) => remote.unregister_producer_table(request).await,
        }
    }

    pub async fn unregister_continuous_consumer(
        &self,
        vdb: &str,
        can_forward: bool,
        request: UnregisterConsumerRequest,
    ) -> RegistryResult<()> {
        match self.route(vdb, can_forward).await? {
            Route::Local(instance) => instance.unregister_continuous_consumer(&request.endpoint),
            Route::Remote(remote) => remote.unregister_continuous_consumer(request).await,
        }
    }

    /// Producers able to answer a consumer's query. The predicate is checked
    /// here, before any forwarding; a consumer being registered must use a
    /// simple predicate.
    pub async fn get_matching_producers_for_tables(
        &self,
        vdb: &str,
        can_forward: bool,
        request: MatchingProducersRequest,
    ) -> RegistryResult<Vec<ProducerEntry>> {
        if request.table_names.is_empty() {
            return Err(RegistryError::permanent("List of table names may not be empty"));
        }
        let predicate = ParsedPredicate::parse(&request.predicate)?;
        if request.consumer_endpoint.is_some() {
            predicate.check_simple()?;
        }
        match self.route(vdb, can_forward).await? {
            Route::Local(instance) => instance.get_matching_producers_for_tables(&request),
            Route::Remote(remote) => remote.get_matching_producers_for_tables(request).await,
        }
    }

    pub async fn get_all_producers_for_table(
        &self,
        vdb: &str,
        can_forward: bool,
        table_name: &str,
    ) -> RegistryResult<Vec<ProducerEntry>> {
        match self.route(vdb, can_forward).await? {
            Route::Local(instance) => instance.get_all_producers_for_table(table_name),
            Route::Remote(remote) => remote.get_all_producers_for_table(table_name).await,
        }
    }

    /// Run a forwarded call.
    pub async fn execute(
        &self,
        vdb: &str,
        call: RegistryCall,
        can_forward: bool,
    ) -> RegistryResult<CallReply> {
        Ok(match call {
            RegistryCall::RegisterProducer(req) => {
                CallReply::Consumers(self.register_producer_table(vdb, can_forward, req).await?)
            }
            RegistryCall::UnregisterProducer(req) => {
                self.unregister_producer_table(vdb, can_forward, req).await?;
                CallReply::Done
            }
            RegistryCall::UnregisterConsumer(req) => {
                self.unregister_continuous_consumer(vdb, can_forward, req).await?;
                CallReply::Done
            }
            RegistryCall::MatchingProducers(req) => CallReply::Producers(
                self.get_matching_producers_for_tables(vdb, can_forward, req).await?,
            ),
            RegistryCall::AllProducersForTable { table_name } => CallReply::Producers(
                self.get_all_producers_for_table(vdb, can_forward, &table_name).await?,
            ),
        })
    }

    /// Apply a replication message from a peer to the local instance of its
    /// VDB. Accepted whether or not the instance is online yet.
    pub async fn add_replica(&self, message: ReplicationMessage) -> RegistryResult<ReplicaOutcome> {
        self.check_online()?;
        let name = normalize_vdb_name(&message.vdb_name);
        let instance = self
            .vdbs
            .read()
            .await
            .get(&name)
            .and_then(|e| e.instance.clone())
            .ok_or_else(|| RegistryError::permanent(format!("No VDB named {name} locally.")))?;
        let outcome = instance.add_replica(&message)?;
        debug!(
            vdb = %name,
            peer = %message.origin_host,
            entries = message.entry_count(),
            ?outcome,
            "replication message received"
        );
        Ok(outcome)
    }

    /// Succeeds when this node hosts the VDB and its instance is online.
    pub async fn ping(&self, vdb: &str) -> RegistryResult<()> {
        self.check_online()?;
        let name = normalize_vdb_name(vdb);
        let instance = self.instance(&name).await.ok_or_else(|| {
            RegistryError::permanent(format!("No VDB named {name} locally."))
        })?;
        if instance.is_online() {
            Ok(())
        } else {
            Err(RegistryError::temporary(format!(
                "No replica online for VDB: {name}"
            )))
        }
    }

    /// Operational status documents: `resources`, `status`, `table_status`
    /// and `host_status`.
    pub async fn get_property(&self, name: &str, param: Option<&str>) -> RegistryResult<serde_json::Value> {
        self.check_online()?;
        let vdbs = self.vdbs.read().await;
        let now = epoch_secs();
        let doc = match name.to_ascii_lowercase().as_str() {
            "resources" => status::to_json(&status::resources(&self.settings, &vdbs))?,
            "status" => {
                let entry = lookup(&vdbs, required(name, param)?)?;
                status::to_json(&status::vdb_status(entry, now)?)?
            }
            "table_status" => {
                let (vdb, table) = split_param(name, param)?;
                let entry = lookup(&vdbs, vdb)?;
                status::to_json(&status::table_status(entry, table)?)?
            }
            "host_status" => {
                let (vdb, host) = split_param(name, param)?;
                let entry = lookup(&vdbs, vdb)?;
                status::to_json(&status::host_status(entry, host)?)?
            }
            _ => return Err(RegistryError::permanent(format!("Unknown property: {name}"))),
        };
        Ok(doc)
    }
}

fn not_recognised(name: &str) -> RegistryError {
    RegistryError::permanent(format!("VDB: {name} is not recognised by this server"))
}

fn lookup<'a>(vdbs: &'a HashMap<String, VdbEntry>, vdb: &str) -> RegistryResult<&'a VdbEntry> {
    let name = normalize_vdb_name(vdb);
    vdbs.get(&name).ok_or_else(|| not_recognised(&name))
}

fn required<'a>(property: &str, param: Option<&'a str>) -> RegistryResult<&'a str> {
    param
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| RegistryError::permanent(format!("Property {property} needs a parameter")))
}

/// `"VDB value"` -> `("VDB", "value")`.
fn split_param<'a>(property: &str, param: Option<&'a str>) -> RegistryResult<(&'a str, &'a str)> {
    required(property, param)?
        .split_once(' ')
        .map(|(vdb, rest)| (vdb, rest.trim()))
        .ok_or_else(|| {
            RegistryError::permanent(format!(
                "Property {property} needs a parameter of the form 'VDB name'"
            ))
        })
}
