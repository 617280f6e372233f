//! One VDB's registry on this node: the store plus lifecycle, delta log,
//! and the background tasks that keep it tidy.
//!
//! An instance starts in [`InstanceState::Starting`] and refuses registry
//! calls until the readiness timer has fired and at least one cleanup
//! pass has completed. Replication is accepted in every state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use gridreg_core::wire::MatchingProducersRequest;
use gridreg_core::{
    ConsumerEntry, ProducerEntry, ProducerKey, ProducerRegistration, Registration,
    RegistrationRef, RegistryError, RegistryResult, RegistrySettings, ReplicaOutcome,
    ReplicationLogEntry, ReplicationMessage, ResourceEndpoint, epoch_secs,
};
use gridreg_store::{PurgeStats, RegistryStore};

use crate::cleanup;
use crate::lock;
use crate::replication;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Starting,
    Online,
    Offline,
}

/// State shared between the instance and its background tasks.
pub(crate) struct Lifecycle {
    pub(crate) vdb: String,
    state: watch::Sender<InstanceState>,
    cleaned: watch::Sender<bool>,
}

impl Lifecycle {
    fn new(vdb: &str) -> Self {
        Self {
            vdb: vdb.to_string(),
            state: watch::channel(InstanceState::Starting).0,
            cleaned: watch::channel(false).0,
        }
    }

    pub(crate) fn mark_cleaned(&self) {
        self.cleaned.send_if_modified(|done| !std::mem::replace(done, true));
    }

    /// Starting -> Online. Returns false if the instance was not starting.
    fn go_online(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == InstanceState::Starting {
                *state = InstanceState::Online;
                true
            } else {
                false
            }
        })
    }
}

pub struct RegistryInstance {
    vdb: String,
    store: RegistryStore,
    settings: RegistrySettings,
    lifecycle: Arc<Lifecycle>,
    delta_log: Mutex<HashMap<String, ReplicationLogEntry>>,
    full_snapshot: Mutex<Option<Arc<ReplicationMessage>>>,
    replica_lock: Mutex<()>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl RegistryInstance {
    pub fn new(store: RegistryStore, settings: RegistrySettings) -> Arc<Self> {
        let vdb = store.vdb_name().to_string();
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            lifecycle: Arc::new(Lifecycle::new(&vdb)),
            vdb,
            store,
            settings,
            delta_log: Mutex::new(HashMap::new()),
            full_snapshot: Mutex::new(None),
            replica_lock: Mutex::new(()),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        })
    }

    /// Spawn the cleanup loop and the readiness timer. Calling this more
    /// than once has no effect.
    pub fn start(&self, has_peers: bool) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let delay = self.settings.ready_delay(has_peers);
        info!(vdb = %self.vdb, has_peers, delay_ms = delay.as_millis() as u64, "registry instance starting");

        let cleanup = tokio::spawn(cleanup::run_cleanup_loop(
            self.store.clone(),
            Arc::clone(&self.lifecycle),
            self.settings.cleanup_interval(),
            self.shutdown_tx.subscribe(),
        ));
        let readiness = tokio::spawn(run_readiness_timer(
            Arc::clone(&self.lifecycle),
            delay,
            self.shutdown_tx.subscribe(),
        ));
        lock(&self.tasks).extend([cleanup, readiness]);
    }

    /// Stop the background tasks and take the instance offline for good.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
        self.lifecycle.state.send_replace(InstanceState::Offline);
        info!(vdb = %self.vdb, "registry instance shut down");
    }

    pub fn vdb_name(&self) -> &str {
        &self.vdb
    }

    pub fn store(&self) -> &RegistryStore {
        &self.store
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    pub fn state(&self) -> InstanceState {
        *self.lifecycle.state.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.state() == InstanceState::Online
    }

    pub fn subscribe(&self) -> watch::Receiver<InstanceState> {
        self.lifecycle.state.subscribe()
    }

    /// Wait until the instance is online. Returns false if it went offline
    /// first or does not get there within `timeout`.
    pub async fn wait_online(&self, timeout: Duration) -> bool {
        let mut rx = self.subscribe();
        let reached = tokio::time::timeout(
            timeout,
            rx.wait_for(|s| *s != InstanceState::Starting),
        )
        .await;
        matches!(reached, Ok(Ok(state)) if *state == InstanceState::Online)
    }

    fn check_online(&self) -> RegistryResult<()> {
        if self.is_online() {
            Ok(())
        } else {
            Err(RegistryError::temporary(format!(
                "VDB {} is currently offline.",
                self.vdb
            )))
        }
    }

    /// Run one cleanup pass now, outside the periodic loop.
    pub fn cleanup_now(&self, now: u64) -> Option<PurgeStats> {
        cleanup::cleanup_pass(&self.store, &self.lifecycle, now)
    }

    // ── Registry operations ────────────────────────────────────────

    /// Register (or refresh) a producer; returns the continuous consumers
    /// it should stream to.
    pub fn register_producer_table(
        &self,
        producer: ProducerRegistration,
    ) -> RegistryResult<Vec<ConsumerEntry>> {
        self.check_online()?;
        let now = epoch_secs();
        self.store
            .add_registration(&Registration::Producer(producer.clone()), true, None, now)?;
        let consumers = self.store.get_consumers_matching_predicate(&producer, now)?;
        debug!(
            vdb = %self.vdb,
            table = %producer.table_name,
            endpoint = %producer.endpoint,
            consumers = consumers.len(),
            "producer registered"
        );
        self.record(ReplicationLogEntry::ProducerAdded(producer));
        Ok(consumers)
    }

    pub fn unregister_producer_table(
        &self,
        table_name: &str,
        endpoint: &ResourceEndpoint,
    ) -> RegistryResult<()> {
        self.check_online()?;
        let key = ProducerKey::new(table_name, endpoint.clone());
        let removed = self
            .store
            .delete_registration(&RegistrationRef::Producer(key.clone()))?;
        debug!(vdb = %self.vdb, table = %table_name, %endpoint, removed, "producer unregistered");
        self.record(ReplicationLogEntry::ProducerRemoved(key));
        Ok(())
    }

    pub fn unregister_continuous_consumer(&self, endpoint: &ResourceEndpoint) -> RegistryResult<()> {
        self.check_online()?;
        let removed = self.store.delete_registration(&RegistrationRef::Consumer {
            endpoint: endpoint.clone(),
        })?;
        debug!(vdb = %self.vdb, %endpoint, removed, "consumer unregistered");
        self.record(ReplicationLogEntry::ConsumerRemoved {
            endpoint: endpoint.clone(),
        });
        Ok(())
    }

    /// Producers able to answer the consumer's query. When the request
    /// names a consumer endpoint the consumer is registered too.
    pub fn get_matching_producers_for_tables(
        &self,
        request: &MatchingProducersRequest,
    ) -> RegistryResult<Vec<ProducerEntry>> {
        self.check_online()?;
        let now = epoch_secs();
        if let Some(consumer) = request.consumer_registration() {
            self.store
                .add_registration(&Registration::Consumer(consumer.clone()), true, None, now)?;
            debug!(vdb = %self.vdb, table = %consumer.table_name, endpoint = %consumer.endpoint, "consumer registered");
            self.record(ReplicationLogEntry::ConsumerAdded(consumer));
        }
        let producers = self.store.get_producers_matching_predicate(
            &request.table_names,
            &request.predicate,
            &request.query,
            request.is_secondary,
            now,
        )?;
        debug!(vdb = %self.vdb, tables = ?request.table_names, producers = producers.len(), "matching producers found");
        Ok(producers)
    }

    pub fn get_all_producers_for_table(&self, table_name: &str) -> RegistryResult<Vec<ProducerEntry>> {
        self.check_online()?;
        Ok(self.store.get_all_producers_for_table(table_name, epoch_secs())?)
    }

    // ── Replication ────────────────────────────────────────────────

    fn record(&self, entry: ReplicationLogEntry) {
        let mut log = lock(&self.delta_log);
        log.insert(entry.replica_key(), entry);
    }

    /// Take the changes recorded since the last call and start a fresh
    /// log. Also drops the cached full snapshot.
    pub fn switch_replica_table(&self) -> Vec<ReplicationLogEntry> {
        let entries: Vec<_> = std::mem::take(&mut *lock(&self.delta_log))
            .into_values()
            .collect();
        *lock(&self.full_snapshot) = None;
        entries
    }

    /// Number of changes waiting for the next replication cycle.
    pub fn pending_changes(&self) -> usize {
        lock(&self.delta_log).len()
    }

    /// Full snapshot of this replica's master rows, built at most once per
    /// replication cycle.
    pub fn get_full_update_records(
        &self,
        now: u64,
        origin_host: &str,
    ) -> RegistryResult<Arc<ReplicationMessage>> {
        let cached = lock(&self.full_snapshot)
            .as_ref()
            .filter(|m| m.current_timestamp == now && m.origin_host == origin_host)
            .cloned();
        if let Some(snapshot) = cached {
            return Ok(snapshot);
        }
        let snapshot = Arc::new(self.store.get_full_update_records(now, origin_host)?);
        debug!(
            vdb = %self.vdb,
            producers = snapshot.producers_added.len(),
            consumers = snapshot.consumers_added.len(),
            "full snapshot built"
        );
        *lock(&self.full_snapshot) = Some(Arc::clone(&snapshot));
        Ok(snapshot)
    }

    /// Apply a replication message from a peer. Messages are applied one
    /// at a time.
    pub fn add_replica(&self, message: &ReplicationMessage) -> RegistryResult<ReplicaOutcome> {
        let _serial = lock(&self.replica_lock);
        Ok(replication::apply_replica(&self.store, message, epoch_secs())?)
    }
}

impl Drop for RegistryInstance {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn run_readiness_timer(
    lifecycle: Arc<Lifecycle>,
    delay: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        _ = shutdown.changed() => return,
    }

    let mut cleaned = lifecycle.cleaned.subscribe();
    if !*cleaned.borrow() {
        warn!(vdb = %lifecycle.vdb, "waiting for first cleanup pass before going online");
    }
    tokio::select! {
        done = cleaned.wait_for(|c| *c) => {
            if done.is_ok() && lifecycle.go_online() {
                info!(vdb = %lifecycle.vdb, "registry instance online");
            }
        }
        _ = shutdown.changed() => {}
    }
}
