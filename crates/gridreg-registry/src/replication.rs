//! Timestamp-versioned replication between the replicas of a VDB.
//!
//! Every replication interval the sender drains the instance's delta log
//! into one incremental message (`previous_timestamp` = the last cycle's
//! timestamp) and pushes it to each peer on its own task. A peer that
//! missed a message answers [`ReplicaOutcome::GapNeedsFullSync`], and the
//! task follows up with a full snapshot (`previous_timestamp == 0`) which
//! the peer uses to replace everything it holds from this origin.
//!
//! ```text
//! run_cycle(now)
//!   ├─ switch_replica_table()        → delta entries
//!   ├─ swap last_sent ← now          → previous
//!   └─ per peer: abort old task, spawn send_task
//!          incremental ─ gap? ─▶ full snapshot
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

use gridreg_core::{
    RegistrationRef, Registration, RegistryError, RegistrySettings, ReplicaOutcome,
    ReplicationMessage, epoch_secs, registration_key,
};
use gridreg_store::{RegistryStore, StoreResult};

use crate::instance::RegistryInstance;
use crate::lock;
use crate::transport::{PeerTransport, TransportError};

// ── Receiving ──────────────────────────────────────────────────────

/// Apply a replication message to the store.
///
/// A full snapshot replaces every row previously received from the origin.
/// An incremental message applies only if its `previous_timestamp` equals
/// the last timestamp stored for the origin; the stored timestamp moves
/// forward only when the whole message has been applied.
pub fn apply_replica(
    store: &RegistryStore,
    message: &ReplicationMessage,
    now: u64,
) -> StoreResult<ReplicaOutcome> {
    let origin = message.origin_host.as_str();
    let stored = store.last_replication_time(origin)?;
    let previous = message.previous_timestamp;

    if message.is_full_snapshot() {
        let mut stale_producers = store.producers_from_remote(origin)?;
        let mut stale_consumers = store.consumers_from_remote(origin)?;
        let mut current = HashSet::new();
        for p in &message.producers_added {
            store.add_registration(&Registration::Producer(p.clone()), false, Some(origin), now)?;
            current.insert(registration_key(&p.table_name, &p.endpoint));
        }
        stale_producers.retain(|k| !current.contains(&registration_key(&k.table_name, &k.endpoint)));
        for c in &message.consumers_added {
            store.add_registration(&Registration::Consumer(c.clone()), false, Some(origin), now)?;
            stale_consumers.remove(&c.endpoint);
        }
        let removed = stale_producers.len() + stale_consumers.len();
        for key in stale_producers {
            store.delete_registration(&RegistrationRef::Producer(key))?;
        }
        for endpoint in stale_consumers {
            store.delete_registration(&RegistrationRef::Consumer { endpoint })?;
        }
        info!(
            vdb = %message.vdb_name,
            peer = %origin,
            entries = message.entry_count(),
            removed,
            "full replication snapshot applied"
        );
    } else if stored == previous {
        for p in &message.producers_added {
            store.add_registration(&Registration::Producer(p.clone()), false, Some(origin), now)?;
        }
        for c in &message.consumers_added {
            store.add_registration(&Registration::Consumer(c.clone()), false, Some(origin), now)?;
        }
        for key in &message.producers_removed {
            store.delete_registration(&RegistrationRef::Producer(key.clone()))?;
        }
        for endpoint in &message.consumers_removed {
            store.delete_registration(&RegistrationRef::Consumer {
                endpoint: endpoint.clone(),
            })?;
        }
        debug!(
            vdb = %message.vdb_name,
            peer = %origin,
            entries = message.entry_count(),
            "incremental replication applied"
        );
    } else if stored < previous {
        warn!(
            vdb = %message.vdb_name,
            peer = %origin,
            stored,
            previous,
            "replication message missed; full snapshot needed"
        );
        return Ok(ReplicaOutcome::GapNeedsFullSync);
    } else {
        warn!(
            vdb = %message.vdb_name,
            peer = %origin,
            stored,
            previous,
            "late replication message ignored"
        );
        return Ok(ReplicaOutcome::StaleIgnored);
    }

    store.set_last_replication_time(origin, message.current_timestamp)?;
    Ok(ReplicaOutcome::Accepted)
}

// ── Sending ────────────────────────────────────────────────────────

/// Why a send task gave up on a peer for this cycle.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("cannot build full snapshot: {0}")]
    Snapshot(RegistryError),
}

/// What a send task achieved, as shown in status output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SendState {
    Running,
    Delivered { full: bool, outcome: ReplicaOutcome },
    Failed { error: String },
    /// Replaced by the next cycle's task before it finished.
    Superseded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendTaskStatus {
    pub peer: String,
    pub cycle_timestamp: u64,
    pub max_attempts: u32,
    pub max_run_time_secs: u64,
    pub attempts: u32,
    pub state: SendState,
}

struct SendSlot {
    abort: AbortHandle,
    status: Arc<Mutex<SendTaskStatus>>,
}

struct SenderShared {
    instance: Arc<RegistryInstance>,
    peers: Vec<String>,
    hostname: String,
    transport: Arc<dyn PeerTransport>,
    settings: RegistrySettings,
    last_sent: AtomicU64,
    slots: Mutex<HashMap<String, SendSlot>>,
}

/// Pushes one instance's changes to its peers every replication interval.
pub struct ReplicationSender {
    shared: Arc<SenderShared>,
    shutdown_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ReplicationSender {
    pub fn new(
        instance: Arc<RegistryInstance>,
        peers: Vec<String>,
        hostname: impl Into<String>,
        transport: Arc<dyn PeerTransport>,
        settings: RegistrySettings,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shared: Arc::new(SenderShared {
                instance,
                peers,
                hostname: hostname.into(),
                transport,
                settings,
                last_sent: AtomicU64::new(0),
                slots: Mutex::new(HashMap::new()),
            }),
            shutdown_tx,
            handle: Mutex::new(None),
        }
    }

    /// Spawn the periodic loop. The first cycle runs immediately.
    pub fn start(&self) {
        let mut handle = lock(&self.handle);
        if handle.is_some() {
            return;
        }
        *handle = Some(tokio::spawn(run_replication_loop(
            Arc::clone(&self.shared),
            self.shutdown_tx.subscribe(),
        )));
    }

    /// Run one cycle now. Returns the spawned send tasks.
    pub fn run_cycle(&self, now: u64) -> Vec<JoinHandle<()>> {
        self.shared.run_cycle(now)
    }

    pub fn peers(&self) -> &[String] {
        &self.shared.peers
    }

    /// Timestamp of the last cycle, 0 before the first.
    pub fn last_sent(&self) -> u64 {
        self.shared.last_sent.load(Ordering::SeqCst)
    }

    pub fn task_status(&self, peer: &str) -> Option<SendTaskStatus> {
        lock(&self.shared.slots)
            .get(peer)
            .map(|slot| lock(&slot.status).clone())
    }

    /// Stop the loop and abort every outstanding send task.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = lock(&self.handle).take() {
            handle.abort();
        }
        for (_, slot) in lock(&self.shared.slots).drain() {
            slot.abort.abort();
        }
        debug!(vdb = %self.shared.instance.vdb_name(), "replication sender stopped");
    }
}

impl Drop for ReplicationSender {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl SenderShared {
    fn run_cycle(self: &Arc<Self>, now: u64) -> Vec<JoinHandle<()>> {
        let entries = self.instance.switch_replica_table();
        let previous = self.last_sent.swap(now, Ordering::SeqCst);

        // Before the first cycle every peer gets a full snapshot; changes
        // logged until then are part of it.
        let message = (previous != 0).then(|| {
            Arc::new(ReplicationMessage::incremental(
                self.instance.vdb_name(),
                &self.hostname,
                now,
                previous,
                entries,
            ))
        });
        debug!(
            vdb = %self.instance.vdb_name(),
            now,
            previous,
            entries = message.as_ref().map_or(0, |m| m.entry_count()),
            full = message.is_none(),
            "replication cycle"
        );

        self.peers
            .iter()
            .map(|peer| self.spawn_send(peer, message.clone(), now))
            .collect()
    }

    fn spawn_send(
        self: &Arc<Self>,
        peer: &str,
        message: Option<Arc<ReplicationMessage>>,
        now: u64,
    ) -> JoinHandle<()> {
        let status = Arc::new(Mutex::new(SendTaskStatus {
            peer: peer.to_string(),
            cycle_timestamp: now,
            max_attempts: self.settings.max_send_attempts,
            max_run_time_secs: self.settings.max_task_time_secs,
            attempts: 0,
            state: SendState::Running,
        }));

        let mut slots = lock(&self.slots);
        if let Some(old) = slots.remove(peer) {
            old.abort.abort();
            let mut old_status = lock(&old.status);
            if old_status.state == SendState::Running {
                debug!(%peer, cycle = old_status.cycle_timestamp, "previous send task superseded");
                old_status.state = SendState::Superseded;
            }
        }

        let shared = Arc::clone(self);
        let task_peer = peer.to_string();
        let task_status = Arc::clone(&status);
        let handle = tokio::spawn(async move {
            shared.send_task(&task_peer, message, now, &task_status).await;
        });
        slots.insert(
            peer.to_string(),
            SendSlot {
                abort: handle.abort_handle(),
                status,
            },
        );
        handle
    }

    async fn send_task(
        &self,
        peer: &str,
        message: Option<Arc<ReplicationMessage>>,
        now: u64,
        status: &Mutex<SendTaskStatus>,
    ) {
        let vdb = self.instance.vdb_name();
        let delivery = tokio::time::timeout(
            self.settings.max_task_time(),
            self.deliver(peer, message.as_deref(), now, status),
        )
        .await;

        let state = match delivery {
            Ok(Ok((full, outcome))) => {
                debug!(%vdb, %peer, full, ?outcome, "replication delivered");
                SendState::Delivered { full, outcome }
            }
            Ok(Err(e)) => {
                warn!(%vdb, %peer, error = %e, "replication to peer failed; next cycle will retry");
                SendState::Failed {
                    error: e.to_string(),
                }
            }
            Err(_) => {
                warn!(
                    %vdb,
                    %peer,
                    max_run_time_secs = self.settings.max_task_time_secs,
                    "replication to peer timed out"
                );
                SendState::Failed {
                    error: format!(
                        "exceeded maximum run time of {}s",
                        self.settings.max_task_time_secs
                    ),
                }
            }
        };
        lock(status).state = state;
    }

    /// Up to `max_send_attempts` tries, backing off between retryable
    /// transport failures. Returns whether a full snapshot was needed.
    async fn deliver(
        &self,
        peer: &str,
        message: Option<&ReplicationMessage>,
        now: u64,
        status: &Mutex<SendTaskStatus>,
    ) -> Result<(bool, ReplicaOutcome), DeliveryError> {
        let max_attempts = self.settings.max_send_attempts.max(1);
        let mut attempt = 1;
        loop {
            lock(status).attempts = attempt;
            match self.attempt(peer, message, now).await {
                Err(DeliveryError::Transport(e)) if e.is_retryable() && attempt < max_attempts => {
                    debug!(%peer, attempt, error = %e, "replication attempt failed; backing off");
                    tokio::time::sleep(self.settings.retry_backoff()).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn attempt(
        &self,
        peer: &str,
        message: Option<&ReplicationMessage>,
        now: u64,
    ) -> Result<(bool, ReplicaOutcome), DeliveryError> {
        if let Some(message) = message {
            match self.transport.send_replica(peer, message).await? {
                ReplicaOutcome::GapNeedsFullSync => {
                    debug!(%peer, "peer missed an update; sending full snapshot");
                }
                outcome => return Ok((false, outcome)),
            }
        }
        let snapshot = self
            .instance
            .get_full_update_records(now, &self.hostname)
            .map_err(DeliveryError::Snapshot)?;
        let outcome = self.transport.send_replica(peer, &snapshot).await?;
        Ok((true, outcome))
    }
}

async fn run_replication_loop(shared: Arc<SenderShared>, mut shutdown: watch::Receiver<bool>) {
    let interval = shared.settings.replication_interval();
    info!(
        vdb = %shared.instance.vdb_name(),
        peers = ?shared.peers,
        interval_secs = interval.as_secs(),
        "replication loop starting"
    );
    loop {
        shared.run_cycle(epoch_secs());

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {
                debug!(vdb = %shared.instance.vdb_name(), "replication loop shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use gridreg_core::{
        ConsumerRegistration, ProducerKey, ProducerRegistration, ProducerType, QueryProperties,
        ResourceEndpoint, StaticSchema,
    };

    use crate::transport::{BoxFuture, CallReply, RegistryCall};

    fn store() -> RegistryStore {
        RegistryStore::open_in_memory("CMS", Arc::new(StaticSchema::new()))
            .unwrap()
            .with_replication_lag(60)
    }

    fn producer(id: i64) -> ProducerRegistration {
        ProducerRegistration {
            table_name: "cpuLoad".into(),
            endpoint: ResourceEndpoint::new("http://p.example.org/Producer", id),
            predicate: String::new(),
            termination_interval_secs: 600,
            producer_type: ProducerType {
                is_continuous: true,
                ..Default::default()
            },
            history_retention_secs: 0,
        }
    }

    fn consumer(id: i64) -> ConsumerRegistration {
        ConsumerRegistration {
            table_name: "cpuLoad".into(),
            endpoint: ResourceEndpoint::new("http://c.example.org/Consumer", id),
            predicate: String::new(),
            termination_interval_secs: 600,
            query: QueryProperties::continuous(),
            is_secondary: false,
        }
    }

    fn snapshot(ts: u64, producers: &[i64]) -> ReplicationMessage {
        let mut msg = ReplicationMessage::new("CMS", "reg1", ts, 0);
        msg.producers_added = producers.iter().map(|id| producer(*id)).collect();
        msg
    }

    fn delta(ts: u64, prev: u64, added: &[i64], removed: &[i64]) -> ReplicationMessage {
        let mut msg = ReplicationMessage::new("CMS", "reg1", ts, prev);
        msg.producers_added = added.iter().map(|id| producer(*id)).collect();
        msg.producers_removed = removed
            .iter()
            .map(|id| ProducerKey::new("cpuLoad", producer(*id).endpoint))
            .collect();
        msg
    }

    fn producer_ids(store: &RegistryStore) -> Vec<i64> {
        let mut ids: Vec<i64> = store
            .producers_from_remote("reg1")
            .unwrap()
            .into_iter()
            .map(|k| k.endpoint.id)
            .collect();
        ids.sort();
        ids
    }

    #[test]
    fn full_snapshot_replaces_rows_from_origin() {
        let store = store();
        store
            .add_registration(&Registration::Producer(producer(9)), true, None, 1_000)
            .unwrap();
        assert_eq!(
            apply_replica(&store, &snapshot(100, &[1, 2]), 1_000).unwrap(),
            ReplicaOutcome::Accepted
        );
        assert_eq!(producer_ids(&store), vec![1, 2]);

        apply_replica(&store, &snapshot(200, &[2, 3]), 1_000).unwrap();
        assert_eq!(producer_ids(&store), vec![2, 3]);
        assert_eq!(store.last_replication_time("reg1").unwrap(), 200);
        // Master rows are untouched.
        assert_eq!(store.registered_producer_count(true).unwrap(), 1);
    }

    #[test]
    fn full_snapshot_matches_rows_regardless_of_table_case() {
        let store = store();
        apply_replica(&store, &snapshot(100, &[1]), 1_000).unwrap();

        let mut renamed = snapshot(200, &[]);
        let mut p = producer(1);
        p.table_name = "CPULOAD".into();
        renamed.producers_added = vec![p];
        apply_replica(&store, &renamed, 1_000).unwrap();

        assert_eq!(producer_ids(&store), vec![1]);
        assert_eq!(store.registered_producer_count(false).unwrap(), 1);
    }

    #[test]
    fn full_snapshot_removes_vanished_consumers() {
        let store = store();
        let mut first = snapshot(100, &[]);
        first.consumers_added = vec![consumer(1), consumer(2)];
        apply_replica(&store, &first, 1_000).unwrap();

        let mut second = snapshot(200, &[]);
        second.consumers_added = vec![consumer(2)];
        apply_replica(&store, &second, 1_000).unwrap();

        let remaining = store.consumers_from_remote("reg1").unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(remaining.contains(&consumer(2).endpoint));
    }

    #[test]
    fn consecutive_deltas_apply() {
        let store = store();
        apply_replica(&store, &snapshot(100, &[1]), 1_000).unwrap();
        assert_eq!(
            apply_replica(&store, &delta(160, 100, &[2], &[1]), 1_000).unwrap(),
            ReplicaOutcome::Accepted
        );
        assert_eq!(producer_ids(&store), vec![2]);
        assert_eq!(store.last_replication_time("reg1").unwrap(), 160);
    }

    #[test]
    fn missed_delta_is_a_gap() {
        let store = store();
        apply_replica(&store, &snapshot(100, &[1]), 1_000).unwrap();
        assert_eq!(
            apply_replica(&store, &delta(220, 160, &[2], &[]), 1_000).unwrap(),
            ReplicaOutcome::GapNeedsFullSync
        );
        assert_eq!(producer_ids(&store), vec![1]);
        assert_eq!(store.last_replication_time("reg1").unwrap(), 100);
    }

    #[test]
    fn unknown_origin_needs_full_sync() {
        let store = store();
        assert_eq!(
            apply_replica(&store, &delta(160, 100, &[1], &[]), 1_000).unwrap(),
            ReplicaOutcome::GapNeedsFullSync
        );
        assert!(producer_ids(&store).is_empty());
    }

    #[test]
    fn duplicate_delta_is_ignored() {
        let store = store();
        apply_replica(&store, &snapshot(100, &[1]), 1_000).unwrap();
        let msg = delta(160, 100, &[2], &[]);
        apply_replica(&store, &msg, 1_000).unwrap();
        assert_eq!(
            apply_replica(&store, &msg, 1_000).unwrap(),
            ReplicaOutcome::StaleIgnored
        );
        assert_eq!(store.last_replication_time("reg1").unwrap(), 160);
    }

    #[test]
    fn replicated_rows_carry_lag() {
        let store = store();
        apply_replica(&store, &snapshot(100, &[1]), 1_000).unwrap();
        let row = store
            .get_registration(&Registration::Producer(producer(1)))
            .unwrap()
            .unwrap();
        assert!(!row.is_master);
        assert_eq!(row.effective_termination_secs, 660);
        assert_eq!(row.origin_host.as_deref(), Some("reg1"));
    }

    // ── Sender ─────────────────────────────────────────────────────

    /// Records what was sent and answers from a script.
    struct ScriptedPeer {
        sent: Mutex<Vec<ReplicationMessage>>,
        replies: Mutex<Vec<Result<ReplicaOutcome, TransportError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedPeer {
        fn new(replies: Vec<Result<ReplicaOutcome, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                replies: Mutex::new(replies),
                calls: AtomicUsize::new(0),
            })
        }

        fn sent(&self) -> Vec<ReplicationMessage> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl PeerTransport for ScriptedPeer {
        fn send_replica<'a>(
            &'a self,
            _peer: &'a str,
            message: &'a ReplicationMessage,
        ) -> BoxFuture<'a, Result<ReplicaOutcome, TransportError>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                self.sent.lock().unwrap().push(message.clone());
                let mut replies = self.replies.lock().unwrap();
                if replies.is_empty() {
                    Ok(ReplicaOutcome::Accepted)
                } else {
                    replies.remove(0)
                }
            })
        }

        fn forward<'a>(
            &'a self,
            peer: &'a str,
            _vdb: &'a str,
            _call: &'a RegistryCall,
        ) -> BoxFuture<'a, Result<CallReply, TransportError>> {
            Box::pin(async move {
                Err(TransportError::Connect {
                    peer: peer.to_string(),
                    message: "not scripted".into(),
                })
            })
        }
    }

    fn settings() -> RegistrySettings {
        RegistrySettings {
            standalone_ready_delay_ms: 0,
            retry_backoff_ms: 1,
            max_task_time_secs: 5,
            ..Default::default()
        }
    }

    async fn sender_with(peer: Arc<ScriptedPeer>) -> (Arc<RegistryInstance>, ReplicationSender) {
        let instance = RegistryInstance::new(store(), settings());
        instance.start(false);
        assert!(instance.wait_online(Duration::from_secs(5)).await);
        let sender = ReplicationSender::new(
            Arc::clone(&instance),
            vec!["http://reg2:8443".into()],
            "reg1",
            peer,
            settings(),
        );
        (instance, sender)
    }

    async fn cycle(sender: &ReplicationSender, now: u64) {
        for handle in sender.run_cycle(now) {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn first_cycle_sends_full_snapshot_then_deltas() {
        let peer = ScriptedPeer::new(vec![]);
        let (instance, sender) = sender_with(Arc::clone(&peer)).await;
        instance.register_producer_table(producer(1)).unwrap();

        cycle(&sender, 100).await;
        instance.register_producer_table(producer(2)).unwrap();
        cycle(&sender, 160).await;

        let sent = peer.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].is_full_snapshot());
        assert_eq!(sent[0].producers_added.len(), 1);
        assert_eq!(sent[1].previous_timestamp, 100);
        assert_eq!(sent[1].current_timestamp, 160);
        assert_eq!(sent[1].producers_added, vec![producer(2)]);
        assert_eq!(sender.last_sent(), 160);

        let status = sender.task_status("http://reg2:8443").unwrap();
        assert_eq!(
            status.state,
            SendState::Delivered {
                full: false,
                outcome: ReplicaOutcome::Accepted
            }
        );
    }

    #[tokio::test]
    async fn gap_triggers_full_snapshot() {
        let peer = ScriptedPeer::new(vec![
            Ok(ReplicaOutcome::Accepted),
            Ok(ReplicaOutcome::GapNeedsFullSync),
        ]);
        let (instance, sender) = sender_with(Arc::clone(&peer)).await;
        cycle(&sender, 100).await;
        instance.register_producer_table(producer(1)).unwrap();
        cycle(&sender, 160).await;

        let sent = peer.sent();
        assert_eq!(sent.len(), 3);
        assert!(!sent[1].is_full_snapshot());
        assert!(sent[2].is_full_snapshot());
        assert_eq!(sent[2].current_timestamp, 160);
        assert_eq!(sent[2].producers_added, vec![producer(1)]);
        assert!(matches!(
            sender.task_status("http://reg2:8443").unwrap().state,
            SendState::Delivered { full: true, .. }
        ));
    }

    #[tokio::test]
    async fn retryable_failures_are_retried_up_to_the_limit() {
        let unreachable = || {
            Err(TransportError::Connect {
                peer: "reg2".into(),
                message: "connection refused".into(),
            })
        };
        let peer = ScriptedPeer::new(vec![unreachable(), unreachable(), unreachable()]);
        let (_instance, sender) = sender_with(Arc::clone(&peer)).await;
        cycle(&sender, 100).await;

        assert_eq!(peer.calls.load(Ordering::SeqCst), 2);
        let status = sender.task_status("http://reg2:8443").unwrap();
        assert_eq!(status.attempts, 2);
        assert!(matches!(status.state, SendState::Failed { .. }));
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let peer = ScriptedPeer::new(vec![Err(TransportError::Remote(RegistryError::permanent(
            "VDB CMS is not hosted here",
        )))]);
        let (_instance, sender) = sender_with(Arc::clone(&peer)).await;
        cycle(&sender, 100).await;
        assert_eq!(peer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn new_cycle_supersedes_running_task() {
        struct Stuck;
        impl PeerTransport for Stuck {
            fn send_replica<'a>(
                &'a self,
                _peer: &'a str,
                _message: &'a ReplicationMessage,
            ) -> BoxFuture<'a, Result<ReplicaOutcome, TransportError>> {
                Box::pin(std::future::pending())
            }
            fn forward<'a>(
                &'a self,
                _peer: &'a str,
                _vdb: &'a str,
                _call: &'a RegistryCall,
            ) -> BoxFuture<'a, Result<CallReply, TransportError>> {
                Box::pin(std::future::pending())
            }
        }

        let instance = RegistryInstance::new(store(), settings());
        let sender = ReplicationSender::new(
            instance,
            vec!["http://reg2:8443".into()],
            "reg1",
            Arc::new(Stuck),
            settings(),
        );
        let first = sender.run_cycle(100);
        tokio::task::yield_now().await;
        let _second = sender.run_cycle(160);

        for handle in first {
            assert!(handle.await.unwrap_err().is_cancelled());
        }
        let status = sender.task_status("http://reg2:8443").unwrap();
        assert_eq!(status.cycle_timestamp, 160);
        assert_eq!(status.state, SendState::Running);
        sender.shutdown();
    }
}
