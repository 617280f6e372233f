//! Replication protocol: receiver bookkeeping and sender/receiver
//! convergence, driven one cycle at a time.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use gridreg_core::*;
use gridreg_registry::transport::BoxFuture;
use gridreg_registry::{
    CallReply, PeerTransport, RegistryCall, RegistryInstance, ReplicationSender, TransportError,
    apply_replica,
};
use gridreg_store::RegistryStore;

fn schema() -> Arc<dyn SchemaLookup> {
    Arc::new(StaticSchema::new().with_table(
        "CMS",
        "cpuLoad",
        [("site", ColumnType::Varchar), ("value", ColumnType::Real)],
    ))
}

fn producer(id: i64, site: &str) -> ProducerRegistration {
    ProducerRegistration {
        table_name: "cpuLoad".into(),
        endpoint: ResourceEndpoint::new("http://mon.example.org:8088/Producer", id),
        predicate: format!("WHERE site = '{site}'"),
        termination_interval_secs: 3600,
        producer_type: ProducerType {
            is_continuous: true,
            is_latest: true,
            ..Default::default()
        },
        history_retention_secs: 0,
    }
}

fn remote_ids(store: &RegistryStore, origin: &str) -> BTreeSet<i64> {
    store
        .producers_from_remote(origin)
        .unwrap()
        .into_iter()
        .map(|k| k.endpoint.id)
        .collect()
}

#[test]
fn snapshot_then_delta_then_lost_update() {
    let b = RegistryStore::open_in_memory("CMS", schema()).unwrap();

    let mut full = ReplicationMessage::new("CMS", "regA", 100, 0);
    full.producers_added = vec![producer(1, "RAL"), producer(2, "CERN"), producer(3, "FNAL")];
    assert_eq!(apply_replica(&b, &full, 1_000).unwrap(), ReplicaOutcome::Accepted);
    assert_eq!(b.last_replication_time("regA").unwrap(), 100);
    assert_eq!(remote_ids(&b, "regA").len(), 3);

    let mut delta = ReplicationMessage::new("CMS", "regA", 150, 100);
    delta.producers_removed = vec![ProducerKey::new("cpuLoad", producer(2, "CERN").endpoint)];
    assert_eq!(apply_replica(&b, &delta, 1_000).unwrap(), ReplicaOutcome::Accepted);
    assert_eq!(remote_ids(&b, "regA"), BTreeSet::from([1, 3]));
    assert_eq!(b.last_replication_time("regA").unwrap(), 150);

    // A message built on the already-superseded timestamp is rejected.
    let mut resent = ReplicationMessage::new("CMS", "regA", 150, 100);
    resent.producers_added = vec![producer(2, "CERN")];
    assert_eq!(apply_replica(&b, &resent, 1_000).unwrap(), ReplicaOutcome::StaleIgnored);
    assert_eq!(remote_ids(&b, "regA"), BTreeSet::from([1, 3]));
    assert_eq!(b.last_replication_time("regA").unwrap(), 150);
}

#[test]
fn origins_are_tracked_independently() {
    let store = RegistryStore::open_in_memory("CMS", schema()).unwrap();
    let mut from_a = ReplicationMessage::new("CMS", "regA", 100, 0);
    from_a.producers_added = vec![producer(1, "RAL")];
    let mut from_c = ReplicationMessage::new("CMS", "regC", 500, 0);
    from_c.producers_added = vec![producer(7, "RAL")];
    apply_replica(&store, &from_a, 1_000).unwrap();
    apply_replica(&store, &from_c, 1_000).unwrap();

    // An empty snapshot from A clears A's rows only.
    apply_replica(&store, &ReplicationMessage::new("CMS", "regA", 200, 0), 1_000).unwrap();
    assert!(remote_ids(&store, "regA").is_empty());
    assert_eq!(remote_ids(&store, "regC"), BTreeSet::from([7]));
    assert_eq!(
        store.incoming_replication_times().unwrap().len(),
        2,
        "one timestamp per origin"
    );
}

// ── Sender against live receivers ──────────────────────────────

/// Delivers straight into the receiving instance; peers can be cut off.
#[derive(Default)]
struct InstancePeers {
    instances: RwLock<HashMap<String, Arc<RegistryInstance>>>,
    cut_off: AtomicBool,
}

impl InstancePeers {
    fn add(&self, url: &str, instance: Arc<RegistryInstance>) {
        self.instances.write().unwrap().insert(url.to_string(), instance);
    }
}

impl PeerTransport for InstancePeers {
    fn send_replica<'a>(
        &'a self,
        peer: &'a str,
        message: &'a ReplicationMessage,
    ) -> BoxFuture<'a, Result<ReplicaOutcome, TransportError>> {
        Box::pin(async move {
            if self.cut_off.load(Ordering::SeqCst) {
                return Err(TransportError::Timeout {
                    peer: peer.to_string(),
                });
            }
            let instance = self.instances.read().unwrap().get(peer).cloned();
            let instance = instance.ok_or_else(|| TransportError::Connect {
                peer: peer.to_string(),
                message: "unknown peer".into(),
            })?;
            instance.add_replica(message).map_err(TransportError::Remote)
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
                message: "forwarding not used here".into(),
            })
        })
    }
}

fn settings() -> RegistrySettings {
    RegistrySettings {
        standalone_ready_delay_ms: 0,
        retry_backoff_ms: 1,
        ..Default::default()
    }
}

async fn online(host: &str) -> Arc<RegistryInstance> {
    let store = RegistryStore::open_in_memory("CMS", schema())
        .unwrap()
        .with_replication_lag(60);
    let instance = RegistryInstance::new(store, settings());
    instance.start(false);
    assert!(instance.wait_online(Duration::from_secs(5)).await, "{host} never came online");
    instance
}

async fn cycle(sender: &ReplicationSender, now: u64) {
    for handle in sender.run_cycle(now) {
        handle.await.unwrap();
    }
}

fn masters(instance: &RegistryInstance) -> BTreeSet<i64> {
    instance
        .store()
        .list_producers()
        .unwrap()
        .into_iter()
        .filter(|row| row.is_master)
        .map(|row| row.registration.endpoint().id)
        .collect()
}

#[tokio::test]
async fn lost_cycle_heals_through_full_snapshot() {
    let a = online("regA").await;
    let b = online("regB").await;
    let peers = Arc::new(InstancePeers::default());
    peers.add("http://regB:8443", Arc::clone(&b));
    let sender = ReplicationSender::new(
        Arc::clone(&a),
        vec!["http://regB:8443".into()],
        "regA",
        Arc::clone(&peers) as Arc<dyn PeerTransport>,
        settings(),
    );

    a.register_producer_table(producer(1, "RAL")).unwrap();
    cycle(&sender, 100).await;
    assert_eq!(remote_ids(b.store(), "regA"), BTreeSet::from([1]));

    // The 160 cycle never arrives.
    peers.cut_off.store(true, Ordering::SeqCst);
    a.register_producer_table(producer(2, "CERN")).unwrap();
    cycle(&sender, 160).await;
    assert_eq!(remote_ids(b.store(), "regA"), BTreeSet::from([1]));
    assert_eq!(b.store().last_replication_time("regA").unwrap(), 100);

    // The 220 delta builds on 160, which B never saw: gap, then snapshot.
    peers.cut_off.store(false, Ordering::SeqCst);
    a.unregister_producer_table("cpuLoad", &producer(1, "RAL").endpoint).unwrap();
    a.register_producer_table(producer(3, "FNAL")).unwrap();
    cycle(&sender, 220).await;

    assert_eq!(remote_ids(b.store(), "regA"), masters(&a));
    assert_eq!(remote_ids(b.store(), "regA"), BTreeSet::from([2, 3]));
    assert_eq!(b.store().last_replication_time("regA").unwrap(), 220);
}

#[tokio::test]
async fn two_way_replication_converges() {
    let a = online("regA").await;
    let b = online("regB").await;
    let peers = Arc::new(InstancePeers::default());
    peers.add("http://regA:8443", Arc::clone(&a));
    peers.add("http://regB:8443", Arc::clone(&b));
    let transport = Arc::clone(&peers) as Arc<dyn PeerTransport>;
    let a_to_b = ReplicationSender::new(
        Arc::clone(&a),
        vec!["http://regB:8443".into()],
        "regA",
        Arc::clone(&transport),
        settings(),
    );
    let b_to_a = ReplicationSender::new(
        Arc::clone(&b),
        vec!["http://regA:8443".into()],
        "regB",
        transport,
        settings(),
    );

    a.register_producer_table(producer(1, "RAL")).unwrap();
    b.register_producer_table(producer(2, "CERN")).unwrap();
    cycle(&a_to_b, 100).await;
    cycle(&b_to_a, 100).await;

    b.register_producer_table(producer(4, "DESY")).unwrap();
    cycle(&a_to_b, 160).await;
    cycle(&b_to_a, 160).await;

    assert_eq!(remote_ids(a.store(), "regB"), masters(&b));
    assert_eq!(remote_ids(b.store(), "regA"), masters(&a));

    // A consumer on A now sees producers registered on either replica.
    let request = gridreg_core::wire::MatchingProducersRequest {
        table_names: vec!["cpuLoad".into()],
        predicate: String::new(),
        query: QueryProperties::new(QueryKind::Latest),
        is_secondary: false,
        consumer_endpoint: None,
        termination_interval_secs: 0,
    };
    assert_eq!(a.get_matching_producers_for_tables(&request).unwrap().len(), 3);
}
