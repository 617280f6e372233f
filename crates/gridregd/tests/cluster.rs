//! Multi-node behaviour: replicas running their real loops over the
//! in-process transport, plus a gateway node that only forwards.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use gridreg_core::wire::{MatchingProducersRequest, RegisterProducerRequest, UnregisterProducerRequest};
use gridreg_core::*;
use gridreg_registry::{LoopbackTransport, RegistryService, StoreLocation};

const REPLICAS: [&str; 2] = ["http://reg1:8443", "http://reg2:8443"];

fn settings() -> RegistrySettings {
    RegistrySettings {
        replication_interval_secs: 1,
        replication_lag_secs: 0,
        standalone_ready_delay_ms: 0,
        retry_backoff_ms: 50,
        max_task_time_secs: 5,
        ..Default::default()
    }
}

fn schema() -> Arc<dyn SchemaLookup> {
    Arc::new(StaticSchema::new().with_table(
        "CMS",
        "cpuLoad",
        [("site", ColumnType::Varchar), ("value", ColumnType::Real)],
    ))
}

fn node(hostname: &str, transport: &Arc<LoopbackTransport>) -> Arc<RegistryService> {
    let service = Arc::new(RegistryService::new(
        hostname,
        StoreLocation::InMemory,
        settings(),
        schema(),
        Arc::clone(transport) as _,
    ));
    transport.attach(hostname, &service);
    service
}

struct Cluster {
    transport: Arc<LoopbackTransport>,
    reg1: Arc<RegistryService>,
    reg2: Arc<RegistryService>,
}

impl Cluster {
    async fn start() -> Self {
        let transport = Arc::new(LoopbackTransport::new());
        let replicas: Vec<String> = REPLICAS.iter().map(|s| s.to_string()).collect();
        let reg1 = node("reg1", &transport);
        let reg2 = node("reg2", &transport);
        reg1.create_vdb("cms", &replicas).await.unwrap();
        reg2.create_vdb("cms", &replicas).await.unwrap();
        for svc in [&reg1, &reg2] {
            let instance = svc.instance("CMS").await.unwrap();
            assert!(instance.wait_online(Duration::from_secs(10)).await);
        }
        Self {
            transport,
            reg1,
            reg2,
        }
    }

    async fn shutdown(&self) {
        self.reg1.shutdown().await;
        self.reg2.shutdown().await;
    }
}

fn producer(id: i64, predicate: &str) -> RegisterProducerRequest {
    RegisterProducerRequest {
        endpoint: ResourceEndpoint::new("http://mon.example.org:8088/Producer", id),
        table_name: "cpuLoad".into(),
        predicate: predicate.into(),
        producer_type: ProducerType {
            is_continuous: true,
            is_latest: true,
            ..Default::default()
        },
        history_retention_secs: 0,
        termination_interval_secs: 3600,
    }
}

fn lookup(predicate: &str, consumer: Option<i64>) -> MatchingProducersRequest {
    MatchingProducersRequest {
        table_names: vec!["cpuLoad".into()],
        predicate: predicate.into(),
        query: match consumer {
            Some(_) => QueryProperties::continuous(),
            None => QueryProperties::new(QueryKind::Latest),
        },
        is_secondary: false,
        consumer_endpoint: consumer
            .map(|id| ResourceEndpoint::new("http://ui.example.org:8088/Consumer", id)),
        termination_interval_secs: 600,
    }
}

async fn producer_ids(service: &RegistryService) -> BTreeSet<i64> {
    service
        .get_all_producers_for_table("CMS", false, "cpuLoad")
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.endpoint.id)
        .collect()
}

/// Poll until the node lists exactly `expected`, or give up after 15s.
async fn converges(service: &RegistryService, expected: &[i64]) -> bool {
    let expected: BTreeSet<i64> = expected.iter().copied().collect();
    for _ in 0..150 {
        if producer_ids(service).await == expected {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn producer_registered_on_one_replica_is_found_on_the_other() {
    let cluster = Cluster::start().await;
    cluster
        .reg1
        .register_producer_table("cms", true, producer(1, "WHERE site = 'RAL'"))
        .await
        .unwrap();
    assert!(converges(&cluster.reg2, &[1]).await, "reg2 never saw P1");

    let found = |predicate: &'static str, consumer: Option<i64>| {
        let reg2 = Arc::clone(&cluster.reg2);
        async move {
            reg2.get_matching_producers_for_tables("CMS", false, lookup(predicate, consumer))
                .await
                .map(|producers| producers.len())
        }
    };
    assert_eq!(found("WHERE site = 'RAL' AND value > 10", Some(1)).await.unwrap(), 1);
    assert_eq!(found("WHERE site = 'CERN'", Some(2)).await.unwrap(), 0);
    assert_eq!(found("WHERE site = 'RAL' OR other = 1", None).await.unwrap(), 1);

    // The same complex predicate may not register a continuous consumer.
    let err = found("WHERE site = 'RAL' OR other = 1", Some(3)).await.unwrap_err();
    assert!(!err.is_temporary());

    // Consumers registered on reg2 flow back to reg1 and are handed to new
    // producers there.
    let mut streams_to = BTreeSet::new();
    for _ in 0..150 {
        let consumers = cluster
            .reg1
            .register_producer_table("CMS", false, producer(5, "WHERE site = 'RAL'"))
            .await
            .unwrap();
        streams_to = consumers.into_iter().map(|c| c.endpoint.id).collect();
        if !streams_to.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(streams_to, BTreeSet::from([1]), "only the RAL consumer matches");

    cluster.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn partitioned_replica_catches_up() {
    let cluster = Cluster::start().await;
    cluster
        .reg1
        .register_producer_table("CMS", false, producer(1, ""))
        .await
        .unwrap();
    assert!(converges(&cluster.reg2, &[1]).await);

    cluster.transport.set_reachable("reg2", false);
    cluster
        .reg1
        .unregister_producer_table(
            "CMS",
            false,
            UnregisterProducerRequest {
                table_name: "cpuLoad".into(),
                endpoint: producer(1, "").endpoint,
            },
        )
        .await
        .unwrap();
    cluster
        .reg1
        .register_producer_table("CMS", false, producer(2, ""))
        .await
        .unwrap();
    // Let at least one cycle fail outright.
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(producer_ids(&cluster.reg2).await, BTreeSet::from([1]));

    cluster.transport.set_reachable("reg2", true);
    assert!(converges(&cluster.reg2, &[2]).await, "reg2 never caught up");
    assert_eq!(producer_ids(&cluster.reg1).await, BTreeSet::from([2]));

    cluster.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn gateway_forwards_and_fails_over() {
    let cluster = Cluster::start().await;
    let replicas: Vec<String> = REPLICAS.iter().map(|s| s.to_string()).collect();
    let gateway = node("gateway", &cluster.transport);
    gateway.create_vdb("CMS", &replicas).await.unwrap();
    assert!(gateway.instance("CMS").await.is_none());

    gateway
        .register_producer_table("CMS", true, producer(1, ""))
        .await
        .unwrap();
    let listed = gateway
        .get_all_producers_for_table("CMS", true, "cpuLoad")
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    let err = gateway
        .get_all_producers_for_table("CMS", false, "cpuLoad")
        .await
        .unwrap_err();
    assert!(!err.is_temporary(), "forwarding refused is permanent");

    // With reg1 gone the gateway moves on to reg2, which has the producer
    // once replication has caught up.
    cluster.transport.set_reachable("reg1", false);
    let mut via_reg2 = 0;
    for _ in 0..150 {
        via_reg2 = gateway
            .get_matching_producers_for_tables("CMS", true, lookup("", None))
            .await
            .unwrap()
            .len();
        if via_reg2 == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(via_reg2, 1);

    cluster.transport.set_reachable("reg2", false);
    let err = gateway
        .get_matching_producers_for_tables("CMS", true, lookup("", None))
        .await
        .unwrap_err();
    assert!(err.is_temporary());
    assert!(err.message().contains("Could not find registry service"));

    gateway.shutdown().await;
    cluster.shutdown().await;
}
