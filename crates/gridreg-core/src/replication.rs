//! Replication wire types exchanged between registry replicas.

use serde::{Deserialize, Serialize};

use crate::types::{ConsumerRegistration, ProducerKey, ProducerRegistration, ResourceEndpoint};

/// One change recorded in an instance's delta log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ReplicationLogEntry {
    ProducerAdded(ProducerRegistration),
    ConsumerAdded(ConsumerRegistration),
    ProducerRemoved(ProducerKey),
    ConsumerRemoved { endpoint: ResourceEndpoint },
}

impl ReplicationLogEntry {
    /// Key under which the entry is kept in the delta log.
    ///
    /// A producer is identified by endpoint and table, a consumer by its
    /// endpoint alone, so an add and a later remove of the same resource
    /// share a key and the later one wins.
    pub fn replica_key(&self) -> String {
        match self {
            Self::ProducerAdded(p) => producer_replica_key(&p.endpoint, &p.table_name),
            Self::ProducerRemoved(k) => producer_replica_key(&k.endpoint, &k.table_name),
            Self::ConsumerAdded(c) => c.endpoint.to_string(),
            Self::ConsumerRemoved { endpoint } => endpoint.to_string(),
        }
    }

    /// `+` for additions, `-` for removals.
    pub fn sign(&self) -> char {
        match self {
            Self::ProducerAdded(_) | Self::ConsumerAdded(_) => '+',
            Self::ProducerRemoved(_) | Self::ConsumerRemoved { .. } => '-',
        }
    }
}

fn producer_replica_key(endpoint: &ResourceEndpoint, table_name: &str) -> String {
    format!("{endpoint}{}", table_name.to_ascii_lowercase())
}

/// A versioned batch of registry changes sent from one replica to another.
///
/// `previous_timestamp == 0` marks a full snapshot: the added lists are then
/// the complete set of master registrations held by the origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationMessage {
    pub vdb_name: String,
    pub origin_host: String,
    pub current_timestamp: u64,
    pub previous_timestamp: u64,
    #[serde(default)]
    pub producers_added: Vec<ProducerRegistration>,
    #[serde(default)]
    pub consumers_added: Vec<ConsumerRegistration>,
    #[serde(default)]
    pub producers_removed: Vec<ProducerKey>,
    #[serde(default)]
    pub consumers_removed: Vec<ResourceEndpoint>,
}

impl ReplicationMessage {
    /// An empty message; fill the lists before sending.
    pub fn new(
        vdb_name: impl Into<String>,
        origin_host: impl Into<String>,
        current_timestamp: u64,
        previous_timestamp: u64,
    ) -> Self {
        Self {
            vdb_name: vdb_name.into(),
            origin_host: origin_host.into(),
            current_timestamp,
            previous_timestamp,
            producers_added: Vec::new(),
            consumers_added: Vec::new(),
            producers_removed: Vec::new(),
            consumers_removed: Vec::new(),
        }
    }

    /// Build an incremental message by classifying delta-log entries.
    pub fn incremental(
        vdb_name: impl Into<String>,
        origin_host: impl Into<String>,
        current_timestamp: u64,
        previous_timestamp: u64,
        entries: impl IntoIterator<Item = ReplicationLogEntry>,
    ) -> Self {
        let mut msg = Self::new(vdb_name, origin_host, current_timestamp, previous_timestamp);
        for entry in entries {
            match entry {
                ReplicationLogEntry::ProducerAdded(p) => msg.producers_added.push(p),
                ReplicationLogEntry::ConsumerAdded(c) => msg.consumers_added.push(c),
                ReplicationLogEntry::ProducerRemoved(k) => msg.producers_removed.push(k),
                ReplicationLogEntry::ConsumerRemoved { endpoint } => {
                    msg.consumers_removed.push(endpoint)
                }
            }
        }
        msg
    }

    pub fn is_full_snapshot(&self) -> bool {
        self.previous_timestamp == 0
    }

    pub fn is_empty(&self) -> bool {
        self.producers_added.is_empty()
            && self.consumers_added.is_empty()
            && self.producers_removed.is_empty()
            && self.consumers_removed.is_empty()
    }

    pub fn entry_count(&self) -> usize {
        self.producers_added.len()
            + self.consumers_added.len()
            + self.producers_removed.len()
            + self.consumers_removed.len()
    }
}

/// How a receiving replica handled a [`ReplicationMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicaOutcome {
    /// Applied; the stored timestamp for the origin now equals the
    /// message's `current_timestamp`.
    Accepted,
    /// The message does not follow the last one applied; nothing changed and
    /// the sender must follow up with a full snapshot.
    GapNeedsFullSync,
    /// Older than what is already applied; ignored without changes.
    StaleIgnored,
}

impl ReplicaOutcome {
    /// Whether the sender may consider the message delivered.
    pub fn is_accepted(&self) -> bool {
        !matches!(self, Self::GapNeedsFullSync)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ProducerType, QueryProperties};

    fn producer(table: &str, id: i64) -> ProducerRegistration {
        ProducerRegistration {
            table_name: table.into(),
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

    #[test]
    fn add_and_remove_of_same_producer_share_a_key() {
        let p = producer("cpuLoad", 3);
        let added = ReplicationLogEntry::ProducerAdded(p.clone());
        let removed = ReplicationLogEntry::ProducerRemoved(ProducerKey::new("cpuLoad", p.endpoint));
        assert_eq!(added.replica_key(), removed.replica_key());
        assert_eq!(added.sign(), '+');
        assert_eq!(removed.sign(), '-');
    }

    #[test]
    fn table_name_case_does_not_split_log_entries() {
        let p = producer("cpuLoad", 3);
        let added = ReplicationLogEntry::ProducerAdded(p.clone());
        let removed = ReplicationLogEntry::ProducerRemoved(ProducerKey::new("CPULOAD", p.endpoint));
        assert_eq!(added.replica_key(), removed.replica_key());
    }

    #[test]
    fn producer_keys_differ_per_table() {
        let a = ReplicationLogEntry::ProducerAdded(producer("cpuLoad", 3));
        let b = ReplicationLogEntry::ProducerAdded(producer("memLoad", 3));
        assert_ne!(a.replica_key(), b.replica_key());
    }

    #[test]
    fn incremental_classifies_entries() {
        let consumer = ConsumerRegistration {
            table_name: "cpuLoad".into(),
            endpoint: ResourceEndpoint::new("http://c.example.org/Consumer", 9),
            predicate: String::new(),
            termination_interval_secs: 60,
            query: QueryProperties::continuous(),
            is_secondary: false,
        };
        let msg = ReplicationMessage::incremental(
            "CMS",
            "reg1",
            150,
            100,
            vec![
                ReplicationLogEntry::ProducerAdded(producer("cpuLoad", 1)),
                ReplicationLogEntry::ConsumerAdded(consumer.clone()),
                ReplicationLogEntry::ProducerRemoved(ProducerKey::new(
                    "cpuLoad",
                    ResourceEndpoint::new("http://p.example.org/Producer", 2),
                )),
                ReplicationLogEntry::ConsumerRemoved {
                    endpoint: consumer.endpoint.clone(),
                },
            ],
        );
        assert!(!msg.is_full_snapshot());
        assert_eq!(msg.producers_added.len(), 1);
        assert_eq!(msg.consumers_added.len(), 1);
        assert_eq!(msg.producers_removed.len(), 1);
        assert_eq!(msg.consumers_removed, vec![consumer.endpoint]);
        assert_eq!(msg.entry_count(), 4);
    }

    #[test]
    fn gap_is_the_only_rejection() {
        assert!(ReplicaOutcome::Accepted.is_accepted());
        assert!(ReplicaOutcome::StaleIgnored.is_accepted());
        assert!(!ReplicaOutcome::GapNeedsFullSync.is_accepted());
        assert_eq!(
            serde_json::to_string(&ReplicaOutcome::GapNeedsFullSync).unwrap(),
            "\"gap_needs_full_sync\""
        );
    }
}
