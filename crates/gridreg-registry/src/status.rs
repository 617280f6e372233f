//! Operational status documents returned by `get_property`.

use std::collections::HashMap;

use serde::Serialize;

use gridreg_core::{RegistryError, RegistryResult, RegistrySettings, host_of_url};
use gridreg_store::RegistrationStatus;

use crate::instance::{InstanceState, RegistryInstance};
use crate::replication::SendTaskStatus;
use crate::service::VdbEntry;

#[derive(Debug, Clone, Serialize)]
pub struct ResourcesStatus {
    pub replication_interval_secs: u64,
    pub vdbs: Vec<VdbSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VdbSummary {
    pub name: String,
    /// `local` when this node hosts an instance, otherwise `remote`.
    pub location: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<InstanceState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub master_producers: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_producers: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub master_consumers: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_consumers: Option<usize>,
    pub remote_replicas: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct VdbStatus {
    #[serde(flatten)]
    pub summary: VdbSummary,
    pub replicas: Vec<ReplicaStatus>,
    pub unique_table_names: Vec<String>,
    pub unique_host_names: Vec<String>,
}

/// Replication health towards and from one peer.
#[derive(Debug, Clone, Serialize)]
pub struct ReplicaStatus {
    pub url: String,
    /// Timestamp of the last message applied from this peer.
    pub last_incoming_timestamp: Option<u64>,
    pub secs_since_last_outgoing: Option<u64>,
    pub send_task: Option<SendTaskStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableStatus {
    pub vdb: String,
    pub table: String,
    pub producers: Vec<RegistrationStatus>,
    pub consumers: Vec<RegistrationStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HostStatus {
    pub vdb: String,
    pub host: String,
    pub producers: Vec<RegistrationStatus>,
    pub consumers: Vec<RegistrationStatus>,
}

pub(crate) fn to_json<T: Serialize>(doc: &T) -> RegistryResult<serde_json::Value> {
    serde_json::to_value(doc)
        .map_err(|e| RegistryError::permanent(format!("cannot encode status: {e}")))
}

pub(crate) fn resources(settings: &RegistrySettings, vdbs: &HashMap<String, VdbEntry>) -> ResourcesStatus {
    let mut summaries: Vec<VdbSummary> = vdbs.values().map(summary).collect();
    summaries.sort_by(|a, b| a.name.cmp(&b.name));
    ResourcesStatus {
        replication_interval_secs: settings.replication_interval_secs,
        vdbs: summaries,
    }
}

fn summary(entry: &VdbEntry) -> VdbSummary {
    let instance = entry.instance.as_deref();
    let count = |f: fn(&RegistryInstance) -> Option<usize>| instance.and_then(f);
    VdbSummary {
        name: entry.name.clone(),
        location: if instance.is_some() { "local" } else { "remote" },
        state: instance.map(RegistryInstance::state),
        master_producers: count(|i| i.store().registered_producer_count(true).ok()),
        total_producers: count(|i| i.store().registered_producer_count(false).ok()),
        master_consumers: count(|i| i.store().registered_consumer_count(true).ok()),
        total_consumers: count(|i| i.store().registered_consumer_count(false).ok()),
        remote_replicas: entry.peers.as_ref().map_or(0, |p| p.len()),
    }
}

pub(crate) fn vdb_status(entry: &VdbEntry, now: u64) -> RegistryResult<VdbStatus> {
    let peers: Vec<String> = entry.peers.iter().flatten().cloned().collect();
    let Some(instance) = entry.instance.as_deref() else {
        return Ok(VdbStatus {
            summary: summary(entry),
            replicas: peers
                .into_iter()
                .map(|url| ReplicaStatus {
                    url,
                    last_incoming_timestamp: None,
                    secs_since_last_outgoing: None,
                    send_task: None,
                })
                .collect(),
            unique_table_names: Vec::new(),
            unique_host_names: Vec::new(),
        });
    };

    let store = instance.store();
    let incoming: HashMap<String, u64> = store
        .incoming_replication_times()?
        .into_iter()
        .map(|(host, ts)| (host.to_lowercase(), ts))
        .collect();
    let last_sent = entry
        .sender
        .as_ref()
        .map(|s| s.last_sent())
        .filter(|ts| *ts != 0);

    let replicas = peers
        .into_iter()
        .map(|url| {
            let host = host_of_url(&url).map(str::to_lowercase);
            ReplicaStatus {
                last_incoming_timestamp: host.and_then(|h| incoming.get(&h).copied()),
                secs_since_last_outgoing: last_sent.map(|ts| now.saturating_sub(ts)),
                send_task: entry.sender.as_ref().and_then(|s| s.task_status(&url)),
                url,
            }
        })
        .collect();

    Ok(VdbStatus {
        summary: summary(entry),
        replicas,
        unique_table_names: store.unique_table_names()?,
        unique_host_names: store.unique_host_names()?,
    })
}

fn hosted(entry: &VdbEntry) -> RegistryResult<&RegistryInstance> {
    entry.instance.as_deref().ok_or_else(|| {
        RegistryError::permanent(format!("VDB {} is not hosted here", entry.name))
    })
}

pub(crate) fn table_status(entry: &VdbEntry, table: &str) -> RegistryResult<TableStatus> {
    let store = hosted(entry)?.store();
    Ok(TableStatus {
        vdb: entry.name.clone(),
        table: table.to_string(),
        producers: store.producer_entries_for_table(table)?,
        consumers: store.consumer_entries_for_table(table)?,
    })
}

pub(crate) fn host_status(entry: &VdbEntry, host: &str) -> RegistryResult<HostStatus> {
    let store = hosted(entry)?.store();
    Ok(HostStatus {
        vdb: entry.name.clone(),
        host: host.to_string(),
        producers: store.producer_entries_for_host(host)?,
        consumers: store.consumer_entries_for_host(host)?,
    })
}
