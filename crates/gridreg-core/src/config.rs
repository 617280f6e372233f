//! gridreg.toml configuration parser.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

use crate::schema::ColumnType;
use crate::types::{host_of_url, normalize_vdb_name};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Name this node is known by; compared against replica URL hosts.
    #[serde(default = "default_hostname")]
    pub hostname: String,
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub registry: RegistrySettings,
    #[serde(default)]
    pub vdb: Vec<VdbConfig>,
}

/// Timing and retry knobs for instances and replication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrySettings {
    #[serde(default = "default_sixty")]
    pub replication_interval_secs: u64,
    #[serde(default = "default_sixty")]
    pub replication_lag_secs: u64,
    #[serde(default = "default_sixty")]
    pub cleanup_interval_secs: u64,
    #[serde(default = "default_standalone_ready_delay_ms")]
    pub standalone_ready_delay_ms: u64,
    #[serde(default = "default_max_task_time_secs")]
    pub max_task_time_secs: u64,
    #[serde(default = "default_max_send_attempts")]
    pub max_send_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VdbConfig {
    pub name: String,
    /// Service URLs of every replica of this VDB, this node included.
    #[serde(default)]
    pub replicas: Vec<String>,
    #[serde(default)]
    pub table: Vec<TableSchemaConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchemaConfig {
    pub name: String,
    #[serde(default)]
    pub columns: BTreeMap<String, ColumnType>,
}

fn default_hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

fn default_listen() -> String {
    "0.0.0.0:8443".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/gridreg")
}

fn default_sixty() -> u64 {
    60
}

fn default_standalone_ready_delay_ms() -> u64 {
    1000
}

fn default_max_task_time_secs() -> u64 {
    30
}

fn default_max_send_attempts() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_request_timeout_secs() -> u64 {
    10
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            replication_interval_secs: default_sixty(),
            replication_lag_secs: default_sixty(),
            cleanup_interval_secs: default_sixty(),
            standalone_ready_delay_ms: default_standalone_ready_delay_ms(),
            max_task_time_secs: default_max_task_time_secs(),
            max_send_attempts: default_max_send_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl RegistrySettings {
    pub fn replication_interval(&self) -> Duration {
        Duration::from_secs(self.replication_interval_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn max_task_time(&self) -> Duration {
        Duration::from_secs(self.max_task_time_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// How long a new instance waits before checking whether it may go
    /// online. With peers this covers one replication cycle plus the lag
    /// so that incoming snapshots have a chance to arrive first.
    pub fn ready_delay(&self, has_peers: bool) -> Duration {
        if has_peers {
            Duration::from_secs(self.replication_interval_secs + self.replication_lag_secs)
        } else {
            Duration::from_millis(self.standalone_ready_delay_ms)
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            listen: default_listen(),
            data_dir: default_data_dir(),
            registry: RegistrySettings::default(),
            vdb: Vec::new(),
        }
    }
}

impl RegistryConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: RegistryConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.hostname.trim().is_empty() {
            bail!("hostname must not be empty");
        }
        let r = &self.registry;
        if r.replication_interval_secs == 0 || r.cleanup_interval_secs == 0 {
            bail!("replication and cleanup intervals must be greater than zero");
        }
        if r.max_task_time_secs == 0 {
            bail!("max_task_time_secs must be greater than zero");
        }
        if r.max_send_attempts == 0 {
            bail!("max_send_attempts must be at least 1");
        }

        let mut seen = HashSet::new();
        for vdb in &self.vdb {
            if vdb.name.trim().is_empty() {
                bail!("vdb name must not be empty");
            }
            if !seen.insert(normalize_vdb_name(&vdb.name)) {
                bail!("vdb '{}' is declared more than once", vdb.name);
            }
            for url in &vdb.replicas {
                if host_of_url(url).is_none() {
                    bail!("vdb '{}': replica url '{url}' has no host", vdb.name);
                }
            }
        }
        Ok(())
    }

    /// Whether this node is one of the replicas of `vdb`.
    pub fn hosts_vdb(&self, vdb: &VdbConfig) -> bool {
        vdb.replicas
            .iter()
            .any(|url| host_of_url(url).is_some_and(|h| h.eq_ignore_ascii_case(&self.hostname)))
    }
}
