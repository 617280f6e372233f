//! Registration model for the grid registry.
//!
//! Producers and consumers share an endpoint, a table, a predicate and a
//! termination interval; the kind-specific parts live in the
//! [`Registration`] variants.

use std::fmt;

use serde::{Deserialize, Serialize};

/// VDB name used when a caller supplies an empty one.
pub const DEFAULT_VDB: &str = "DEFAULT";

/// Canonical form of a VDB name: upper-case, empty meaning [`DEFAULT_VDB`].
pub fn normalize_vdb_name(name: &str) -> String {
    let name = name.trim();
    if name.is_empty() {
        DEFAULT_VDB.to_string()
    } else {
        name.to_uppercase()
    }
}

/// Current Unix time in whole seconds.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Extract the host part of a URL such as `https://reg1.example.org:8443/R-GMA`.
///
/// Returns `None` when nothing host-like can be found.
pub fn host_of_url(url: &str) -> Option<&str> {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let authority = rest.split('/').next()?;
    let authority = authority.rsplit_once('@').map_or(authority, |(_, a)| a);
    let host = if let Some(bracketed) = authority.strip_prefix('[') {
        bracketed.split(']').next()?
    } else {
        authority.split(':').next()?
    };
    (!host.is_empty()).then_some(host)
}

// ── Endpoints ──────────────────────────────────────────────────────

/// Identity of a producer or consumer instance: service address plus
/// numeric resource id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceEndpoint {
    pub address: String,
    pub id: i64,
}

impl ResourceEndpoint {
    pub fn new(address: impl Into<String>, id: i64) -> Self {
        Self {
            address: address.into(),
            id,
        }
    }

    /// Host name of the service address, or the raw address if it has none.
    pub fn host(&self) -> &str {
        host_of_url(&self.address).unwrap_or(&self.address)
    }
}

impl fmt::Display for ResourceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.address, self.id)
    }
}

// ── Producer / query kinds ─────────────────────────────────────────

/// Which kinds of query a producer can answer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerType {
    #[serde(default)]
    pub is_history: bool,
    #[serde(default)]
    pub is_latest: bool,
    #[serde(default)]
    pub is_continuous: bool,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub is_secondary: bool,
}

impl ProducerType {
    /// Compact flag string used in status output (`C`, `H`, `L`, `S`, `2`).
    pub fn letters(&self) -> String {
        let mut s = String::new();
        if self.is_continuous {
            s.push('C');
        }
        if self.is_history {
            s.push('H');
        }
        if self.is_latest {
            s.push('L');
        }
        if self.is_static {
            s.push('S');
        }
        if self.is_secondary {
            s.push('2');
        }
        s
    }
}

/// The kind of query a consumer issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    Continuous,
    History,
    Latest,
    Static,
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Continuous => "continuous",
            Self::History => "history",
            Self::Latest => "latest",
            Self::Static => "static",
        };
        f.write_str(s)
    }
}

/// Query kind plus the optional time interval a consumer asked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryProperties {
    pub kind: QueryKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_interval_secs: Option<u64>,
}

impl QueryProperties {
    pub fn new(kind: QueryKind) -> Self {
        Self {
            kind,
            time_interval_secs: None,
        }
    }

    pub fn continuous() -> Self {
        Self::new(QueryKind::Continuous)
    }

    pub fn is_continuous(&self) -> bool {
        self.kind == QueryKind::Continuous
    }

    /// Whether a producer of the given type can answer this kind of query.
    pub fn is_served_by(&self, producer: &ProducerType) -> bool {
        match self.kind {
            QueryKind::Continuous => producer.is_continuous,
            QueryKind::History => producer.is_history,
            QueryKind::Latest => producer.is_latest,
            QueryKind::Static => producer.is_static,
        }
    }
}

// ── Registrations ──────────────────────────────────────────────────

/// A producer's registration for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerRegistration {
    pub table_name: String,
    pub endpoint: ResourceEndpoint,
    #[serde(default)]
    pub predicate: String,
    pub termination_interval_secs: u64,
    pub producer_type: ProducerType,
    #[serde(default)]
    pub history_retention_secs: u64,
}

/// A consumer's registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerRegistration {
    pub table_name: String,
    pub endpoint: ResourceEndpoint,
    #[serde(default)]
    pub predicate: String,
    pub termination_interval_secs: u64,
    pub query: QueryProperties,
    #[serde(default)]
    pub is_secondary: bool,
}

/// A producer or consumer registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Registration {
    Producer(ProducerRegistration),
    Consumer(ConsumerRegistration),
}

impl Registration {
    pub fn table_name(&self) -> &str {
        match self {
            Self::Producer(p) => &p.table_name,
            Self::Consumer(c) => &c.table_name,
        }
    }

    pub fn endpoint(&self) -> &ResourceEndpoint {
        match self {
            Self::Producer(p) => &p.endpoint,
            Self::Consumer(c) => &c.endpoint,
        }
    }

    pub fn predicate(&self) -> &str {
        match self {
            Self::Producer(p) => &p.predicate,
            Self::Consumer(c) => &c.predicate,
        }
    }

    pub fn termination_interval_secs(&self) -> u64 {
        match self {
            Self::Producer(p) => p.termination_interval_secs,
            Self::Consumer(c) => c.termination_interval_secs,
        }
    }

    pub fn is_producer(&self) -> bool {
        matches!(self, Self::Producer(_))
    }

    /// Storage key: `{table}|{id}|{address}`.
    pub fn table_key(&self) -> String {
        registration_key(self.table_name(), self.endpoint())
    }
}

/// Build the `{table}|{id}|{address}` key shared by producers and consumers.
/// Table names are case-insensitive, so the key uses the lower-case form.
pub fn registration_key(table_name: &str, endpoint: &ResourceEndpoint) -> String {
    format!(
        "{}|{}|{}",
        table_name.to_ascii_lowercase(),
        endpoint.id,
        endpoint.address
    )
}

/// Identifies a producer table registration to remove.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProducerKey {
    pub table_name: String,
    pub endpoint: ResourceEndpoint,
}

impl ProducerKey {
    pub fn new(table_name: impl Into<String>, endpoint: ResourceEndpoint) -> Self {
        Self {
            table_name: table_name.into(),
            endpoint,
        }
    }
}

/// What `delete_registration` removes: one producer table registration, or
/// every registration held by a consumer endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegistrationRef {
    Producer(ProducerKey),
    Consumer { endpoint: ResourceEndpoint },
}

impl From<&Registration> for RegistrationRef {
    fn from(reg: &Registration) -> Self {
        match reg {
            Registration::Producer(p) => {
                Self::Producer(ProducerKey::new(p.table_name.clone(), p.endpoint.clone()))
            }
            Registration::Consumer(c) => Self::Consumer {
                endpoint: c.endpoint.clone(),
            },
        }
    }
}

// ── Query results ──────────────────────────────────────────────────

/// A producer returned to a consumer looking for data sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerEntry {
    pub endpoint: ResourceEndpoint,
    pub table_name: String,
    pub producer_type: ProducerType,
    pub history_retention_secs: u64,
    pub predicate: String,
}

impl From<&ProducerRegistration> for ProducerEntry {
    fn from(p: &ProducerRegistration) -> Self {
        Self {
            endpoint: p.endpoint.clone(),
            table_name: p.table_name.clone(),
            producer_type: p.producer_type,
            history_retention_secs: p.history_retention_secs,
            predicate: p.predicate.clone(),
        }
    }
}

/// A continuous consumer that should be told about a new producer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConsumerEntry {
    pub endpoint: ResourceEndpoint,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vdb_names_are_case_insensitive() {
        assert_eq!(normalize_vdb_name("cms"), "CMS");
        assert_eq!(normalize_vdb_name(""), DEFAULT_VDB);
        assert_eq!(normalize_vdb_name("  "), DEFAULT_VDB);
    }

    #[test]
    fn host_is_extracted_from_urls() {
        assert_eq!(host_of_url("https://reg1.example.org:8443/R-GMA"), Some("reg1.example.org"));
        assert_eq!(host_of_url("http://10.0.0.1/x"), Some("10.0.0.1"));
        assert_eq!(host_of_url("reg2:80"), Some("reg2"));
        assert_eq!(host_of_url("http://[::1]:8080/"), Some("::1"));
        assert_eq!(host_of_url("http:///path"), None);
    }

    #[test]
    fn endpoint_host_falls_back_to_address() {
        let ep = ResourceEndpoint::new("https://prod.ral.ac.uk:8443/R-GMA/Producer", 7);
        assert_eq!(ep.host(), "prod.ral.ac.uk");
        assert_eq!(ep.to_string(), "https://prod.ral.ac.uk:8443/R-GMA/Producer#7");
    }

    #[test]
    fn registration_keys_ignore_table_case() {
        let ep = ResourceEndpoint::new("http://ral.example.org/Producer", 1);
        assert_eq!(registration_key("cpuLoad", &ep), registration_key("CPULOAD", &ep));
        assert_eq!(registration_key("cpuLoad", &ep), "cpuload|1|http://ral.example.org/Producer");
    }

    #[test]
    fn producer_letters() {
        let t = ProducerType {
            is_continuous: true,
            is_latest: true,
            is_secondary: true,
            ..Default::default()
        };
        assert_eq!(t.letters(), "CL2");
    }

    #[test]
    fn query_kind_is_served_by_matching_flag() {
        let t = ProducerType {
            is_history: true,
            ..Default::default()
        };
        assert!(QueryProperties::new(QueryKind::History).is_served_by(&t));
        assert!(!QueryProperties::continuous().is_served_by(&t));
    }

    #[test]
    fn registration_serializes_with_kind_tag() {
        let reg = Registration::Consumer(ConsumerRegistration {
            table_name: "cpuLoad".into(),
            endpoint: ResourceEndpoint::new("http://c", 1),
            predicate: String::new(),
            termination_interval_secs: 60,
            query: QueryProperties::continuous(),
            is_secondary: false,
        });
        let json = serde_json::to_value(&reg).unwrap();
        assert_eq!(json["kind"], "consumer");
        assert_eq!(json["query"]["kind"], "continuous");
        let back: Registration = serde_json::from_value(json).unwrap();
        assert_eq!(back, reg);
        assert_eq!(back.table_key(), "cpuLoad|1|http://c");
    }
}
