//! Persisted row types for the registry store.

use gridreg_core::{ColumnType, Registration, ResourceEndpoint};
use gridreg_predicate::Literal;
use serde::{Deserialize, Serialize};

/// A registration as stored: the registration itself plus bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRegistration {
    pub registration: Registration,
    /// Written by a direct call on this replica rather than by replication.
    pub is_master: bool,
    /// Peer host the row was replicated from; `None` for master rows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_host: Option<String>,
    pub last_contact_secs: u64,
    /// Termination interval including the replication lag cushion for
    /// non-master rows.
    pub effective_termination_secs: u64,
}

impl StoredRegistration {
    pub fn expires_at(&self) -> u64 {
        self.last_contact_secs
            .saturating_add(self.effective_termination_secs)
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at() <= now
    }

    pub fn table_key(&self) -> String {
        self.registration.table_key()
    }

    pub fn to_status(&self) -> RegistrationStatus {
        let reg = &self.registration;
        let (kind, properties) = match reg {
            Registration::Producer(p) => ("producer", p.producer_type.letters()),
            Registration::Consumer(c) => {
                let mut props = c.query.kind.to_string();
                if c.is_secondary {
                    props.push_str(",secondary");
                }
                ("consumer", props)
            }
        };
        RegistrationStatus {
            kind: kind.to_string(),
            table_name: reg.table_name().to_string(),
            endpoint: reg.endpoint().clone(),
            predicate: reg.predicate().to_string(),
            termination_interval_secs: reg.termination_interval_secs(),
            properties,
            is_master: self.is_master,
            origin_host: self.origin_host.clone(),
            last_contact_secs: self.last_contact_secs,
            expires_at: self.expires_at(),
        }
    }
}

/// One row of operational status output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationStatus {
    pub kind: String,
    pub table_name: String,
    pub endpoint: ResourceEndpoint,
    pub predicate: String,
    pub termination_interval_secs: u64,
    /// Producer flags (`CHLS2`) or consumer query kind.
    pub properties: String,
    pub is_master: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_host: Option<String>,
    pub last_contact_secs: u64,
    pub expires_at: u64,
}

/// Rows removed by one purge pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeStats {
    pub producers: usize,
    pub consumers: usize,
}

impl PurgeStats {
    pub fn total(&self) -> usize {
        self.producers + self.consumers
    }
}

/// A producer predicate value in the typed index.
#[derive(Debug, Clone, PartialEq)]
pub enum FixedValue {
    Int(i64),
    Real(f64),
    Text(String),
}

impl FixedValue {
    /// Convert a predicate literal for a column of the given type.
    /// Returns `None` when the literal does not fit the type.
    pub fn from_literal(value: &Literal, ty: ColumnType) -> Option<Self> {
        match ty {
            ColumnType::Integer => match value {
                Literal::Integer(i) => Some(Self::Int(*i)),
                Literal::Real(r) if r.fract() == 0.0 => Some(Self::Int(*r as i64)),
                Literal::String(s) => s.trim().parse().ok().map(Self::Int),
                _ => None,
            },
            ColumnType::Real => value.as_f64().map(Self::Real),
            ColumnType::Varchar => value.as_text().map(Self::Text),
        }
    }

    pub fn column_type(&self) -> ColumnType {
        match self {
            Self::Int(_) => ColumnType::Integer,
            Self::Real(_) => ColumnType::Real,
            Self::Text(_) => ColumnType::Varchar,
        }
    }

    pub fn to_literal(&self) -> Literal {
        match self {
            Self::Int(i) => Literal::Integer(*i),
            Self::Real(r) => Literal::Real(*r),
            Self::Text(s) => Literal::String(s.clone()),
        }
    }
}

/// Type for a producer column the schema does not declare.
pub fn inferred_type(value: &Literal) -> ColumnType {
    match value {
        Literal::Integer(_) => ColumnType::Integer,
        Literal::Real(_) => ColumnType::Real,
        Literal::String(_) | Literal::Null => ColumnType::Varchar,
    }
}
