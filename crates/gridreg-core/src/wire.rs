//! JSON bodies of the registry HTTP API.
//!
//! Shared by the axum handlers and by the client used for forwarding calls
//! to a remote replica, so both sides agree on the format.

use serde::{Deserialize, Serialize};

use crate::types::{
    ConsumerRegistration, ProducerRegistration, ProducerType, QueryProperties, ResourceEndpoint,
};

/// Uniform response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set on failures: whether the caller may retry later.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            retryable: None,
        }
    }

    pub fn failure(msg: impl Into<String>, retryable: bool) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
            retryable: Some(retryable),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterProducerRequest {
    pub endpoint: ResourceEndpoint,
    pub table_name: String,
    #[serde(default)]
    pub predicate: String,
    pub producer_type: ProducerType,
    #[serde(default)]
    pub history_retention_secs: u64,
    pub termination_interval_secs: u64,
}

impl From<RegisterProducerRequest> for ProducerRegistration {
    fn from(req: RegisterProducerRequest) -> Self {
        Self {
            table_name: req.table_name,
            endpoint: req.endpoint,
            predicate: req.predicate,
            termination_interval_secs: req.termination_interval_secs,
            producer_type: req.producer_type,
            history_retention_secs: req.history_retention_secs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnregisterProducerRequest {
    pub table_name: String,
    pub endpoint: ResourceEndpoint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnregisterConsumerRequest {
    pub endpoint: ResourceEndpoint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchingProducersRequest {
    pub table_names: Vec<String>,
    #[serde(default)]
    pub predicate: String,
    pub query: QueryProperties,
    #[serde(default)]
    pub is_secondary: bool,
    /// When present the consumer is registered as a side effect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumer_endpoint: Option<ResourceEndpoint>,
    #[serde(default)]
    pub termination_interval_secs: u64,
}

impl MatchingProducersRequest {
    /// The consumer to register alongside the lookup, if any. Only the
    /// first table is recorded.
    pub fn consumer_registration(&self) -> Option<ConsumerRegistration> {
        let endpoint = self.consumer_endpoint.clone()?;
        let table_name = self.table_names.first()?.clone();
        Some(ConsumerRegistration {
            table_name,
            endpoint,
            predicate: self.predicate.clone(),
            termination_interval_secs: self.termination_interval_secs,
            query: self.query.clone(),
            is_secondary: self.is_secondary,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateVdbRequest {
    pub replicas: Vec<String>,
}

/// Query string accepted by every forwardable route.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ForwardParams {
    #[serde(default = "default_can_forward")]
    pub can_forward: bool,
}

impl Default for ForwardParams {
    fn default() -> Self {
        Self {
            can_forward: default_can_forward(),
        }
    }
}

fn default_can_forward() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_envelope_omits_data() {
        let resp = ApiResponse::<()>::failure("VDB CMS is currently offline", true);
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["retryable"], true);
        assert!(json.get("data").is_none());
    }

    #[test]
    fn matching_request_defaults() {
        let req: MatchingProducersRequest = serde_json::from_str(
            r#"{"table_names":["cpuLoad"],"query":{"kind":"latest"}}"#,
        )
        .unwrap();
        assert_eq!(req.predicate, "");
        assert!(!req.is_secondary);
        assert!(req.consumer_endpoint.is_none());
        assert!(req.consumer_registration().is_none());
    }

    #[test]
    fn consumer_is_registered_for_first_table_only() {
        let req = MatchingProducersRequest {
            table_names: vec!["cpuLoad".into(), "memLoad".into()],
            predicate: "WHERE site = 'CERN'".into(),
            query: QueryProperties::continuous(),
            is_secondary: false,
            consumer_endpoint: Some(ResourceEndpoint::new("http://c.example.org/Consumer", 4)),
            termination_interval_secs: 120,
        };
        let consumer = req.consumer_registration().unwrap();
        assert_eq!(consumer.table_name, "cpuLoad");
        assert_eq!(consumer.termination_interval_secs, 120);
        assert_eq!(consumer.predicate, "WHERE site = 'CERN'");
    }
}
