//! Peer transport — how a replica reaches the other replicas of a VDB.
//!
//! Replication messages and forwarded registry calls both go through
//! [`PeerTransport`]. [`HttpTransport`] speaks the registry's own HTTP API
//! with a hyper http1 client; `LoopbackTransport` delivers in-process.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use http::{Method, StatusCode, Uri, header};
use http_body_util::{BodyExt, Full};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use gridreg_core::wire::{
    ApiResponse, MatchingProducersRequest, RegisterProducerRequest, UnregisterConsumerRequest,
    UnregisterProducerRequest,
};
use gridreg_core::{ConsumerEntry, ProducerEntry, RegistryError, ReplicaOutcome, ReplicationMessage};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Failure talking to a peer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("cannot reach {peer}: {message}")]
    Connect { peer: String, message: String },

    #[error("request to {peer} timed out")]
    Timeout { peer: String },

    #[error("{peer} answered HTTP {status}")]
    Http { peer: String, status: u16 },

    #[error("undecodable response from {peer}: {message}")]
    Decode { peer: String, message: String },

    /// The peer was reached and reported a registry error.
    #[error(transparent)]
    Remote(RegistryError),
}

impl TransportError {
    /// Whether the same request may succeed if sent again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connect { .. } | Self::Timeout { .. } => true,
            Self::Http { status, .. } => *status >= 500,
            Self::Decode { .. } => false,
            Self::Remote(e) => e.is_temporary(),
        }
    }
}

impl From<TransportError> for RegistryError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Remote(inner) => inner,
            other => RegistryError::temporary(other.to_string()),
        }
    }
}

/// A registry operation forwarded to a replica that hosts the VDB.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryCall {
    RegisterProducer(RegisterProducerRequest),
    UnregisterProducer(UnregisterProducerRequest),
    UnregisterConsumer(UnregisterConsumerRequest),
    MatchingProducers(MatchingProducersRequest),
    AllProducersForTable { table_name: String },
}

impl RegistryCall {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RegisterProducer(_) => "register_producer_table",
            Self::UnregisterProducer(_) => "unregister_producer_table",
            Self::UnregisterConsumer(_) => "unregister_continuous_consumer",
            Self::MatchingProducers(_) => "get_matching_producers_for_tables",
            Self::AllProducersForTable { .. } => "get_all_producers_for_table",
        }
    }
}

/// The result of a [`RegistryCall`].
#[derive(Debug, Clone, PartialEq)]
pub enum CallReply {
    Consumers(Vec<ConsumerEntry>),
    Producers(Vec<ProducerEntry>),
    Done,
}

/// Point-to-point delivery between registry replicas.
pub trait PeerTransport: Send + Sync {
    /// Deliver a replication message to the replica at `peer` (a service URL).
    fn send_replica<'a>(
        &'a self,
        peer: &'a str,
        message: &'a ReplicationMessage,
    ) -> BoxFuture<'a, Result<ReplicaOutcome, TransportError>>;

    /// Run a registry call on the replica at `peer`, which must not forward
    /// it any further.
    fn forward<'a>(
        &'a self,
        peer: &'a str,
        vdb: &'a str,
        call: &'a RegistryCall,
    ) -> BoxFuture<'a, Result<CallReply, TransportError>>;
}

// ── HTTP ───────────────────────────────────────────────────────────

/// hyper http1 client for the registry API under `/api/v1`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn request<T: DeserializeOwned>(
        &self,
        peer: &str,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<T, TransportError> {
        let target = PeerUrl::parse(peer)?;
        let uri = format!("http://{}{}/api/v1{path}", target.authority, target.prefix);

        let exchange = async {
            let stream = tokio::net::TcpStream::connect(target.authority.as_str())
                .await
                .map_err(|e| connect_error(peer, e))?;

            let io = hyper_util::rt::TokioIo::new(stream);
            let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
                .await
                .map_err(|e| connect_error(peer, e))?;

            // Drive the connection in the background.
            tokio::spawn(async move {
                let _ = conn.await;
            });

            let mut builder = http::Request::builder()
                .method(method)
                .uri(&uri)
                .header(header::HOST, target.authority.as_str())
                .header(header::USER_AGENT, "gridreg/0.1");
            if body.is_some() {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
            }
            let req = builder
                .body(Full::new(Bytes::from(body.unwrap_or_default())))
                .map_err(|e| TransportError::Decode {
                    peer: peer.to_string(),
                    message: format!("cannot build request for {uri}: {e}"),
                })?;

            let resp = sender
                .send_request(req)
                .await
                .map_err(|e| connect_error(peer, e))?;
            let status = resp.status();
            let bytes = resp
                .into_body()
                .collect()
                .await
                .map_err(|e| TransportError::Decode {
                    peer: peer.to_string(),
                    message: e.to_string(),
                })?
                .to_bytes();
            decode_envelope(peer, status, &bytes)
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                debug!(%peer, %uri, "peer request timed out");
                Err(TransportError::Timeout {
                    peer: peer.to_string(),
                })
            }
        }
    }

    async fn post<B: serde::Serialize + Sync, T: DeserializeOwned>(
        &self,
        peer: &str,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<T, TransportError> {
        let bytes = serde_json::to_vec(body).map_err(|e| TransportError::Decode {
            peer: peer.to_string(),
            message: format!("cannot encode request: {e}"),
        })?;
        self.request(peer, method, path, Some(bytes)).await
    }
}

impl PeerTransport for HttpTransport {
    fn send_replica<'a>(
        &'a self,
        peer: &'a str,
        message: &'a ReplicationMessage,
    ) -> BoxFuture<'a, Result<ReplicaOutcome, TransportError>> {
        Box::pin(self.post(peer, Method::POST, "/replication", message))
    }

    fn forward<'a>(
        &'a self,
        peer: &'a str,
        vdb: &'a str,
        call: &'a RegistryCall,
    ) -> BoxFuture<'a, Result<CallReply, TransportError>> {
        Box::pin(async move {
            const NO_FORWARD: &str = "can_forward=false";
            let vdb = urlencoding::encode(vdb);
            match call {
                RegistryCall::RegisterProducer(req) => {
                    let path = format!("/vdbs/{vdb}/producers?{NO_FORWARD}");
                    self.post(peer, Method::POST, &path, req).await.map(CallReply::Consumers)
                }
                RegistryCall::UnregisterProducer(req) => {
                    let path = format!("/vdbs/{vdb}/producers?{NO_FORWARD}");
                    self.post::<_, String>(peer, Method::DELETE, &path, req)
                        .await
                        .map(|_| CallReply::Done)
                }
                RegistryCall::UnregisterConsumer(req) => {
                    let path = format!("/vdbs/{vdb}/consumers?{NO_FORWARD}");
                    self.post::<_, String>(peer, Method::DELETE, &path, req)
                        .await
                        .map(|_| CallReply::Done)
                }
                RegistryCall::MatchingProducers(req) => {
                    let path = format!("/vdbs/{vdb}/matching-producers?{NO_FORWARD}");
                    self.post(peer, Method::POST, &path, req).await.map(CallReply::Producers)
                }
                RegistryCall::AllProducersForTable { table_name } => {
                    let table_name = urlencoding::encode(table_name);
                    let path = format!("/vdbs/{vdb}/tables/{table_name}/producers?{NO_FORWARD}");
                    self.request(peer, Method::GET, &path, None)
                        .await
                        .map(CallReply::Producers)
                }
            }
        })
    }
}

/// Socket address and path prefix of a peer service URL.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PeerUrl {
    authority: String,
    prefix: String,
}

impl PeerUrl {
    fn parse(peer: &str) -> Result<Self, TransportError> {
        let invalid = |message: String| TransportError::Connect {
            peer: peer.to_string(),
            message,
        };
        let uri: Uri = peer
            .parse()
            .map_err(|e| invalid(format!("invalid peer url: {e}")))?;
        if uri.scheme_str().is_some_and(|s| s != "http") {
            return Err(invalid("only http peers are supported".to_string()));
        }
        let host = uri
            .host()
            .ok_or_else(|| invalid("peer url has no host".to_string()))?;
        let port = uri.port_u16().unwrap_or(80);
        Ok(Self {
            authority: format!("{host}:{port}"),
            prefix: uri.path().trim_end_matches('/').to_string(),
        })
    }
}

fn connect_error(peer: &str, e: impl std::fmt::Display) -> TransportError {
    debug!(%peer, error = %e, "peer connection failed");
    TransportError::Connect {
        peer: peer.to_string(),
        message: e.to_string(),
    }
}

/// Unwrap the `{ success, data, error, retryable }` envelope.
fn decode_envelope<T: DeserializeOwned>(
    peer: &str,
    status: StatusCode,
    body: &[u8],
) -> Result<T, TransportError> {
    match serde_json::from_slice::<ApiResponse<T>>(body) {
        Ok(envelope) if envelope.success => envelope.data.ok_or_else(|| TransportError::Decode {
            peer: peer.to_string(),
            message: "response carries no data".to_string(),
        }),
        Ok(envelope) => {
            let message = envelope
                .error
                .unwrap_or_else(|| format!("request failed with HTTP {status}"));
            let error = if envelope.retryable.unwrap_or(false) {
                RegistryError::temporary(message)
            } else {
                RegistryError::permanent(message)
            };
            Err(TransportError::Remote(error))
        }
        Err(_) if !status.is_success() => Err(TransportError::Http {
            peer: peer.to_string(),
            status: status.as_u16(),
        }),
        Err(e) => Err(TransportError::Decode {
            peer: peer.to_string(),
            message: e.to_string(),
        }),
    }
}
