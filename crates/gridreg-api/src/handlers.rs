//! REST API handlers.
//!
//! Each handler calls the `RegistryService` and wraps the result in the
//! shared `ApiResponse` envelope.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::debug;

use gridreg_core::wire::{
    ApiResponse, CreateVdbRequest, ForwardParams, MatchingProducersRequest,
    RegisterProducerRequest, UnregisterConsumerRequest, UnregisterProducerRequest,
};
use gridreg_core::{RegistryError, ReplicationMessage};

use crate::ApiState;

fn ok<T: Serialize>(data: T) -> Response {
    Json(ApiResponse::ok(data)).into_response()
}

/// Temporary errors map to 503 so plain HTTP clients also know to retry.
fn error_response(e: &RegistryError) -> Response {
    let status = if e.is_temporary() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::BAD_REQUEST
    };
    (
        status,
        Json(ApiResponse::<()>::failure(e.message(), e.is_temporary())),
    )
        .into_response()
}

// ── VDBs ───────────────────────────────────────────────────────

/// GET /api/v1/vdbs
pub async fn list_vdbs(State(state): State<ApiState>) -> impl IntoResponse {
    ok(state.service.vdb_names().await)
}

/// PUT /api/v1/vdbs/{vdb}
pub async fn create_vdb(
    State(state): State<ApiState>,
    Path(vdb): Path<String>,
    Json(req): Json<CreateVdbRequest>,
) -> impl IntoResponse {
    match state.service.create_vdb(&vdb, &req.replicas).await {
        Ok(()) => ok("configured"),
        Err(e) => error_response(&e),
    }
}

/// DELETE /api/v1/vdbs/{vdb}
pub async fn disable_vdb(State(state): State<ApiState>, Path(vdb): Path<String>) -> impl IntoResponse {
    match state.service.disable_vdb(&vdb).await {
        Ok(()) => ok("disabled"),
        Err(e) => error_response(&e),
    }
}

/// GET /api/v1/vdbs/{vdb}/ping
pub async fn ping(State(state): State<ApiState>, Path(vdb): Path<String>) -> impl IntoResponse {
    match state.service.ping(&vdb).await {
        Ok(()) => ok("online"),
        Err(e) => error_response(&e),
    }
}

// ── Registrations ──────────────────────────────────────────────

/// POST /api/v1/vdbs/{vdb}/producers
pub async fn register_producer(
    State(state): State<ApiState>,
    Path(vdb): Path<String>,
    Query(params): Query<ForwardParams>,
    Json(req): Json<RegisterProducerRequest>,
) -> impl IntoResponse {
    match state
        .service
        .register_producer_table(&vdb, params.can_forward, req)
        .await
    {
        Ok(consumers) => ok(consumers),
        Err(e) => error_response(&e),
    }
}

/// DELETE /api/v1/vdbs/{vdb}/producers
pub async fn unregister_producer(
    State(state): State<ApiState>,
    Path(vdb): Path<String>,
    Query(params): Query<ForwardParams>,
    Json(req): Json<UnregisterProducerRequest>,
) -> impl IntoResponse {
    match state
        .service
        .unregister_producer_table(&vdb, params.can_forward, req)
        .await
    {
        Ok(()) => ok("unregistered"),
        Err(e) => error_response(&e),
    }
}

/// DELETE /api/v1/vdbs/{vdb}/consumers
pub async fn unregister_consumer(
    State(state): State<ApiState>,
    Path(vdb): Path<String>,
    Query(params): Query<ForwardParams>,
    Json(req): Json<UnregisterConsumerRequest>,
) -> impl IntoResponse {
    match state
        .service
        .unregister_continuous_consumer(&vdb, params.can_forward, req)
        .await
    {
        Ok(()) => ok("unregistered"),
        Err(e) => error_response(&e),
    }
}

/// POST /api/v1/vdbs/{vdb}/matching-producers
pub async fn matching_producers(
    State(state): State<ApiState>,
    Path(vdb): Path<String>,
    Query(params): Query<ForwardParams>,
    Json(req): Json<MatchingProducersRequest>,
) -> impl IntoResponse {
    match state
        .service
        .get_matching_producers_for_tables(&vdb, params.can_forward, req)
        .await
    {
        Ok(producers) => ok(producers),
        Err(e) => error_response(&e),
    }
}

/// GET /api/v1/vdbs/{vdb}/tables/{table}/producers
pub async fn table_producers(
    State(state): State<ApiState>,
    Path((vdb, table)): Path<(String, String)>,
    Query(params): Query<ForwardParams>,
) -> impl IntoResponse {
    match state
        .service
        .get_all_producers_for_table(&vdb, params.can_forward, &table)
        .await
    {
        Ok(producers) => ok(producers),
        Err(e) => error_response(&e),
    }
}

// ── Replication ────────────────────────────────────────────────

/// POST /api/v1/replication
pub async fn add_replica(
    State(state): State<ApiState>,
    Json(message): Json<ReplicationMessage>,
) -> impl IntoResponse {
    debug!(vdb = %message.vdb_name, peer = %message.origin_host, "replication message over http");
    match state.service.add_replica(message).await {
        Ok(outcome) => ok(outcome),
        Err(e) => error_response(&e),
    }
}

// ── Status ─────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct PropertyParams {
    pub param: Option<String>,
}

/// GET /api/v1/properties/{name}?param=
pub async fn get_property(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Query(params): Query<PropertyParams>,
) -> impl IntoResponse {
    match state
        .service
        .get_property(&name, params.param.as_deref())
        .await
    {
        Ok(doc) => ok(doc),
        Err(e) => error_response(&e),
    }
}
