//! gridreg-api — REST API for the grid registry.
//!
//! Exposes the registry service over HTTP. Replicas use the same routes to
//! forward calls to each other (with `can_forward=false`) and to push
//! replication messages.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/vdbs` | List configured VDBs |
//! | PUT | `/api/v1/vdbs/{vdb}` | Create or reconfigure a VDB |
//! | DELETE | `/api/v1/vdbs/{vdb}` | Disable a VDB |
//! | GET | `/api/v1/vdbs/{vdb}/ping` | Check the local instance is online |
//! | POST | `/api/v1/vdbs/{vdb}/producers` | Register a producer table |
//! | DELETE | `/api/v1/vdbs/{vdb}/producers` | Unregister a producer table |
//! | DELETE | `/api/v1/vdbs/{vdb}/consumers` | Unregister a continuous consumer |
//! | POST | `/api/v1/vdbs/{vdb}/matching-producers` | Find producers for a query |
//! | GET | `/api/v1/vdbs/{vdb}/tables/{table}/producers` | All producers of a table |
//! | POST | `/api/v1/replication` | Apply a replication message |
//! | GET | `/api/v1/properties/{name}` | Status documents (`?param=`) |
//!
//! Failures carry `retryable: true` (HTTP 503) for temporary errors and
//! `retryable: false` (HTTP 400) for permanent ones.

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post, put};
use gridreg_registry::RegistryService;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<RegistryService>,
}

/// Build the API router.
pub fn build_router(service: Arc<RegistryService>) -> Router {
    let state = ApiState { service };

    let api_routes = Router::new()
        .route("/vdbs", get(handlers::list_vdbs))
        .route(
            "/vdbs/{vdb}",
            put(handlers::create_vdb).delete(handlers::disable_vdb),
        )
        .route("/vdbs/{vdb}/ping", get(handlers::ping))
        .route(
            "/vdbs/{vdb}/producers",
            post(handlers::register_producer).delete(handlers::unregister_producer),
        )
        .route("/vdbs/{vdb}/consumers", delete(handlers::unregister_consumer))
        .route("/vdbs/{vdb}/matching-producers", post(handlers::matching_producers))
        .route("/vdbs/{vdb}/tables/{table}/producers", get(handlers::table_producers))
        .route("/replication", post(handlers::add_replica))
        .route("/properties/{name}", get(handlers::get_property))
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}
