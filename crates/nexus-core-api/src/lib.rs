//! # nexus-core-api
//!
//! Minimal REST transport for the Nexus messaging core: key-material
//! exchange, message ingest/history, and read/delivery receipts. The
//! realtime WebSocket gateway lives in `nexus-core-hub` and is mounted
//! alongside this router by the server binary, since its state
//! (`HubHandle`, JWT secret) differs from the REST surface's.

pub mod middleware;
pub mod routes;

use axum::Router;
use nexus_core_db::Database;
use nexus_core_hub::HubHandle;
use std::sync::Arc;

/// Shared application state available to all REST route handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    /// Handle to the realtime delivery hub — REST mutations (send, read,
    /// delivered) dispatch through this so connected sessions learn about
    /// them without polling.
    pub hub: HubHandle,
}

/// Build the complete REST router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .merge(routes::keys::router())
        .merge(routes::messages::router())
        .merge(routes::health::router());

    Router::new()
        .nest("/api/v1", api_routes)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::compression::CompressionLayer::new())
        .with_state(Arc::new(state))
}
