//! Health check endpoint — for load balancers, monitoring, and Docker health checks.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use crate::AppState;

static STARTED_AT: OnceLock<Instant> = OnceLock::new();

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_secs: u64,
}

/// Health check router.
pub fn router() -> Router<Arc<AppState>> {
    STARTED_AT.get_or_init(Instant::now);
    Router::new().route("/health", get(health_check))
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let db_ok = nexus_core_db::postgres::health_check(&state.db.pool).await;

    Json(HealthResponse {
        status: if db_ok { "healthy".into() } else { "degraded".into() },
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: STARTED_AT.get_or_init(Instant::now).elapsed().as_secs(),
    })
}
