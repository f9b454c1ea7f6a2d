//! # Nexus core server
//!
//! Wires the pieces together: connects the database, spawns the realtime
//! delivery hub and its outbox drainer, and serves the REST surface and the
//! WebSocket gateway from a single listener.

mod outbox_drainer;

use nexus_core_api::{build_router, AppState};
use nexus_core_db::Database;
use nexus_core_hub::{actor, GatewayState};
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = nexus_core_common::config::init()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nexus_core=debug,tower_http=debug".into()),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();

    tracing::info!("starting nexus-core v{}", env!("CARGO_PKG_VERSION"));

    let db = Database::connect(config).await?;
    db.migrate().await?;

    let shutdown = CancellationToken::new();

    let hub = actor::spawn(db.clone(), config.hub.clone(), shutdown.clone());

    let drainer_handle = tokio::spawn(outbox_drainer::run(
        db.clone(),
        hub.clone(),
        config.outbox.clone(),
        shutdown.clone(),
    ));

    let api_state = AppState { db: db.clone(), hub: hub.clone() };
    let gateway_state = GatewayState {
        db: db.clone(),
        hub,
        jwt_secret: config.auth.jwt_secret.clone(),
        cfg: config.hub.clone(),
    };

    let router = build_router(api_state).merge(nexus_core_hub::build_router(gateway_state));

    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
    tracing::info!("listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let serve_shutdown = shutdown.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
            serve_shutdown.cancel();
        })
        .await?;

    let _ = drainer_handle.await;
    Ok(())
}
