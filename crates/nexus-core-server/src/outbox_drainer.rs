//! Outbox drainer — the background half of the transactional outbox.
//!
//! Routes dispatch to the hub directly on the happy path and mark their
//! outbox row processed immediately after. This loop only ever finds rows
//! for which that direct dispatch never completed — the process crashed, or
//! some other failure landed between "transaction committed" and "row marked
//! processed" — and republishes them. It is the sole delivery path for those
//! rows, not a routine-case backstop.

use nexus_core_common::config::OutboxConfig;
use nexus_core_common::event::{Event, EventKind, EventTarget};
use nexus_core_db::repository::outbox;
use nexus_core_db::Database;
use nexus_core_hub::HubHandle;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub async fn run(db: Database, hub: HubHandle, cfg: OutboxConfig, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_millis(cfg.drain_interval_ms));
    let mut gc_tick: u64 = 0;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                tracing::info!("outbox drainer shutting down");
                return;
            }
            _ = interval.tick() => {
                if let Err(e) = drain_once(&db, &hub, cfg.drain_batch_size).await {
                    tracing::error!(error = %e, "outbox drain pass failed");
                }

                gc_tick += 1;
                if gc_tick % 120 == 0 {
                    match outbox::delete_processed_older_than(&db.pool, cfg.retention_hours).await {
                        Ok(n) if n > 0 => tracing::debug!(deleted = n, "garbage-collected processed outbox rows"),
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "outbox garbage collection failed"),
                    }
                }
            }
        }
    }
}

async fn drain_once(db: &Database, hub: &HubHandle, batch_size: i64) -> anyhow::Result<()> {
    let pending = outbox::fetch_pending(&db.pool, batch_size).await?;
    for row in pending {
        let Some(kind) = EventKind::parse(&row.event_type) else {
            tracing::warn!(event_type = %row.event_type, id = %row.id, "unknown outbox event_type, skipping");
            continue;
        };

        let target = resolve_target(&row.payload);
        hub.dispatch(target, Event::new(kind, row.payload.clone())).await;
        outbox::mark_processed(&db.pool, row.id).await?;
    }
    Ok(())
}

fn resolve_target(payload: &serde_json::Value) -> EventTarget {
    payload
        .get("conversation_id")
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
        .map(EventTarget::Conversation)
        .unwrap_or_else(|| EventTarget::Users(Vec::new()))
}
