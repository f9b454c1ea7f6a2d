//! Outbox repository — the transactional-outbox write and the drainer's
//! read-and-mark-processed cycle.
//!
//! A business write (e.g. inserting a `Message`) and its outbox row commit
//! in the same transaction, so a crash between "wrote the message" and
//! "published the event" is impossible — the drainer picks up anything
//! still unprocessed on the next tick, giving at-least-once delivery.

use anyhow::Result;
use nexus_core_common::models::outbox::OutboxEvent;
use uuid::Uuid;

/// Record an event for publication, inside an already-open transaction.
pub async fn record_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Any>,
    event_type: &str,
    payload: &serde_json::Value,
) -> Result<Uuid> {
    let id = Uuid::now_v7();
    sqlx::query(
        r#"
        INSERT INTO outbox_events (id, event_type, payload, created_at)
        VALUES (?, ?, ?, CURRENT_TIMESTAMP)
        "#,
    )
    .bind(id.to_string())
    .bind(event_type)
    .bind(serde_json::to_string(payload)?)
    .execute(&mut **tx)
    .await?;
    Ok(id)
}

/// Fetch a batch of unprocessed events, oldest first, for the drainer to
/// publish. Does not lock rows — the drainer is expected to run as a single
/// instance; concurrent drainers would double-publish (harmless, since
/// consumers are idempotent) rather than lose events.
pub async fn fetch_pending(pool: &sqlx::AnyPool, limit: i64) -> Result<Vec<OutboxEvent>> {
    let rows = sqlx::query_as::<_, OutboxEvent>(
        r#"
        SELECT * FROM outbox_events
        WHERE processed_at IS NULL
        ORDER BY created_at ASC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn mark_processed(pool: &sqlx::AnyPool, id: Uuid) -> Result<()> {
    sqlx::query("UPDATE outbox_events SET processed_at = CURRENT_TIMESTAMP WHERE id = ?")
        .bind(id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// Garbage-collect processed rows older than `older_than_hours` so the
/// table doesn't grow unbounded once the drainer has long since caught up.
pub async fn delete_processed_older_than(pool: &sqlx::AnyPool, older_than_hours: i64) -> Result<u64> {
    let cutoff = chrono::Utc::now() - chrono::Duration::hours(older_than_hours);
    let result = sqlx::query("DELETE FROM outbox_events WHERE processed_at IS NOT NULL AND processed_at < ?")
        .bind(cutoff.to_rfc3339())
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::any::AnyPoolOptions;

    async fn setup() -> sqlx::AnyPool {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query(
            r#"
            CREATE TABLE outbox_events (
                id TEXT PRIMARY KEY,
                event_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                processed_at TEXT
            )
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();
        pool
    }

    #[tokio::test]
    async fn fetch_pending_excludes_processed_rows() {
        let pool = setup().await;
        let mut tx = pool.begin().await.unwrap();
        let id_a = record_tx(&mut tx, "message.new", &serde_json::json!({"n": 1})).await.unwrap();
        let id_b = record_tx(&mut tx, "message.new", &serde_json::json!({"n": 2})).await.unwrap();
        tx.commit().await.unwrap();

        mark_processed(&pool, id_a).await.unwrap();

        let pending = fetch_pending(&pool, 10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id_b);
    }

    #[tokio::test]
    async fn fetch_pending_is_oldest_first_and_respects_limit() {
        let pool = setup().await;
        let mut ids = Vec::new();
        for i in 0..5 {
            let mut tx = pool.begin().await.unwrap();
            let id = record_tx(&mut tx, "message.new", &serde_json::json!({"n": i})).await.unwrap();
            tx.commit().await.unwrap();
            ids.push(id);
        }

        let pending = fetch_pending(&pool, 3).await.unwrap();
        assert_eq!(pending.len(), 3);
        assert_eq!(pending.iter().map(|e| e.id).collect::<Vec<_>>(), ids[..3]);
    }
}
