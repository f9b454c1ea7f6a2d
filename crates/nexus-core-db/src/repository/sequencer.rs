//! Sequencer — allocates the strictly-monotonic, gapless-on-success sequence
//! number each message in a conversation gets.
//!
//! A single `UPSERT … RETURNING` round-trip does the serialization: the
//! database's row-level lock on the conflicting `conversation_sequences` row
//! is what makes concurrent allocation for the same conversation safe. This
//! must never be replaced by a read-then-write (`SELECT MAX… ; INSERT …`)
//! pair — that loses the lock and lets two senders race to the same number.

use anyhow::Result;
use uuid::Uuid;

/// Allocate and return the next sequence number for `conversation_id`.
///
/// First call for a conversation returns 1. Safe to call concurrently from
/// many connections — the conflicting row serializes allocation.
pub async fn next(pool: &sqlx::AnyPool, conversation_id: Uuid) -> Result<i64> {
    #[derive(sqlx::FromRow)]
    struct SeqRow {
        last_sequence: i64,
    }

    let row = sqlx::query_as::<_, SeqRow>(
        r#"
        INSERT INTO conversation_sequences (conversation_id, last_sequence, updated_at)
        VALUES (?, 1, CURRENT_TIMESTAMP)
        ON CONFLICT (conversation_id) DO UPDATE SET
            last_sequence = conversation_sequences.last_sequence + 1,
            updated_at = CURRENT_TIMESTAMP
        RETURNING last_sequence
        "#,
    )
    .bind(conversation_id.to_string())
    .fetch_one(pool)
    .await?;

    Ok(row.last_sequence)
}

/// Same allocation, but performed against an open transaction so the caller
/// can commit the allocated sequence atomically with the message row it
/// belongs to.
pub async fn next_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Any>,
    conversation_id: Uuid,
) -> Result<i64> {
    #[derive(sqlx::FromRow)]
    struct SeqRow {
        last_sequence: i64,
    }

    let row = sqlx::query_as::<_, SeqRow>(
        r#"
        INSERT INTO conversation_sequences (conversation_id, last_sequence, updated_at)
        VALUES (?, 1, CURRENT_TIMESTAMP)
        ON CONFLICT (conversation_id) DO UPDATE SET
            last_sequence = conversation_sequences.last_sequence + 1,
            updated_at = CURRENT_TIMESTAMP
        RETURNING last_sequence
        "#,
    )
    .bind(conversation_id.to_string())
    .fetch_one(&mut **tx)
    .await?;

    Ok(row.last_sequence)
}

/// Read the current high-water mark without allocating (for diagnostics).
pub async fn current(pool: &sqlx::AnyPool, conversation_id: Uuid) -> Result<i64> {
    #[derive(sqlx::FromRow)]
    struct SeqRow {
        last_sequence: i64,
    }

    let row = sqlx::query_as::<_, SeqRow>(
        "SELECT last_sequence FROM conversation_sequences WHERE conversation_id = ?",
    )
    .bind(conversation_id.to_string())
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.last_sequence).unwrap_or(0))
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
            CREATE TABLE conversation_sequences (
                conversation_id TEXT PRIMARY KEY,
                last_sequence BIGINT NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();
        pool
    }

    #[tokio::test]
    async fn allocates_strictly_increasing_sequence() {
        let pool = setup().await;
        let conv = Uuid::now_v7();

        let first = next(&pool, conv).await.unwrap();
        let second = next(&pool, conv).await.unwrap();
        let third = next(&pool, conv).await.unwrap();

        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(third, 3);
    }

    #[tokio::test]
    async fn sequences_are_independent_per_conversation() {
        let pool = setup().await;
        let conv_a = Uuid::now_v7();
        let conv_b = Uuid::now_v7();

        assert_eq!(next(&pool, conv_a).await.unwrap(), 1);
        assert_eq!(next(&pool, conv_b).await.unwrap(), 1);
        assert_eq!(next(&pool, conv_a).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn concurrent_allocation_never_duplicates() {
        let pool = setup().await;
        let conv = Uuid::now_v7();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move { next(&pool, conv).await.unwrap() }));
        }

        let mut seen = Vec::new();
        for h in handles {
            seen.push(h.await.unwrap());
        }
        seen.sort();
        let expected: Vec<i64> = (1..=20).collect();
        assert_eq!(seen, expected, "every allocation must be unique and contiguous");
    }
}
