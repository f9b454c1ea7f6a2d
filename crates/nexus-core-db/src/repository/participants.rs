//! Participant repository — conversation membership.
//!
//! A `Participant` row is the only path by which a user becomes addressable
//! for a conversation's traffic. There is no implicit membership: ingest,
//! fan-out, and the hub's connect-time membership snapshot all resolve
//! through this module.

use anyhow::Result;
use chrono::Utc;
use nexus_core_common::models::conversation::{
    Conversation, ConversationType, Participant, ParticipantRole,
};
use uuid::Uuid;

pub async fn create_conversation(
    pool: &sqlx::AnyPool,
    conversation_type: ConversationType,
) -> Result<Conversation> {
    let type_str = match conversation_type {
        ConversationType::Dm => "DM",
        ConversationType::Group => "GROUP",
    };
    let row = sqlx::query_as::<_, Conversation>(
        r#"
        INSERT INTO conversations (id, conversation_type, created_at)
        VALUES (?, ?, CURRENT_TIMESTAMP)
        RETURNING *
        "#,
    )
    .bind(Uuid::now_v7().to_string())
    .bind(type_str)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

pub async fn add_participant(
    pool: &sqlx::AnyPool,
    conversation_id: Uuid,
    user_id: Uuid,
    role: ParticipantRole,
) -> Result<Participant> {
    let role_str = match role {
        ParticipantRole::Owner => "OWNER",
        ParticipantRole::Admin => "ADMIN",
        ParticipantRole::Member => "MEMBER",
    };
    let row = sqlx::query_as::<_, Participant>(
        r#"
        INSERT INTO participants (conversation_id, user_id, role, last_read_sequence, joined_at)
        VALUES (?, ?, ?, 0, CURRENT_TIMESTAMP)
        ON CONFLICT (conversation_id, user_id) DO UPDATE SET
            role = excluded.role,
            removed_at = NULL
        RETURNING *
        "#,
    )
    .bind(conversation_id.to_string())
    .bind(user_id.to_string())
    .bind(role_str)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

pub async fn remove_participant(pool: &sqlx::AnyPool, conversation_id: Uuid, user_id: Uuid) -> Result<()> {
    sqlx::query(
        "UPDATE participants SET removed_at = CURRENT_TIMESTAMP WHERE conversation_id = ? AND user_id = ?",
    )
    .bind(conversation_id.to_string())
    .bind(user_id.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

/// Is `user_id` an active (not removed) participant of `conversation_id`?
/// The guard every ingest and history read must pass before touching a
/// conversation's rows.
pub async fn is_participant(pool: &sqlx::AnyPool, conversation_id: Uuid, user_id: Uuid) -> Result<bool> {
    #[derive(sqlx::FromRow)]
    struct ExistsRow {
        matched: i64,
    }
    let row = sqlx::query_as::<_, ExistsRow>(
        r#"
        SELECT COUNT(*) AS matched FROM participants
        WHERE conversation_id = ? AND user_id = ? AND removed_at IS NULL
        "#,
    )
    .bind(conversation_id.to_string())
    .bind(user_id.to_string())
    .fetch_one(pool)
    .await?;
    Ok(row.matched != 0)
}

pub async fn get_role(
    pool: &sqlx::AnyPool,
    conversation_id: Uuid,
    user_id: Uuid,
) -> Result<Option<ParticipantRole>> {
    let row = sqlx::query_as::<_, Participant>(
        "SELECT * FROM participants WHERE conversation_id = ? AND user_id = ? AND removed_at IS NULL",
    )
    .bind(conversation_id.to_string())
    .bind(user_id.to_string())
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|p| p.role))
}

/// Active participants of a conversation — the fan-out set for a message.
pub async fn list_active_participants(pool: &sqlx::AnyPool, conversation_id: Uuid) -> Result<Vec<Participant>> {
    let rows = sqlx::query_as::<_, Participant>(
        "SELECT * FROM participants WHERE conversation_id = ? AND removed_at IS NULL",
    )
    .bind(conversation_id.to_string())
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Snapshot the conversation IDs a user currently belongs to — the hub reads
/// this once at connect time to know what a session should subscribe to.
pub async fn list_membership_for_user(pool: &sqlx::AnyPool, user_id: Uuid, page_cap: i64) -> Result<Vec<Uuid>> {
    #[derive(sqlx::FromRow)]
    struct ConvIdRow {
        conversation_id: String,
    }
    let rows = sqlx::query_as::<_, ConvIdRow>(
        "SELECT conversation_id FROM participants WHERE user_id = ? AND removed_at IS NULL LIMIT ?",
    )
    .bind(user_id.to_string())
    .bind(page_cap)
    .fetch_all(pool)
    .await?;
    rows.into_iter()
        .map(|r| Uuid::parse_str(&r.conversation_id).map_err(anyhow::Error::from))
        .collect()
}

/// Advance a user's read cursor. Always upserts — a read/delivered receipt
/// for a user with no prior row creates one rather than erroring, since a
/// first-ever read is a normal occurrence, not a missing-state bug.
pub async fn mark_read(
    pool: &sqlx::AnyPool,
    conversation_id: Uuid,
    user_id: Uuid,
    seq_id: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO participants (conversation_id, user_id, role, last_read_sequence, joined_at)
        VALUES (?, ?, 'MEMBER', ?, ?)
        ON CONFLICT (conversation_id, user_id) DO UPDATE SET
            last_read_sequence = CASE
                WHEN excluded.last_read_sequence > participants.last_read_sequence
                THEN excluded.last_read_sequence
                ELSE participants.last_read_sequence
            END
        "#,
    )
    .bind(conversation_id.to_string())
    .bind(user_id.to_string())
    .bind(seq_id)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
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
            CREATE TABLE conversations (
                id TEXT PRIMARY KEY,
                conversation_type TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            r#"
            CREATE TABLE participants (
                conversation_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                role TEXT NOT NULL,
                last_read_sequence BIGINT NOT NULL DEFAULT 0,
                joined_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                removed_at TEXT,
                UNIQUE(conversation_id, user_id)
            )
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();
        pool
    }

    #[tokio::test]
    async fn removed_participant_is_excluded_until_re_added() {
        let pool = setup().await;
        let conv = create_conversation(&pool, ConversationType::Group).await.unwrap();
        let alice = Uuid::now_v7();

        add_participant(&pool, conv.id, alice, ParticipantRole::Member).await.unwrap();
        assert!(is_participant(&pool, conv.id, alice).await.unwrap());

        remove_participant(&pool, conv.id, alice).await.unwrap();
        assert!(!is_participant(&pool, conv.id, alice).await.unwrap());
        assert_eq!(list_active_participants(&pool, conv.id).await.unwrap().len(), 0);

        add_participant(&pool, conv.id, alice, ParticipantRole::Member).await.unwrap();
        assert!(is_participant(&pool, conv.id, alice).await.unwrap());
    }

    #[tokio::test]
    async fn mark_read_never_moves_the_cursor_backwards() {
        let pool = setup().await;
        let conv = create_conversation(&pool, ConversationType::Dm).await.unwrap();
        let alice = Uuid::now_v7();
        add_participant(&pool, conv.id, alice, ParticipantRole::Member).await.unwrap();

        mark_read(&pool, conv.id, alice, 5).await.unwrap();
        mark_read(&pool, conv.id, alice, 3).await.unwrap();

        let role = get_role(&pool, conv.id, alice).await.unwrap();
        assert_eq!(role, Some(ParticipantRole::Member));

        let participants = list_active_participants(&pool, conv.id).await.unwrap();
        assert_eq!(participants[0].last_read_sequence, 5);

        mark_read(&pool, conv.id, alice, 9).await.unwrap();
        let participants = list_active_participants(&pool, conv.id).await.unwrap();
        assert_eq!(participants[0].last_read_sequence, 9);
    }

    #[tokio::test]
    async fn list_membership_for_user_respects_page_cap() {
        let pool = setup().await;
        let alice = Uuid::now_v7();
        for _ in 0..5 {
            let conv = create_conversation(&pool, ConversationType::Dm).await.unwrap();
            add_participant(&pool, conv.id, alice, ParticipantRole::Member).await.unwrap();
        }

        let full = list_membership_for_user(&pool, alice, 100).await.unwrap();
        assert_eq!(full.len(), 5);

        let capped = list_membership_for_user(&pool, alice, 2).await.unwrap();
        assert_eq!(capped.len(), 2);
    }
}
