//! Message ingest repository — the transactional core of sending a message.
//!
//! `send_message` is the one place sequence allocation, message persistence,
//! per-recipient ciphertext fan-out, and the outbox write all happen inside
//! a single transaction. If any step fails, the whole transaction rolls
//! back and the sender's retry (same `idempotency_key`) is safe.

use anyhow::Result;
use chrono::Utc;
use nexus_core_common::error::NexusError;
use nexus_core_common::models::conversation::DeliveryReceipt;
use nexus_core_common::models::message::{
    CiphertextInput, Message, MessageCiphertext, MessageType, MessageWithCiphertext,
};
use uuid::Uuid;

use crate::repository::{outbox, sequencer};

/// Look up a message previously stored under this idempotency key, if any.
/// A retried send with the same key returns the original result instead of
/// allocating a second sequence number.
pub async fn find_by_idempotency_key(
    pool: &sqlx::AnyPool,
    sender_device_id: Uuid,
    idempotency_key: &str,
) -> Result<Option<Message>> {
    let row = sqlx::query_as::<_, Message>(
        "SELECT * FROM messages WHERE sender_device_id = ? AND idempotency_key = ?",
    )
    .bind(sender_device_id.to_string())
    .bind(idempotency_key)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn find_by_id(pool: &sqlx::AnyPool, message_id: Uuid) -> Result<Option<Message>> {
    let row = sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE id = ?")
        .bind(message_id.to_string())
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// Send a message: allocate its sequence number, persist the envelope and
/// per-recipient ciphertexts, and record the fan-out event in the outbox —
/// all inside one transaction.
///
/// Returns the persisted message together with the id of the outbox row
/// recording its fan-out event. Callers that direct-dispatch the event
/// themselves must mark that row processed (`outbox::mark_processed`) once
/// the dispatch succeeds, so the background drainer doesn't redeliver it.
///
/// Pre-checks (sender participation, non-empty ciphertexts, recipient
/// device validity, idempotency lookup) are the caller's responsibility;
/// this function assumes they already passed.
pub async fn send_message(
    pool: &sqlx::AnyPool,
    conversation_id: Uuid,
    sender_id: Uuid,
    sender_device_id: Uuid,
    message_type: MessageType,
    client_message_id: Option<&str>,
    idempotency_key: Option<&str>,
    ciphertexts: &[CiphertextInput],
) -> Result<(Message, Uuid)> {
    let message_type_str = match message_type {
        MessageType::Text => "text",
        MessageType::Receipt => "receipt",
        MessageType::Control => "control",
    };

    let mut tx = pool.begin().await?;

    let seq_id = sequencer::next_tx(&mut tx, conversation_id).await?;
    let message_id = Uuid::now_v7();

    let message = sqlx::query_as::<_, Message>(
        r#"
        INSERT INTO messages
            (id, conversation_id, sender_id, sender_device_id, client_message_id,
             idempotency_key, seq_id, message_type, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
        RETURNING *
        "#,
    )
    .bind(message_id.to_string())
    .bind(conversation_id.to_string())
    .bind(sender_id.to_string())
    .bind(sender_device_id.to_string())
    .bind(client_message_id)
    .bind(idempotency_key)
    .bind(seq_id)
    .bind(message_type_str)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| match &e {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            anyhow::Error::new(NexusError::Conflict {
                message: "idempotency_key already used with a different payload".into(),
            })
        }
        _ => anyhow::Error::from(e),
    })?;

    for c in ciphertexts {
        // A recipient device must both exist and belong to a user who is
        // still an active participant of this conversation — a device whose
        // owner was removed from the conversation is rejected rather than
        // silently fanned out to.
        let recipient_user_id = sqlx::query_as::<_, (String,)>(
            r#"
            SELECT d.user_id FROM devices d
            JOIN participants p ON p.conversation_id = ? AND p.user_id = d.user_id AND p.removed_at IS NULL
            WHERE d.id = ?
            "#,
        )
        .bind(conversation_id.to_string())
        .bind(c.recipient_device_id.to_string())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| {
            anyhow::Error::new(NexusError::InvalidInput {
                message: format!(
                    "recipient device {} is not an active participant of this conversation",
                    c.recipient_device_id
                ),
            })
        })?
        .0;

        sqlx::query(
            r#"
            INSERT INTO message_ciphertexts
                (message_id, recipient_user_id, recipient_device_id, sender_device_id, ciphertext, header)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(message_id.to_string())
        .bind(recipient_user_id)
        .bind(c.recipient_device_id.to_string())
        .bind(sender_device_id.to_string())
        .bind(&c.ciphertext)
        .bind(&c.header)
        .execute(&mut *tx)
        .await?;
    }

    let payload = serde_json::json!({
        "message_id": message_id,
        "conversation_id": conversation_id,
        "sender_id": sender_id,
        "sender_device_id": sender_device_id,
        "seq_id": seq_id,
        "recipient_device_ids": ciphertexts.iter().map(|c| c.recipient_device_id).collect::<Vec<_>>(),
    });
    let outbox_id = outbox::record_tx(&mut tx, "message.new", &payload).await?;

    tx.commit().await?;
    Ok((message, outbox_id))
}

/// Fetch the conversation history visible to one recipient device, newest
/// first if `before_seq` is unset, otherwise strictly older than it. Pulls
/// every message in range regardless of message type or delivery state —
/// filtering what a client chooses to render is a client concern.
pub async fn get_conversation_messages(
    pool: &sqlx::AnyPool,
    conversation_id: Uuid,
    recipient_device_id: Uuid,
    before_seq: Option<i64>,
    limit: i64,
) -> Result<Vec<MessageWithCiphertext>> {
    let limit = limit.clamp(1, 200);

    #[derive(sqlx::FromRow)]
    struct JoinedRow {
        // message columns
        m_id: String,
        m_conversation_id: String,
        m_sender_id: String,
        m_sender_device_id: String,
        m_client_message_id: Option<String>,
        m_idempotency_key: Option<String>,
        m_seq_id: i64,
        m_message_type: String,
        m_created_at: String,
        m_deleted_at: Option<String>,
        // ciphertext columns
        c_recipient_user_id: String,
        c_recipient_device_id: String,
        c_sender_device_id: String,
        c_ciphertext: String,
        c_header: String,
    }

    let rows = if let Some(before) = before_seq {
        sqlx::query_as::<_, JoinedRow>(
            r#"
            SELECT
                m.id AS m_id, m.conversation_id AS m_conversation_id, m.sender_id AS m_sender_id,
                m.sender_device_id AS m_sender_device_id, m.client_message_id AS m_client_message_id,
                m.idempotency_key AS m_idempotency_key, m.seq_id AS m_seq_id,
                m.message_type AS m_message_type, m.created_at AS m_created_at, m.deleted_at AS m_deleted_at,
                c.recipient_user_id AS c_recipient_user_id, c.recipient_device_id AS c_recipient_device_id,
                c.sender_device_id AS c_sender_device_id, c.ciphertext AS c_ciphertext, c.header AS c_header
            FROM messages m
            JOIN message_ciphertexts c ON c.message_id = m.id
            WHERE m.conversation_id = ? AND c.recipient_device_id = ? AND m.seq_id < ?
            ORDER BY m.seq_id DESC
            LIMIT ?
            "#,
        )
        .bind(conversation_id.to_string())
        .bind(recipient_device_id.to_string())
        .bind(before)
        .bind(limit)
        .fetch_all(pool)
        .await?
    } else {
        sqlx::query_as::<_, JoinedRow>(
            r#"
            SELECT
                m.id AS m_id, m.conversation_id AS m_conversation_id, m.sender_id AS m_sender_id,
                m.sender_device_id AS m_sender_device_id, m.client_message_id AS m_client_message_id,
                m.idempotency_key AS m_idempotency_key, m.seq_id AS m_seq_id,
                m.message_type AS m_message_type, m.created_at AS m_created_at, m.deleted_at AS m_deleted_at,
                c.recipient_user_id AS c_recipient_user_id, c.recipient_device_id AS c_recipient_device_id,
                c.sender_device_id AS c_sender_device_id, c.ciphertext AS c_ciphertext, c.header AS c_header
            FROM messages m
            JOIN message_ciphertexts c ON c.message_id = m.id
            WHERE m.conversation_id = ? AND c.recipient_device_id = ?
            ORDER BY m.seq_id DESC
            LIMIT ?
            "#,
        )
        .bind(conversation_id.to_string())
        .bind(recipient_device_id.to_string())
        .bind(limit)
        .fetch_all(pool)
        .await?
    };

    rows.into_iter()
        .map(|r| {
            Ok(MessageWithCiphertext {
                message: Message {
                    id: Uuid::parse_str(&r.m_id)?,
                    conversation_id: Uuid::parse_str(&r.m_conversation_id)?,
                    sender_id: Uuid::parse_str(&r.m_sender_id)?,
                    sender_device_id: Uuid::parse_str(&r.m_sender_device_id)?,
                    client_message_id: r.m_client_message_id,
                    idempotency_key: r.m_idempotency_key,
                    seq_id: r.m_seq_id,
                    message_type: match r.m_message_type.as_str() {
                        "text" => MessageType::Text,
                        "receipt" => MessageType::Receipt,
                        "control" => MessageType::Control,
                        other => {
                            return Err(anyhow::anyhow!("unknown message_type: {other}"));
                        }
                    },
                    created_at: parse_timestamp(&r.m_created_at)?,
                    deleted_at: r.m_deleted_at.as_deref().map(parse_timestamp).transpose()?,
                },
                ciphertext: MessageCiphertext {
                    message_id: Uuid::parse_str(&r.m_id)?,
                    recipient_user_id: Uuid::parse_str(&r.c_recipient_user_id)?,
                    recipient_device_id: Uuid::parse_str(&r.c_recipient_device_id)?,
                    sender_device_id: Uuid::parse_str(&r.c_sender_device_id)?,
                    ciphertext: r.c_ciphertext,
                    header: r.c_header,
                },
            })
        })
        .collect()
}

fn parse_timestamp(s: &str) -> Result<chrono::DateTime<Utc>> {
    if let Ok(d) = chrono::DateTime::parse_from_rfc3339(s) {
        return Ok(d.with_timezone(&Utc));
    }
    if let Ok(d) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(d.and_utc());
    }
    if let Ok(d) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(d.and_utc());
    }
    Err(anyhow::anyhow!("cannot parse timestamp '{s}'"))
}

/// Record that `user_id` has delivered (not necessarily read) up to and
/// including `message_id`. Always upserts on first contact.
pub async fn mark_delivered(
    pool: &sqlx::AnyPool,
    message_id: Uuid,
    user_id: Uuid,
) -> Result<DeliveryReceipt> {
    let row = sqlx::query_as::<_, DeliveryReceiptRow>(
        r#"
        INSERT INTO delivery_receipts (message_id, user_id, delivered_at)
        VALUES (?, ?, CURRENT_TIMESTAMP)
        ON CONFLICT (message_id, user_id) DO UPDATE SET delivered_at = delivery_receipts.delivered_at
        RETURNING message_id, user_id, delivered_at
        "#,
    )
    .bind(message_id.to_string())
    .bind(user_id.to_string())
    .fetch_one(pool)
    .await?;
    Ok(DeliveryReceipt {
        message_id: Uuid::parse_str(&row.message_id)?,
        user_id: Uuid::parse_str(&row.user_id)?,
        delivered_at: parse_timestamp(&row.delivered_at)?,
    })
}

#[derive(sqlx::FromRow)]
struct DeliveryReceiptRow {
    message_id: String,
    user_id: String,
    delivered_at: String,
}
