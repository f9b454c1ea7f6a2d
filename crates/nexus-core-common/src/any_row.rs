//! Manual `sqlx::FromRow<'_, sqlx::any::AnyRow>` implementations for all
//! nexus-core-common model types.
//!
//! `sqlx::AnyPool` only decodes primitive types natively (i64, f64, bool,
//! String, bytes).  UUID and DateTime columns must be decoded as `String` and
//! then parsed.  JSON columns are stored as JSON text.
//!
//! **Why manual instead of `#[derive(sqlx::FromRow)]`?**
//! The derive macro generates a *blanket* `impl<DB>` with trait bounds.  Rust's
//! coherence checker rejects a manual `impl<AnyRow>` alongside that blanket even
//! when the bounds are never satisfied for `Any`, because a future downstream
//! crate might add the missing impls.  Removing the derive from the struct and
//! writing the impl directly sidesteps the conflict entirely.

use chrono::{DateTime, Utc};
use sqlx::{any::AnyRow, Row};
use uuid::Uuid;

use crate::models::conversation::{Conversation, ConversationSequence, ConversationType, Participant, ParticipantRole};
use crate::models::crypto::{Device, DeviceVerification, IdentityKey, OneTimePreKey, SignedPreKey, VerificationMethod};
use crate::models::message::{Message, MessageCiphertext, MessageType};
use crate::models::outbox::OutboxEvent;

// ── Internal helpers ──────────────────────────────────────────────────────────

fn uuid(row: &AnyRow, col: &str) -> Result<Uuid, sqlx::Error> {
    let s: String = row.try_get(col)?;
    Uuid::parse_str(&s).map_err(|e| sqlx::Error::Decode(Box::new(e) as _))
}

fn opt_uuid(row: &AnyRow, col: &str) -> Result<Option<Uuid>, sqlx::Error> {
    let s: Option<String> = row.try_get(col)?;
    s.map(|v| Uuid::parse_str(&v).map_err(|e| sqlx::Error::Decode(Box::new(e) as _)))
        .transpose()
}

fn dt(row: &AnyRow, col: &str) -> Result<DateTime<Utc>, sqlx::Error> {
    let s: String = row.try_get(col)?;
    parse_dt(&s).map_err(sqlx::Error::Decode)
}

fn opt_dt(row: &AnyRow, col: &str) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
    let s: Option<String> = row.try_get(col)?;
    s.map(|v| parse_dt(&v).map_err(sqlx::Error::Decode)).transpose()
}

fn parse_dt(s: &str) -> Result<DateTime<Utc>, Box<dyn std::error::Error + Send + Sync + 'static>> {
    if let Ok(d) = DateTime::parse_from_rfc3339(s) {
        return Ok(d.with_timezone(&Utc));
    }
    if let Ok(d) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(d.and_utc());
    }
    if let Ok(d) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(d.and_utc());
    }
    Err(format!("cannot parse timestamp '{s}'").into())
}

fn json(row: &AnyRow, col: &str) -> Result<serde_json::Value, sqlx::Error> {
    let s: String = row.try_get(col)?;
    serde_json::from_str(&s).map_err(|e| sqlx::Error::Decode(Box::new(e) as _))
}

fn parse_enum<T>(row: &AnyRow, col: &str, f: impl Fn(&str) -> Option<T>) -> Result<T, sqlx::Error> {
    let s: String = row.try_get(col)?;
    f(&s).ok_or_else(|| sqlx::Error::Decode(format!("unknown enum variant: {s}").into()))
}

// ── Device ────────────────────────────────────────────────────────────────────

impl<'r> sqlx::FromRow<'r, AnyRow> for Device {
    fn from_row(row: &'r AnyRow) -> Result<Self, sqlx::Error> {
        Ok(Device {
            id: uuid(row, "id")?,
            user_id: uuid(row, "user_id")?,
            name: row.try_get("name")?,
            active: row.try_get("active")?,
            last_seen_at: opt_dt(row, "last_seen_at")?,
            verified: row.try_get("verified")?,
            created_at: dt(row, "created_at")?,
            updated_at: dt(row, "updated_at")?,
        })
    }
}

// ── IdentityKey ───────────────────────────────────────────────────────────────

impl<'r> sqlx::FromRow<'r, AnyRow> for IdentityKey {
    fn from_row(row: &'r AnyRow) -> Result<Self, sqlx::Error> {
        Ok(IdentityKey {
            id: uuid(row, "id")?,
            user_id: uuid(row, "user_id")?,
            device_id: uuid(row, "device_id")?,
            public_key: row.try_get("public_key")?,
            is_active: row.try_get("is_active")?,
            created_at: dt(row, "created_at")?,
        })
    }
}

// ── SignedPreKey ──────────────────────────────────────────────────────────────

impl<'r> sqlx::FromRow<'r, AnyRow> for SignedPreKey {
    fn from_row(row: &'r AnyRow) -> Result<Self, sqlx::Error> {
        Ok(SignedPreKey {
            id: uuid(row, "id")?,
            user_id: uuid(row, "user_id")?,
            device_id: uuid(row, "device_id")?,
            key_id: row.try_get("key_id")?,
            public_key: row.try_get("public_key")?,
            signature: row.try_get("signature")?,
            is_active: row.try_get("is_active")?,
            created_at: dt(row, "created_at")?,
        })
    }
}

// ── OneTimePreKey ─────────────────────────────────────────────────────────────

impl<'r> sqlx::FromRow<'r, AnyRow> for OneTimePreKey {
    fn from_row(row: &'r AnyRow) -> Result<Self, sqlx::Error> {
        Ok(OneTimePreKey {
            id: uuid(row, "id")?,
            user_id: uuid(row, "user_id")?,
            device_id: uuid(row, "device_id")?,
            key_id: row.try_get("key_id")?,
            public_key: row.try_get("public_key")?,
            uploaded_at: dt(row, "uploaded_at")?,
            consumed_at: opt_dt(row, "consumed_at")?,
            consumed_by: opt_uuid(row, "consumed_by")?,
            consumed_by_device_id: opt_uuid(row, "consumed_by_device_id")?,
        })
    }
}

// ── DeviceVerification ────────────────────────────────────────────────────────

impl<'r> sqlx::FromRow<'r, AnyRow> for DeviceVerification {
    fn from_row(row: &'r AnyRow) -> Result<Self, sqlx::Error> {
        Ok(DeviceVerification {
            id: uuid(row, "id")?,
            verifier_id: uuid(row, "verifier_id")?,
            target_device_id: uuid(row, "target_device_id")?,
            method: parse_enum(row, "method", |s| match s {
                "safety_number" => Some(VerificationMethod::SafetyNumber),
                "qr_scan" => Some(VerificationMethod::QrScan),
                "emoji" => Some(VerificationMethod::Emoji),
                _ => None,
            })?,
            verified_at: dt(row, "verified_at")?,
        })
    }
}

// ── Conversation ──────────────────────────────────────────────────────────────

impl<'r> sqlx::FromRow<'r, AnyRow> for Conversation {
    fn from_row(row: &'r AnyRow) -> Result<Self, sqlx::Error> {
        Ok(Conversation {
            id: uuid(row, "id")?,
            conversation_type: parse_enum(row, "conversation_type", |s| match s {
                "DM" => Some(ConversationType::Dm),
                "GROUP" => Some(ConversationType::Group),
                _ => None,
            })?,
            created_at: dt(row, "created_at")?,
        })
    }
}

// ── Participant ───────────────────────────────────────────────────────────────

impl<'r> sqlx::FromRow<'r, AnyRow> for Participant {
    fn from_row(row: &'r AnyRow) -> Result<Self, sqlx::Error> {
        Ok(Participant {
            conversation_id: uuid(row, "conversation_id")?,
            user_id: uuid(row, "user_id")?,
            role: parse_enum(row, "role", |s| match s {
                "OWNER" => Some(ParticipantRole::Owner),
                "ADMIN" => Some(ParticipantRole::Admin),
                "MEMBER" => Some(ParticipantRole::Member),
                _ => None,
            })?,
            last_read_sequence: row.try_get("last_read_sequence")?,
            joined_at: dt(row, "joined_at")?,
            removed_at: opt_dt(row, "removed_at")?,
        })
    }
}

// ── ConversationSequence ──────────────────────────────────────────────────────

impl<'r> sqlx::FromRow<'r, AnyRow> for ConversationSequence {
    fn from_row(row: &'r AnyRow) -> Result<Self, sqlx::Error> {
        Ok(ConversationSequence {
            conversation_id: uuid(row, "conversation_id")?,
            last_sequence: row.try_get("last_sequence")?,
            updated_at: dt(row, "updated_at")?,
        })
    }
}

// ── Message ───────────────────────────────────────────────────────────────────

impl<'r> sqlx::FromRow<'r, AnyRow> for Message {
    fn from_row(row: &'r AnyRow) -> Result<Self, sqlx::Error> {
        Ok(Message {
            id: uuid(row, "id")?,
            conversation_id: uuid(row, "conversation_id")?,
            sender_id: uuid(row, "sender_id")?,
            sender_device_id: uuid(row, "sender_device_id")?,
            client_message_id: row.try_get("client_message_id")?,
            idempotency_key: row.try_get("idempotency_key")?,
            seq_id: row.try_get("seq_id")?,
            message_type: parse_enum(row, "message_type", |s| match s {
                "text" => Some(MessageType::Text),
                "receipt" => Some(MessageType::Receipt),
                "control" => Some(MessageType::Control),
                _ => None,
            })?,
            created_at: dt(row, "created_at")?,
            deleted_at: opt_dt(row, "deleted_at")?,
        })
    }
}

// ── MessageCiphertext ─────────────────────────────────────────────────────────

impl<'r> sqlx::FromRow<'r, AnyRow> for MessageCiphertext {
    fn from_row(row: &'r AnyRow) -> Result<Self, sqlx::Error> {
        Ok(MessageCiphertext {
            message_id: uuid(row, "message_id")?,
            recipient_user_id: uuid(row, "recipient_user_id")?,
            recipient_device_id: uuid(row, "recipient_device_id")?,
            sender_device_id: uuid(row, "sender_device_id")?,
            ciphertext: row.try_get("ciphertext")?,
            header: row.try_get("header")?,
        })
    }
}

// ── OutboxEvent ───────────────────────────────────────────────────────────────

impl<'r> sqlx::FromRow<'r, AnyRow> for OutboxEvent {
    fn from_row(row: &'r AnyRow) -> Result<Self, sqlx::Error> {
        Ok(OutboxEvent {
            id: uuid(row, "id")?,
            event_type: row.try_get("event_type")?,
            payload: json(row, "payload")?,
            created_at: dt(row, "created_at")?,
            processed_at: opt_dt(row, "processed_at")?,
        })
    }
}
