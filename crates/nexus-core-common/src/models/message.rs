//! Message and per-device ciphertext models — the ingest pipeline's output.
//!
//! A `Message` is a sequence-numbered envelope; it never carries plaintext.
//! The payload clients care about lives in `MessageCiphertext` rows, one per
//! recipient device, addressed by device ID rather than user ID.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Receipt,
    Control,
}

/// A sequence-numbered, conversation-scoped message record.
///
/// `seq_id` is assigned exactly once at commit time and is thereafter
/// immutable; `idempotency_key`, when present, is globally unique across
/// all messages and makes retried sends safe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub sender_device_id: Uuid,
    pub client_message_id: Option<String>,
    pub idempotency_key: Option<String>,
    pub seq_id: i64,
    pub message_type: MessageType,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// One recipient device's encrypted envelope of a message. The unit the
/// DeliveryHub actually serves; unique on `(message_id, recipient_device_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageCiphertext {
    pub message_id: Uuid,
    pub recipient_user_id: Uuid,
    pub recipient_device_id: Uuid,
    pub sender_device_id: Uuid,
    /// Opaque encrypted envelope bytes, base64-encoded for JSON transport.
    pub ciphertext: String,
    /// Opaque ratchet/session header bytes, base64-encoded.
    pub header: String,
}

/// A `Message` joined with the ciphertext rows a particular recipient
/// device is entitled to see.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageWithCiphertext {
    #[serde(flatten)]
    pub message: Message,
    pub ciphertext: MessageCiphertext,
}

// ============================================================
// API request / response shapes
// ============================================================

#[derive(Debug, Deserialize)]
pub struct CiphertextInput {
    pub recipient_device_id: Uuid,
    pub ciphertext: String,
    pub header: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SendMessageRequest {
    pub sender_device_id: Uuid,
    #[serde(default)]
    pub message_type: Option<MessageType>,
    pub client_message_id: Option<String>,
    pub idempotency_key: Option<String>,
    #[validate(length(min = 1, message = "ciphertexts must be non-empty"))]
    pub ciphertexts: Vec<CiphertextInput>,
}

#[derive(Debug, Deserialize)]
pub struct ConversationMessagesQuery {
    pub before_seq: Option<i64>,
    pub limit: Option<i64>,
    pub recipient_device_id: Uuid,
}
