//! Conversation, participation, and sequencing models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum ConversationType {
    Dm,
    Group,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub conversation_type: ConversationType,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum ParticipantRole {
    Owner,
    Admin,
    Member,
}

/// Creation of a `Participant` row is the only path by which a user becomes
/// addressable for a conversation's traffic — there is no implicit
/// membership.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub role: ParticipantRole,
    pub last_read_sequence: i64,
    pub joined_at: DateTime<Utc>,
    pub removed_at: Option<DateTime<Utc>>,
}

impl Participant {
    pub fn is_active(&self) -> bool {
        self.removed_at.is_none()
    }
}

/// One row per conversation; owns the monotonic counter the Sequencer
/// serializes allocation against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSequence {
    pub conversation_id: Uuid,
    pub last_sequence: i64,
    pub updated_at: DateTime<Utc>,
}

// ============================================================
// Read / delivery receipts
// ============================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub delivered_at: DateTime<Utc>,
}
