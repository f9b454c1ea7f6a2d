//! Transactional outbox — the mechanism that makes at-least-once publication
//! independent of commit. A business row and its outbox row are written in
//! the same transaction; a background drainer re-publishes anything whose
//! `processed_at` is still null.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub event_type: String,
    /// JSON payload — no ciphertext ever lives here; consumers re-read
    /// per-device rows from storage.
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl OutboxEvent {
    pub fn is_pending(&self) -> bool {
        self.processed_at.is_none()
    }
}
