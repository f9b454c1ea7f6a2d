//! Realtime event types — shared between the API and the DeliveryHub.
//!
//! The API builds these when conversation state changes (message sent, read
//! receipt recorded, call signaling relayed) and hands them to the hub for
//! fan-out. The hub never looks inside `payload` beyond routing — the event's
//! addressing fields decide who receives it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The realtime event types the hub fans out. Anything else is rejected at
/// construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    MessageNew,
    MessageRead,
    TypingStarted,
    TypingStopped,
    CallOffer,
    CallAnswer,
    CallIce,
    CallEnded,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MessageNew => "message.new",
            Self::MessageRead => "message.read",
            Self::TypingStarted => "typing.started",
            Self::TypingStopped => "typing.stopped",
            Self::CallOffer => "call.offer",
            Self::CallAnswer => "call.answer",
            Self::CallIce => "call.ice",
            Self::CallEnded => "call.ended",
        }
    }

    /// Inverse of [`as_str`](Self::as_str) — used by the outbox drainer to
    /// recover the kind from a persisted `event_type` column.
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "message.new" => Self::MessageNew,
            "message.read" => Self::MessageRead,
            "typing.started" => Self::TypingStarted,
            "typing.stopped" => Self::TypingStopped,
            "call.offer" => Self::CallOffer,
            "call.answer" => Self::CallAnswer,
            "call.ice" => Self::CallIce,
            "call.ended" => Self::CallEnded,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn as_str_and_parse_round_trip_for_every_kind() {
        let all = [
            EventKind::MessageNew,
            EventKind::MessageRead,
            EventKind::TypingStarted,
            EventKind::TypingStopped,
            EventKind::CallOffer,
            EventKind::CallAnswer,
            EventKind::CallIce,
            EventKind::CallEnded,
        ];
        for kind in all {
            assert_eq!(EventKind::parse(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn parse_rejects_unknown_event_types() {
        assert_eq!(EventKind::parse("bogus.event"), None);
    }
}

/// Addressing for a realtime event — who should receive it, distinct from
/// what it carries. A conversation-scoped event addresses every active
/// participant's devices; a directed event (e.g. call signaling) addresses
/// one user's devices directly.
#[derive(Debug, Clone)]
pub enum EventTarget {
    Conversation(Uuid),
    Users(Vec<Uuid>),
}

/// An event dispatched to the hub for delivery to connected sessions. Never
/// carries ciphertext — recipients re-read per-device rows from storage when
/// the event references a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(kind: EventKind, payload: serde_json::Value) -> Self {
        Self {
            kind,
            payload,
            timestamp: Utc::now(),
        }
    }
}
