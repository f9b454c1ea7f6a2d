//! A connected session — one live WebSocket, owned entirely by the hub
//! actor. Nothing outside the actor task ever touches the session table
//! directly; this struct is the record the actor keeps about each one.

use std::time::Instant;

use nexus_core_common::event::Event;
use tokio::sync::mpsc;
use uuid::Uuid;

/// The actor's handle to one connected client. `outbound_tx` is the only
/// channel between the actor and that session's write pump — bounded, so a
/// slow reader backs up here rather than stalling the actor.
pub struct SessionHandle {
    pub session_id: Uuid,
    pub device_id: Uuid,
    pub outbound_tx: mpsc::Sender<Event>,
    pub connected_at: Instant,
}
