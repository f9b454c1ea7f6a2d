//! # nexus-core-hub
//!
//! Realtime delivery — a single-writer actor owns every connected
//! WebSocket session; this module owns the socket-facing half: upgrading
//! connections, running each session's read/write pumps, and translating
//! client frames into calls against [`actor::HubHandle`].
//!
//! Protocol: JSON text frames both ways. Server → client frames are
//! [`nexus_core_common::event::Event`] verbatim. Client → server frames are
//! [`ClientFrame`] — typing indicators, read/delivery receipts, and call
//! signaling relay. The hub never interprets ciphertext; it only routes.

pub mod actor;
pub mod session;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use nexus_core_common::config::HubConfig;
use nexus_core_common::event::{Event, EventKind, EventTarget};
use nexus_core_db::repository::{messages, participants};
use nexus_core_db::Database;
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;

pub use actor::{HubHandle, RegisterOutcome};

/// Shared state behind the gateway route.
#[derive(Clone)]
pub struct GatewayState {
    pub db: Database,
    pub hub: HubHandle,
    pub jwt_secret: String,
    pub cfg: HubConfig,
}

pub fn build_router(state: GatewayState) -> Router {
    Router::new()
        .route("/gateway", get(ws_handler))
        .with_state(Arc::new(state))
}

#[derive(Debug, Deserialize)]
struct ConnectParams {
    /// Bearer token passed as a query parameter — browsers cannot attach
    /// custom headers to the WebSocket handshake.
    token: String,
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
    Query(params): Query<ConnectParams>,
) -> Response {
    match nexus_core_common::auth::verify_bearer_token(&params.token, &state.jwt_secret) {
        Ok(identity) => ws.on_upgrade(move |socket| {
            handle_connection(socket, state, identity.user_id, identity.device_id)
        }),
        Err(_) => Response::builder()
            .status(axum::http::StatusCode::UNAUTHORIZED)
            .body(axum::body::Body::empty())
            .unwrap(),
    }
}

/// Client → server frames. Anything addressed to a conversation fans out
/// to every other active participant; the hub resolves membership itself.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    Typing { conversation_id: Uuid, started: bool },
    Read { conversation_id: Uuid, seq_id: i64 },
    Delivered { message_id: Uuid },
    CallOffer { conversation_id: Uuid, payload: serde_json::Value },
    CallAnswer { conversation_id: Uuid, payload: serde_json::Value },
    CallIce { conversation_id: Uuid, payload: serde_json::Value },
    CallEnded { conversation_id: Uuid, payload: serde_json::Value },
}

async fn handle_connection(
    socket: WebSocket,
    state: Arc<GatewayState>,
    user_id: Uuid,
    device_id: Uuid,
) {
    let (outbound_tx, outbound_rx) = mpsc::channel(state.cfg.session_outbound_queue_depth);

    let outcome = state.hub.register(user_id, device_id, outbound_tx).await;
    let session_id = match outcome {
        RegisterOutcome::Registered { session_id } => session_id,
        RegisterOutcome::RateLimited => {
            tracing::warn!(%user_id, "connect rejected — per-user connect rate limit exceeded");
            return;
        }
    };

    let (sink, stream) = socket.split();
    let write_deadline = Duration::from_secs(state.cfg.write_deadline_secs);
    let ping_interval = Duration::from_secs(state.cfg.ping_interval_secs);

    let write_task = tokio::spawn(write_pump(sink, outbound_rx, write_deadline, ping_interval));

    read_pump(stream, &state, user_id, device_id).await;

    write_task.abort();
    state.hub.unregister(user_id, session_id).await;
    tracing::info!(%user_id, %device_id, %session_id, "session disconnected");
}

/// Forwards hub-dispatched events to the socket, and sends a periodic ping
/// to keep intermediaries from closing an idle connection. A write that
/// doesn't complete within `write_deadline` is treated as a dead peer.
async fn write_pump(
    mut sink: futures_util::stream::SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<Event>,
    write_deadline: Duration,
    ping_interval: Duration,
) {
    let mut ticker = tokio::time::interval(ping_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if tokio::time::timeout(write_deadline, sink.send(Message::Ping(Vec::new().into())))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            event = outbound_rx.recv() => {
                let Some(event) = event else { break };
                let Ok(text) = serde_json::to_string(&event) else { continue };
                if tokio::time::timeout(write_deadline, sink.send(Message::Text(text.into())))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        }
    }
    let _ = sink.close().await;
}

async fn read_pump(
    mut stream: futures_util::stream::SplitStream<WebSocket>,
    state: &Arc<GatewayState>,
    user_id: Uuid,
    device_id: Uuid,
) {
    while let Some(Ok(msg)) = stream.next().await {
        match msg {
            Message::Text(text) => {
                let Ok(frame) = serde_json::from_str::<ClientFrame>(&text) else {
                    continue;
                };
                handle_client_frame(state, user_id, device_id, frame).await;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
}

async fn handle_client_frame(
    state: &Arc<GatewayState>,
    user_id: Uuid,
    device_id: Uuid,
    frame: ClientFrame,
) {
    match frame {
        ClientFrame::Typing { conversation_id, started } => {
            let kind = if started {
                EventKind::TypingStarted
            } else {
                EventKind::TypingStopped
            };
            let payload = serde_json::json!({
                "conversation_id": conversation_id,
                "user_id": user_id,
                "device_id": device_id,
            });
            state
                .hub
                .dispatch(EventTarget::Conversation(conversation_id), Event::new(kind, payload))
                .await;
        }
        ClientFrame::Read { conversation_id, seq_id } => {
            if let Err(e) = participants::mark_read(&state.db.pool, conversation_id, user_id, seq_id).await {
                tracing::error!(error = %e, %conversation_id, %user_id, "failed to record read cursor");
                return;
            }
            let payload = serde_json::json!({
                "conversation_id": conversation_id,
                "user_id": user_id,
                "seq_id": seq_id,
            });
            state
                .hub
                .dispatch(
                    EventTarget::Conversation(conversation_id),
                    Event::new(EventKind::MessageRead, payload),
                )
                .await;
        }
        ClientFrame::Delivered { message_id } => {
            if let Err(e) = messages::mark_delivered(&state.db.pool, message_id, user_id).await {
                tracing::error!(error = %e, %message_id, %user_id, "failed to record delivery receipt");
            }
        }
        ClientFrame::CallOffer { conversation_id, payload } => {
            relay_call_signal(state, conversation_id, EventKind::CallOffer, payload).await;
        }
        ClientFrame::CallAnswer { conversation_id, payload } => {
            relay_call_signal(state, conversation_id, EventKind::CallAnswer, payload).await;
        }
        ClientFrame::CallIce { conversation_id, payload } => {
            relay_call_signal(state, conversation_id, EventKind::CallIce, payload).await;
        }
        ClientFrame::CallEnded { conversation_id, payload } => {
            relay_call_signal(state, conversation_id, EventKind::CallEnded, payload).await;
        }
    }
}

async fn relay_call_signal(
    state: &Arc<GatewayState>,
    conversation_id: Uuid,
    kind: EventKind,
    payload: serde_json::Value,
) {
    state
        .hub
        .dispatch(EventTarget::Conversation(conversation_id), Event::new(kind, payload))
        .await;
}
