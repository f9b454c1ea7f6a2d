//! Message routes — the MessageIngest contract's HTTP surface.
//!
//! POST /conversations/:conversation_id/messages
//! GET  /conversations/:conversation_id/messages
//! POST /messages/:message_id/read
//! POST /messages/:message_id/delivered

use axum::{
    extract::{Extension, Path, Query, State},
    middleware,
    routing::{get, post},
    Json, Router,
};
use nexus_core_common::{
    error::{NexusError, NexusResult},
    models::conversation::DeliveryReceipt,
    models::message::{ConversationMessagesQuery, Message, MessageWithCiphertext, SendMessageRequest},
    validation::validate_request,
};
use nexus_core_db::repository::{keystore, messages, outbox, participants};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::{middleware::AuthContext, AppState};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/conversations/:conversation_id/messages",
            post(send_message).get(get_conversation_messages),
        )
        .route("/messages/:message_id/read", post(mark_read))
        .route("/messages/:message_id/delivered", post(mark_delivered))
        .route_layer(middleware::from_fn(crate::middleware::auth_middleware))
}

#[derive(Debug, Deserialize)]
struct MarkReadBody {
    conversation_id: Uuid,
    seq_id: i64,
}

/// POST /conversations/:conversation_id/messages
async fn send_message(
    Extension(auth): Extension<AuthContext>,
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<Uuid>,
    Json(body): Json<SendMessageRequest>,
) -> NexusResult<Json<Message>> {
    validate_request(&body)?;

    if !participants::is_participant(&state.db.pool, conversation_id, auth.user_id).await? {
        return Err(NexusError::PermissionDenied);
    }
    if !keystore::device_belongs_to_user(&state.db.pool, body.sender_device_id, auth.user_id).await? {
        return Err(NexusError::PermissionDenied);
    }

    if let Some(key) = &body.idempotency_key {
        if let Some(existing) = messages::find_by_idempotency_key(&state.db.pool, body.sender_device_id, key).await? {
            return Ok(Json(existing));
        }
    }

    let message_type = body.message_type.unwrap_or(nexus_core_common::models::message::MessageType::Text);
    let (message, outbox_id) = messages::send_message(
        &state.db.pool,
        conversation_id,
        auth.user_id,
        body.sender_device_id,
        message_type,
        body.client_message_id.as_deref(),
        body.idempotency_key.as_deref(),
        &body.ciphertexts,
    )
    .await?;

    let recipient_device_ids: Vec<Uuid> = body.ciphertexts.iter().map(|c| c.recipient_device_id).collect();
    let payload = serde_json::json!({
        "message_id": message.id,
        "conversation_id": conversation_id,
        "sender_id": auth.user_id,
        "sender_device_id": body.sender_device_id,
        "seq_id": message.seq_id,
        "recipient_device_ids": recipient_device_ids,
    });
    state
        .hub
        .dispatch(
            nexus_core_common::event::EventTarget::Conversation(conversation_id),
            nexus_core_common::event::Event::new(nexus_core_common::event::EventKind::MessageNew, payload),
        )
        .await;

    // Direct dispatch above already delivered this event; mark the outbox
    // row processed so the drainer's next poll doesn't redeliver it. If this
    // write is lost to a crash between dispatch and here, the row stays
    // pending and the drainer becomes the delivery path, same as for a crash
    // before dispatch ever ran.
    outbox::mark_processed(&state.db.pool, outbox_id).await?;

    Ok(Json(message))
}

/// GET /conversations/:conversation_id/messages?before_seq=&limit=&recipient_device_id=
async fn get_conversation_messages(
    Extension(auth): Extension<AuthContext>,
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<Uuid>,
    Query(params): Query<ConversationMessagesQuery>,
) -> NexusResult<Json<Vec<MessageWithCiphertext>>> {
    if !participants::is_participant(&state.db.pool, conversation_id, auth.user_id).await? {
        return Err(NexusError::PermissionDenied);
    }
    if !keystore::device_belongs_to_user(&state.db.pool, params.recipient_device_id, auth.user_id).await? {
        return Err(NexusError::PermissionDenied);
    }

    let limit = params.limit.unwrap_or(50);
    let rows = messages::get_conversation_messages(
        &state.db.pool,
        conversation_id,
        params.recipient_device_id,
        params.before_seq,
        limit,
    )
    .await?;
    Ok(Json(rows))
}

/// POST /messages/:message_id/read
async fn mark_read(
    Extension(auth): Extension<AuthContext>,
    State(state): State<Arc<AppState>>,
    Path(message_id): Path<Uuid>,
    Json(body): Json<MarkReadBody>,
) -> NexusResult<()> {
    let _ = message_id;
    if !participants::is_participant(&state.db.pool, body.conversation_id, auth.user_id).await? {
        return Err(NexusError::PermissionDenied);
    }

    participants::mark_read(&state.db.pool, body.conversation_id, auth.user_id, body.seq_id).await?;

    let payload = serde_json::json!({
        "conversation_id": body.conversation_id,
        "user_id": auth.user_id,
        "seq_id": body.seq_id,
    });
    state
        .hub
        .dispatch(
            nexus_core_common::event::EventTarget::Conversation(body.conversation_id),
            nexus_core_common::event::Event::new(nexus_core_common::event::EventKind::MessageRead, payload),
        )
        .await;

    Ok(())
}

/// POST /messages/:message_id/delivered
async fn mark_delivered(
    Extension(auth): Extension<AuthContext>,
    State(state): State<Arc<AppState>>,
    Path(message_id): Path<Uuid>,
) -> NexusResult<Json<DeliveryReceipt>> {
    let message = messages::find_by_id(&state.db.pool, message_id)
        .await?
        .ok_or(NexusError::NotFound {
            resource: "message".into(),
        })?;
    if !participants::is_participant(&state.db.pool, message.conversation_id, auth.user_id).await? {
        return Err(NexusError::PermissionDenied);
    }

    let receipt = messages::mark_delivered(&state.db.pool, message_id, auth.user_id).await?;
    Ok(Json(receipt))
}
