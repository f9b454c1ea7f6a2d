//! Key-material routes — the KeyStore contract's HTTP surface.
//!
//! POST /devices/:device_id/identity-key
//! POST /devices/:device_id/signed-pre-key
//! POST /devices/:device_id/signed-pre-key/rotate
//! POST /devices/:device_id/one-time-pre-keys
//! GET  /devices/:device_id/one-time-pre-keys/count
//! GET  /users/:user_id/devices/:device_id/key-bundle
//!
//! Device creation itself is not part of this surface — devices come into
//! existence through the external auth/provisioning flow that mints the
//! bearer token this API consumes.

use axum::{
    extract::{Extension, Path, State},
    middleware,
    routing::{get, post},
    Json, Router,
};
use nexus_core_common::{
    crypto::{validate_identity_key, validate_signature, validate_x25519_key},
    error::{NexusError, NexusResult},
    models::crypto::{
        KeyBundle, OtpkCountResponse, UploadIdentityKeyRequest, UploadOneTimePreKeysRequest,
        UploadSignedPreKeyRequest,
    },
};
use nexus_core_db::repository::keystore;
use std::sync::Arc;
use uuid::Uuid;

use crate::{middleware::AuthContext, AppState};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/devices/:device_id/identity-key", post(upload_identity_key))
        .route("/devices/:device_id/signed-pre-key", post(upload_signed_pre_key))
        .route("/devices/:device_id/signed-pre-key/rotate", post(rotate_signed_pre_key))
        .route(
            "/devices/:device_id/one-time-pre-keys",
            post(upload_one_time_pre_keys),
        )
        .route(
            "/devices/:device_id/one-time-pre-keys/count",
            get(count_one_time_pre_keys),
        )
        .route(
            "/users/:user_id/devices/:device_id/key-bundle",
            get(get_device_key_bundle),
        )
        .route_layer(middleware::from_fn(crate::middleware::auth_middleware))
}

/// Every upload under `/devices/:device_id/...` must target a device owned
/// by the caller's own user, enforced the same way on each route.
async fn require_owned_device(
    state: &AppState,
    auth: &AuthContext,
    device_id: Uuid,
) -> NexusResult<()> {
    if !keystore::device_belongs_to_user(&state.db.pool, device_id, auth.user_id).await? {
        return Err(NexusError::PermissionDenied);
    }
    Ok(())
}

async fn upload_identity_key(
    Extension(auth): Extension<AuthContext>,
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<Uuid>,
    Json(body): Json<UploadIdentityKeyRequest>,
) -> NexusResult<Json<nexus_core_common::models::crypto::IdentityKey>> {
    require_owned_device(&state, &auth, device_id).await?;

    validate_identity_key(&body.public_key).map_err(|e| NexusError::InvalidInput {
        message: format!("public_key: {e}"),
    })?;

    let key = keystore::put_identity_key(&state.db.pool, auth.user_id, device_id, &body.public_key).await?;
    Ok(Json(key))
}

async fn upload_signed_pre_key(
    Extension(auth): Extension<AuthContext>,
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<Uuid>,
    Json(body): Json<UploadSignedPreKeyRequest>,
) -> NexusResult<Json<nexus_core_common::models::crypto::SignedPreKey>> {
    require_owned_device(&state, &auth, device_id).await?;
    validate_pre_key(&body)?;

    let key = keystore::put_signed_pre_key(
        &state.db.pool,
        auth.user_id,
        device_id,
        body.key_id,
        &body.public_key,
        &body.signature,
    )
    .await?;
    Ok(Json(key))
}

async fn rotate_signed_pre_key(
    Extension(auth): Extension<AuthContext>,
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<Uuid>,
    Json(body): Json<UploadSignedPreKeyRequest>,
) -> NexusResult<Json<nexus_core_common::models::crypto::SignedPreKey>> {
    require_owned_device(&state, &auth, device_id).await?;
    validate_pre_key(&body)?;

    let key = keystore::rotate_signed_pre_key(
        &state.db.pool,
        auth.user_id,
        device_id,
        body.key_id,
        &body.public_key,
        &body.signature,
    )
    .await?;
    Ok(Json(key))
}

fn validate_pre_key(body: &UploadSignedPreKeyRequest) -> NexusResult<()> {
    validate_x25519_key(&body.public_key, "public_key").map_err(|e| NexusError::InvalidInput {
        message: format!("public_key: {e}"),
    })?;
    validate_signature(&body.signature).map_err(|e| NexusError::InvalidInput {
        message: format!("signature: {e}"),
    })?;
    Ok(())
}

async fn upload_one_time_pre_keys(
    Extension(auth): Extension<AuthContext>,
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<Uuid>,
    Json(body): Json<UploadOneTimePreKeysRequest>,
) -> NexusResult<Json<OtpkCountResponse>> {
    require_owned_device(&state, &auth, device_id).await?;

    if body.keys.is_empty() || body.keys.len() > 1000 {
        return Err(NexusError::InvalidInput {
            message: "must upload between 1 and 1000 one-time pre-keys".into(),
        });
    }
    for k in &body.keys {
        validate_x25519_key(&k.public_key, "public_key").map_err(|e| NexusError::InvalidInput {
            message: format!("one_time_pre_key {}: {e}", k.key_id),
        })?;
    }

    let pairs: Vec<(i32, String)> = body.keys.iter().map(|k| (k.key_id, k.public_key.clone())).collect();
    keystore::put_one_time_pre_keys(&state.db.pool, auth.user_id, device_id, &pairs).await?;

    let remaining = keystore::count_available_pre_keys(&state.db.pool, device_id).await?;
    Ok(Json(OtpkCountResponse { device_id, remaining }))
}

async fn count_one_time_pre_keys(
    Extension(auth): Extension<AuthContext>,
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<Uuid>,
) -> NexusResult<Json<OtpkCountResponse>> {
    require_owned_device(&state, &auth, device_id).await?;
    let remaining = keystore::count_available_pre_keys(&state.db.pool, device_id).await?;
    Ok(Json(OtpkCountResponse { device_id, remaining }))
}

async fn get_device_key_bundle(
    Extension(auth): Extension<AuthContext>,
    State(state): State<Arc<AppState>>,
    Path((_user_id, device_id)): Path<(Uuid, Uuid)>,
) -> NexusResult<Json<KeyBundle>> {
    // A self-addressed lookup surfaces as `NexusError::PermissionDenied`
    // through this `?` (the `From<anyhow::Error>` impl downcasts it rather
    // than flattening it to a 500); every other miss is a genuine 404.
    let bundle = keystore::get_key_bundle(&state.db.pool, device_id, auth.user_id, auth.device_id)
        .await?
        .ok_or(NexusError::NotFound {
            resource: "key bundle".into(),
        })?;
    Ok(Json(bundle))
}
