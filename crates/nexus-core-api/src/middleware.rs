//! Middleware — bearer token extraction for the REST surface.

use axum::{extract::Request, http::header, middleware::Next, response::Response};
use nexus_core_common::error::NexusError;

/// Identity extracted from a verified bearer token, attached to request
/// extensions for handlers to pull out with `Extension<AuthContext>`.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: uuid::Uuid,
    pub device_id: uuid::Uuid,
}

/// Extract and verify the JWT from the `Authorization: Bearer <token>` header.
/// Minting tokens is an external service's job; this middleware only checks
/// the signature and shape the rest of the API relies on.
pub async fn auth_middleware(mut request: Request, next: Next) -> Result<Response, NexusError> {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(NexusError::Unauthenticated)?;

    let token = auth_header.strip_prefix("Bearer ").ok_or(NexusError::Unauthenticated)?;

    let config = nexus_core_common::config::get();
    let identity = nexus_core_common::auth::verify_bearer_token(token, &config.auth.jwt_secret)?;

    request.extensions_mut().insert(AuthContext {
        user_id: identity.user_id,
        device_id: identity.device_id,
    });

    Ok(next.run(request).await)
}

impl AuthContext {
    pub fn from_request_extensions(extensions: &axum::http::Extensions) -> Result<&Self, NexusError> {
        extensions.get::<AuthContext>().ok_or(NexusError::Unauthenticated)
    }
}
