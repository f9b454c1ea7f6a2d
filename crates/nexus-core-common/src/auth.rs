//! Shared bearer-credential verification.
//!
//! Password hashing and token minting are external collaborators — this
//! module implements only the consumer side of the `AuthVerifier` contract:
//! decode a bearer token into `(user_id, device_id)`. Both the API and the
//! hub use it so neither depends on how tokens are issued.

use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::NexusError;

/// JWT claims embedded in access tokens minted by the external auth service.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject — user ID as string.
    pub sub: String,
    /// Device ID as string — the addressable unit for encryption.
    pub device_id: String,
    pub iat: i64,
    pub exp: i64,
}

/// Bearer credentials, verified and resolved to a user and device.
#[derive(Debug, Clone, Copy)]
pub struct VerifiedIdentity {
    pub user_id: Uuid,
    pub device_id: Uuid,
}

/// Decode and validate a JWT, resolving it to a `VerifiedIdentity`.
///
/// This is the entire `AuthVerifier` contract the core relies on: validate
/// bearer credentials, return user and device IDs. Minting tokens is the
/// external auth service's job.
pub fn verify_bearer_token(token: &str, secret: &str) -> Result<VerifiedIdentity, NexusError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| NexusError::Unauthenticated)?;

    let user_id = data
        .claims
        .sub
        .parse::<Uuid>()
        .map_err(|_| NexusError::Unauthenticated)?;
    let device_id = data
        .claims
        .device_id
        .parse::<Uuid>()
        .map_err(|_| NexusError::Unauthenticated)?;

    Ok(VerifiedIdentity { user_id, device_id })
}
