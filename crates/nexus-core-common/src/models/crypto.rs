//! Key-management domain models — the X3DH consumer contract.
//!
//! These types represent the long-lived, medium-lived, and one-shot key
//! material the server holds on behalf of each device. The server is
//! *deliberately* blind to plaintexts and to private key material:
//!   - It stores only *public* key bytes.
//!   - `KeyBundle` is never persisted — it is synthesized on read from the
//!     active identity key, active signed prekey, and at most one
//!     just-consumed one-time prekey.
//!
//! # Signal Protocol summary
//! ```text
//! Registration:
//!   client -> server: IdentityKey (long-lived public key bound to a device)
//!                     SignedPreKey (medium-lived, signed by the identity key)
//!                     OneTimePreKeys (single-use, uploaded in bulk)
//!
//! Key Exchange (X3DH):
//!   initiator fetches target device's key bundle, derives shared secret locally
//!   server marks the consumed one-time prekey as used, exactly once
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================
// Devices
// ============================================================

/// A registered device belonging to a user — the addressable unit for
/// encryption. All key material and ciphertexts are device-scoped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub active: bool,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================
// Identity keys
// ============================================================

/// Long-lived public key bound to a device. At most one active row per
/// (user, device) — uploading a new one deactivates the prior row in the
/// same transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityKey {
    pub id: Uuid,
    pub user_id: Uuid,
    pub device_id: Uuid,
    /// Ed25519 public key, base64-encoded.
    pub public_key: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

// ============================================================
// Signed prekeys
// ============================================================

/// Medium-lived key signed by the identity key, rotated on a schedule.
/// At most one active row per (user, device).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedPreKey {
    pub id: Uuid,
    pub user_id: Uuid,
    pub device_id: Uuid,
    pub key_id: i32,
    /// X25519 public key, base64-encoded.
    pub public_key: String,
    /// Ed25519 signature over `public_key`, base64-encoded.
    pub signature: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

// ============================================================
// One-time prekeys
// ============================================================

/// Single-use public key. Consuming it means marking it used and handing
/// it back exactly once — `consumed_at` never clears once set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OneTimePreKey {
    pub id: Uuid,
    pub user_id: Uuid,
    pub device_id: Uuid,
    pub key_id: i32,
    pub public_key: String,
    pub uploaded_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
    pub consumed_by: Option<Uuid>,
    pub consumed_by_device_id: Option<Uuid>,
}

impl OneTimePreKey {
    pub fn is_consumed(&self) -> bool {
        self.consumed_at.is_some()
    }
}

// ============================================================
// Key bundle (derived view, never stored)
// ============================================================

/// Identity key + active signed prekey + optionally one just-consumed
/// one-time prekey for the target (user, device). A bundle without a
/// one-time prekey is valid — it means the pool was exhausted, not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyBundle {
    pub user_id: Uuid,
    pub device_id: Uuid,
    pub identity_key: String,
    pub signed_pre_key_id: i32,
    pub signed_pre_key: String,
    pub signed_pre_key_signature: String,
    pub one_time_pre_key: Option<OtpkPublic>,
}

/// One-time prekey public data, as handed to a consumer inside a bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtpkPublic {
    pub key_id: i32,
    pub public_key: String,
}

// ============================================================
// Device verification (supplemental — out-of-band safety number check)
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum VerificationMethod {
    SafetyNumber,
    QrScan,
    Emoji,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceVerification {
    pub id: Uuid,
    pub verifier_id: Uuid,
    pub target_device_id: Uuid,
    pub method: VerificationMethod,
    pub verified_at: DateTime<Utc>,
}

// ============================================================
// API request / response shapes
// ============================================================

#[derive(Debug, Deserialize)]
pub struct UploadIdentityKeyRequest {
    pub public_key: String,
}

#[derive(Debug, Deserialize)]
pub struct UploadSignedPreKeyRequest {
    pub key_id: i32,
    pub public_key: String,
    pub signature: String,
}

#[derive(Debug, Deserialize)]
pub struct UploadOneTimePreKeysRequest {
    pub keys: Vec<OtpkUpload>,
}

#[derive(Debug, Deserialize)]
pub struct OtpkUpload {
    pub key_id: i32,
    pub public_key: String,
}

#[derive(Debug, Serialize)]
pub struct OtpkCountResponse {
    pub device_id: Uuid,
    pub remaining: i64,
}

#[derive(Debug, Deserialize)]
pub struct VerifyDeviceRequest {
    pub method: VerificationMethod,
}

#[derive(Debug, Serialize)]
pub struct SafetyNumberResponse {
    pub local_identity_key: String,
    pub remote_identity_key: String,
    /// 60-digit decimal fingerprint, grouped in fives.
    pub fingerprint: String,
}
