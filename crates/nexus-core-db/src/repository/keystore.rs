//! Key-store repository — CRUD and atomic consumption for E2EE key material.
//!
//! The server is *write-once* for identity keys per device generation and
//! *consume-once* for one-time pre-keys (the X3DH exchange's scarce
//! resource). All functions run against `AnyPool` so the same code path
//! serves both Postgres and SQLite.

use anyhow::Result;
use chrono::{DateTime, Utc};
use nexus_core_common::error::NexusError;
use nexus_core_common::models::crypto::{
    Device, DeviceVerification, IdentityKey, KeyBundle, OtpkPublic, SignedPreKey,
    VerificationMethod,
};
use uuid::Uuid;

// ============================================================
// Devices
// ============================================================

/// Register a new device for a user. Does not take key material — identity
/// key, signed prekey, and one-time prekeys are uploaded as separate calls
/// once the device row exists.
pub async fn create_device(pool: &sqlx::AnyPool, user_id: Uuid, name: &str) -> Result<Device> {
    let row = sqlx::query_as::<_, Device>(
        r#"
        INSERT INTO devices (id, user_id, name, active, verified, created_at, updated_at)
        VALUES (?, ?, ?, true, false, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)
        RETURNING *
        "#,
    )
    .bind(Uuid::now_v7().to_string())
    .bind(user_id.to_string())
    .bind(name)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

pub async fn list_devices(pool: &sqlx::AnyPool, user_id: Uuid) -> Result<Vec<Device>> {
    let rows = sqlx::query_as::<_, Device>(
        "SELECT * FROM devices WHERE user_id = ? AND active = true ORDER BY created_at ASC",
    )
    .bind(user_id.to_string())
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn find_device(pool: &sqlx::AnyPool, device_id: Uuid) -> Result<Option<Device>> {
    let row = sqlx::query_as::<_, Device>("SELECT * FROM devices WHERE id = ?")
        .bind(device_id.to_string())
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// Ownership guard — every key-upload and device-management endpoint must
/// check this before acting on a device ID supplied by the caller.
pub async fn device_belongs_to_user(
    pool: &sqlx::AnyPool,
    device_id: Uuid,
    user_id: Uuid,
) -> Result<bool> {
    Ok(find_device(pool, device_id)
        .await?
        .is_some_and(|d| d.user_id == user_id))
}

pub async fn touch_device(pool: &sqlx::AnyPool, device_id: Uuid) -> Result<()> {
    sqlx::query("UPDATE devices SET last_seen_at = CURRENT_TIMESTAMP WHERE id = ?")
        .bind(device_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// Deactivate a device. Key material is left in place for audit but the
/// device stops being addressable for new sends and its prekeys stop being
/// handed out (callers must check `active` before returning a bundle).
pub async fn delete_device(pool: &sqlx::AnyPool, device_id: Uuid) -> Result<()> {
    sqlx::query("UPDATE devices SET active = false, updated_at = CURRENT_TIMESTAMP WHERE id = ?")
        .bind(device_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

// ============================================================
// Identity keys
// ============================================================

/// Upload an identity key for a device, deactivating any prior active key
/// in the same statement pair. Devices rotate identity keys rarely (e.g.
/// reinstall); old rows are kept for audit.
pub async fn put_identity_key(
    pool: &sqlx::AnyPool,
    user_id: Uuid,
    device_id: Uuid,
    public_key: &str,
) -> Result<IdentityKey> {
    let mut tx = pool.begin().await?;

    sqlx::query("UPDATE identity_keys SET is_active = false WHERE device_id = ? AND is_active = true")
        .bind(device_id.to_string())
        .execute(&mut *tx)
        .await?;

    let row = sqlx::query_as::<_, IdentityKey>(
        r#"
        INSERT INTO identity_keys (id, user_id, device_id, public_key, is_active, created_at)
        VALUES (?, ?, ?, ?, true, CURRENT_TIMESTAMP)
        RETURNING *
        "#,
    )
    .bind(Uuid::now_v7().to_string())
    .bind(user_id.to_string())
    .bind(device_id.to_string())
    .bind(public_key)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(row)
}

pub async fn get_active_identity_key(
    pool: &sqlx::AnyPool,
    device_id: Uuid,
) -> Result<Option<IdentityKey>> {
    let row = sqlx::query_as::<_, IdentityKey>(
        "SELECT * FROM identity_keys WHERE device_id = ? AND is_active = true",
    )
    .bind(device_id.to_string())
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

// ============================================================
// Signed prekeys
// ============================================================

/// Insert a device's first signed prekey. Plain insert, no deactivation
/// step — a device uploading its initial key material has no prior active
/// row to retire. A duplicate `(device_id, key_id)` is a client bug, not a
/// rotation, and is rejected rather than silently accepted.
pub async fn put_signed_pre_key(
    pool: &sqlx::AnyPool,
    user_id: Uuid,
    device_id: Uuid,
    key_id: i32,
    public_key: &str,
    signature: &str,
) -> Result<SignedPreKey> {
    let row = sqlx::query_as::<_, SignedPreKey>(
        r#"
        INSERT INTO signed_pre_keys (id, user_id, device_id, key_id, public_key, signature, is_active, created_at)
        VALUES (?, ?, ?, ?, ?, ?, true, CURRENT_TIMESTAMP)
        RETURNING *
        "#,
    )
    .bind(Uuid::now_v7().to_string())
    .bind(user_id.to_string())
    .bind(device_id.to_string())
    .bind(key_id)
    .bind(public_key)
    .bind(signature)
    .fetch_one(pool)
    .await
    .map_err(|e| match &e {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            anyhow::Error::new(NexusError::AlreadyExists {
                resource: "signed_pre_key".into(),
            })
        }
        _ => anyhow::Error::from(e),
    })?;
    Ok(row)
}

/// Retire the device's current active signed prekey and install a new one,
/// in one transaction. Distinct from [`put_signed_pre_key`]: this is the
/// explicit rotation path and never rejects a reused `key_id` against a
/// *different* device's rows — the existing active-per-device row is simply
/// deactivated first, so rotation never collides with itself.
pub async fn rotate_signed_pre_key(
    pool: &sqlx::AnyPool,
    user_id: Uuid,
    device_id: Uuid,
    key_id: i32,
    public_key: &str,
    signature: &str,
) -> Result<SignedPreKey> {
    let mut tx = pool.begin().await?;

    sqlx::query("UPDATE signed_pre_keys SET is_active = false WHERE device_id = ? AND is_active = true")
        .bind(device_id.to_string())
        .execute(&mut *tx)
        .await?;

    let row = sqlx::query_as::<_, SignedPreKey>(
        r#"
        INSERT INTO signed_pre_keys (id, user_id, device_id, key_id, public_key, signature, is_active, created_at)
        VALUES (?, ?, ?, ?, ?, ?, true, CURRENT_TIMESTAMP)
        RETURNING *
        "#,
    )
    .bind(Uuid::now_v7().to_string())
    .bind(user_id.to_string())
    .bind(device_id.to_string())
    .bind(key_id)
    .bind(public_key)
    .bind(signature)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(row)
}

pub async fn get_active_signed_pre_key(
    pool: &sqlx::AnyPool,
    device_id: Uuid,
) -> Result<Option<SignedPreKey>> {
    let row = sqlx::query_as::<_, SignedPreKey>(
        "SELECT * FROM signed_pre_keys WHERE device_id = ? AND is_active = true",
    )
    .bind(device_id.to_string())
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

// ============================================================
// One-time prekeys
// ============================================================

/// Bulk-insert one-time prekeys for a device. Duplicate `key_id`s for the
/// same device are rejected by the unique partial index rather than
/// silently ignored — the client is expected to pick fresh key IDs.
pub async fn put_one_time_pre_keys(
    pool: &sqlx::AnyPool,
    user_id: Uuid,
    device_id: Uuid,
    keys: &[(i32, String)],
) -> Result<usize> {
    let mut tx = pool.begin().await?;
    for (key_id, public_key) in keys {
        sqlx::query(
            r#"
            INSERT INTO onetime_prekeys (id, user_id, device_id, key_id, public_key, uploaded_at)
            VALUES (?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
            "#,
        )
        .bind(Uuid::now_v7().to_string())
        .bind(user_id.to_string())
        .bind(device_id.to_string())
        .bind(key_id)
        .bind(public_key)
        .execute(&mut *tx)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                anyhow::Error::new(NexusError::AlreadyExists {
                    resource: "one_time_pre_key".into(),
                })
            }
            _ => anyhow::Error::from(e),
        })?;
    }
    tx.commit().await?;
    Ok(keys.len())
}

/// Atomically claim one unconsumed one-time prekey for `device_id` and mark
/// it consumed by `(consumer_user_id, consumer_device_id)`. Returns `None`
/// once the device's pool is exhausted — that is a normal outcome, not an
/// error; the resulting bundle simply omits a one-time prekey.
///
/// The `WHERE id = (subselect … LIMIT 1)` shape is load-bearing: it makes
/// the row selection and the consuming update a single atomic statement, so
/// two concurrent initiators can never be handed the same key.
pub async fn consume_one_time_pre_key(
    pool: &sqlx::AnyPool,
    device_id: Uuid,
    consumer_user_id: Uuid,
    consumer_device_id: Uuid,
) -> Result<Option<OtpkPublic>> {
    #[derive(sqlx::FromRow)]
    struct OtpkRow {
        key_id: i32,
        public_key: String,
    }

    let row = sqlx::query_as::<_, OtpkRow>(
        r#"
        UPDATE onetime_prekeys
        SET consumed_at = CURRENT_TIMESTAMP,
            consumed_by = ?,
            consumed_by_device_id = ?
        WHERE id = (
            SELECT id FROM onetime_prekeys
            WHERE device_id = ? AND consumed_at IS NULL
            ORDER BY key_id ASC
            LIMIT 1
        )
        RETURNING key_id, public_key
        "#,
    )
    .bind(consumer_user_id.to_string())
    .bind(consumer_device_id.to_string())
    .bind(device_id.to_string())
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| OtpkPublic {
        key_id: r.key_id,
        public_key: r.public_key,
    }))
}

pub async fn count_available_pre_keys(pool: &sqlx::AnyPool, device_id: Uuid) -> Result<i64> {
    #[derive(sqlx::FromRow)]
    struct CountRow {
        count: i64,
    }
    let row = sqlx::query_as::<_, CountRow>(
        "SELECT COUNT(*) AS count FROM onetime_prekeys WHERE device_id = ? AND consumed_at IS NULL",
    )
    .bind(device_id.to_string())
    .fetch_one(pool)
    .await?;
    Ok(row.count)
}

/// Garbage-collect prekeys consumed before `older_than` — kept around
/// briefly for audit, then dropped so the table doesn't grow unbounded.
pub async fn delete_consumed_pre_keys_older_than(
    pool: &sqlx::AnyPool,
    older_than: DateTime<Utc>,
) -> Result<u64> {
    let result = sqlx::query("DELETE FROM onetime_prekeys WHERE consumed_at IS NOT NULL AND consumed_at < ?")
        .bind(older_than.to_rfc3339())
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

// ============================================================
// Key bundle
// ============================================================

/// Fetch a key bundle for X3DH initiation, consuming one one-time prekey in
/// the process. `consumer_user_id` must not equal the target device's
/// owner — self-addressed key exchange is never valid.
///
/// Returns `Ok(None)` only for the legitimately-missing-material cases
/// (unknown/inactive device, no active identity or signed prekey). A
/// self-addressed lookup is a permission violation, not a missing-data one,
/// and is raised as [`NexusError::PermissionDenied`] so it surfaces as 403
/// rather than 404 at the route layer.
pub async fn get_key_bundle(
    pool: &sqlx::AnyPool,
    target_device_id: Uuid,
    consumer_user_id: Uuid,
    consumer_device_id: Uuid,
) -> Result<Option<KeyBundle>> {
    let device = match find_device(pool, target_device_id).await? {
        Some(d) if d.active => d,
        _ => return Ok(None),
    };
    if device.user_id == consumer_user_id {
        return Err(anyhow::Error::new(NexusError::PermissionDenied));
    }

    let identity_key = match get_active_identity_key(pool, target_device_id).await? {
        Some(k) => k,
        None => return Ok(None),
    };
    let signed_pre_key = match get_active_signed_pre_key(pool, target_device_id).await? {
        Some(k) => k,
        None => return Ok(None),
    };
    let otpk = consume_one_time_pre_key(pool, target_device_id, consumer_user_id, consumer_device_id).await?;

    Ok(Some(KeyBundle {
        user_id: device.user_id,
        device_id: device.id,
        identity_key: identity_key.public_key,
        signed_pre_key_id: signed_pre_key.key_id,
        signed_pre_key: signed_pre_key.public_key,
        signed_pre_key_signature: signed_pre_key.signature,
        one_time_pre_key: otpk,
    }))
}

/// Fetch key bundles for every active device of a user (multi-device send
/// fan-out). Devices missing active identity/signed-prekey material are
/// skipped rather than erroring the whole call.
pub async fn get_all_key_bundles(
    pool: &sqlx::AnyPool,
    target_user_id: Uuid,
    consumer_user_id: Uuid,
    consumer_device_id: Uuid,
) -> Result<Vec<KeyBundle>> {
    let devices = list_devices(pool, target_user_id).await?;
    let mut bundles = Vec::with_capacity(devices.len());
    for device in devices {
        match get_key_bundle(pool, device.id, consumer_user_id, consumer_device_id).await {
            Ok(Some(bundle)) => bundles.push(bundle),
            Ok(None) => {}
            Err(e) if matches!(e.downcast_ref::<NexusError>(), Some(NexusError::PermissionDenied)) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(bundles)
}

// ============================================================
// Device verification
// ============================================================

pub async fn verify_device(
    pool: &sqlx::AnyPool,
    verifier_id: Uuid,
    target_device_id: Uuid,
    method: VerificationMethod,
) -> Result<DeviceVerification> {
    let method_str = match method {
        VerificationMethod::SafetyNumber => "safety_number",
        VerificationMethod::QrScan => "qr_scan",
        VerificationMethod::Emoji => "emoji",
    };

    let row = sqlx::query_as::<_, DeviceVerification>(
        r#"
        INSERT INTO device_verifications (id, verifier_id, target_device_id, method, verified_at)
        VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP)
        ON CONFLICT (verifier_id, target_device_id) DO UPDATE SET
            method = excluded.method,
            verified_at = CURRENT_TIMESTAMP
        RETURNING *
        "#,
    )
    .bind(Uuid::now_v7().to_string())
    .bind(verifier_id.to_string())
    .bind(target_device_id.to_string())
    .bind(method_str)
    .fetch_one(pool)
    .await?;

    sqlx::query("UPDATE devices SET verified = true WHERE id = ?")
        .bind(target_device_id.to_string())
        .execute(pool)
        .await?;

    Ok(row)
}

pub async fn is_device_verified(
    pool: &sqlx::AnyPool,
    verifier_id: Uuid,
    target_device_id: Uuid,
) -> Result<bool> {
    #[derive(sqlx::FromRow)]
    struct ExistsRow {
        matched: i64,
    }
    let row = sqlx::query_as::<_, ExistsRow>(
        r#"
        SELECT COUNT(*) AS matched FROM device_verifications
        WHERE verifier_id = ? AND target_device_id = ?
        "#,
    )
    .bind(verifier_id.to_string())
    .bind(target_device_id.to_string())
    .fetch_one(pool)
    .await?;
    Ok(row.matched != 0)
}

pub async fn list_verifications(pool: &sqlx::AnyPool, verifier_id: Uuid) -> Result<Vec<DeviceVerification>> {
    let rows = sqlx::query_as::<_, DeviceVerification>(
        "SELECT * FROM device_verifications WHERE verifier_id = ? ORDER BY verified_at DESC",
    )
    .bind(verifier_id.to_string())
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::any::AnyPoolOptions;

    async fn setup() -> sqlx::AnyPool {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query(
            r#"
            CREATE TABLE devices (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                active BOOLEAN NOT NULL DEFAULT true,
                last_seen_at TEXT,
                verified BOOLEAN NOT NULL DEFAULT false,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            r#"
            CREATE TABLE identity_keys (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                device_id TEXT NOT NULL,
                public_key TEXT NOT NULL,
                is_active BOOLEAN NOT NULL DEFAULT true,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            r#"
            CREATE TABLE signed_pre_keys (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                device_id TEXT NOT NULL,
                key_id INTEGER NOT NULL,
                public_key TEXT NOT NULL,
                signature TEXT NOT NULL,
                is_active BOOLEAN NOT NULL DEFAULT true,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(device_id, key_id)
            )
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            r#"
            CREATE TABLE onetime_prekeys (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                device_id TEXT NOT NULL,
                key_id INTEGER NOT NULL,
                public_key TEXT NOT NULL,
                uploaded_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                consumed_at TEXT,
                consumed_by TEXT,
                consumed_by_device_id TEXT,
                UNIQUE(device_id, key_id)
            )
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            r#"
            CREATE TABLE device_verifications (
                id TEXT PRIMARY KEY,
                verifier_id TEXT NOT NULL,
                target_device_id TEXT NOT NULL,
                method TEXT NOT NULL,
                verified_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(verifier_id, target_device_id)
            )
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();
        pool
    }

    #[tokio::test]
    async fn one_time_pre_key_is_consumed_exactly_once() {
        let pool = setup().await;
        let owner = Uuid::now_v7();
        let device = create_device(&pool, owner, "phone").await.unwrap();

        put_one_time_pre_keys(
            &pool,
            owner,
            device.id,
            &[(1, "key-a".into()), (2, "key-b".into())],
        )
        .await
        .unwrap();

        assert_eq!(count_available_pre_keys(&pool, device.id).await.unwrap(), 2);

        let consumer = Uuid::now_v7();
        let consumer_device = Uuid::now_v7();
        let first = consume_one_time_pre_key(&pool, device.id, consumer, consumer_device)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.key_id, 1);

        let second = consume_one_time_pre_key(&pool, device.id, consumer, consumer_device)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.key_id, 2);

        let third = consume_one_time_pre_key(&pool, device.id, consumer, consumer_device)
            .await
            .unwrap();
        assert!(third.is_none(), "pool is exhausted, must not hand out a key twice");
    }

    #[tokio::test]
    async fn concurrent_consumption_never_hands_out_the_same_key() {
        let pool = setup().await;
        let owner = Uuid::now_v7();
        let device = create_device(&pool, owner, "phone").await.unwrap();
        let keys: Vec<(i32, String)> = (1..=10).map(|i| (i, format!("key-{i}"))).collect();
        put_one_time_pre_keys(&pool, owner, device.id, &keys).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let pool = pool.clone();
            let consumer = Uuid::now_v7();
            let consumer_device = Uuid::now_v7();
            handles.push(tokio::spawn(async move {
                consume_one_time_pre_key(&pool, device.id, consumer, consumer_device)
                    .await
                    .unwrap()
            }));
        }

        let mut claimed = Vec::new();
        for h in handles {
            claimed.push(h.await.unwrap().unwrap().key_id);
        }
        claimed.sort();
        assert_eq!(claimed, (1..=10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn get_key_bundle_rejects_self_addressed_exchange() {
        let pool = setup().await;
        let owner = Uuid::now_v7();
        let device = create_device(&pool, owner, "phone").await.unwrap();
        put_identity_key(&pool, owner, device.id, "idkey").await.unwrap();
        rotate_signed_pre_key(&pool, owner, device.id, 1, "spk", "sig").await.unwrap();
        put_one_time_pre_keys(&pool, owner, device.id, &[(1, "otk".into())]).await.unwrap();

        let own_other_device = Uuid::now_v7();
        let err = get_key_bundle(&pool, device.id, owner, own_other_device)
            .await
            .expect_err("self-addressed key exchange must be rejected");
        assert!(matches!(
            err.downcast_ref::<NexusError>(),
            Some(NexusError::PermissionDenied)
        ));

        let stranger = Uuid::now_v7();
        let stranger_device = Uuid::now_v7();
        let bundle = get_key_bundle(&pool, device.id, stranger, stranger_device).await.unwrap();
        assert!(bundle.is_some());
    }

    #[tokio::test]
    async fn rotating_identity_key_deactivates_the_prior_one() {
        let pool = setup().await;
        let owner = Uuid::now_v7();
        let device = create_device(&pool, owner, "phone").await.unwrap();

        put_identity_key(&pool, owner, device.id, "key-v1").await.unwrap();
        put_identity_key(&pool, owner, device.id, "key-v2").await.unwrap();

        let active = get_active_identity_key(&pool, device.id).await.unwrap().unwrap();
        assert_eq!(active.public_key, "key-v2");
    }

    #[tokio::test]
    async fn duplicate_signed_pre_key_upload_is_rejected() {
        let pool = setup().await;
        let owner = Uuid::now_v7();
        let device = create_device(&pool, owner, "phone").await.unwrap();

        put_signed_pre_key(&pool, owner, device.id, 1, "spk-v1", "sig-v1").await.unwrap();
        let err = put_signed_pre_key(&pool, owner, device.id, 1, "spk-v2", "sig-v2")
            .await
            .expect_err("duplicate (device_id, key_id) must be rejected");
        assert!(matches!(
            err.downcast_ref::<NexusError>(),
            Some(NexusError::AlreadyExists { resource }) if resource == "signed_pre_key"
        ));
    }

    #[tokio::test]
    async fn duplicate_one_time_pre_key_upload_is_rejected() {
        let pool = setup().await;
        let owner = Uuid::now_v7();
        let device = create_device(&pool, owner, "phone").await.unwrap();

        put_one_time_pre_keys(&pool, owner, device.id, &[(1, "key-a".into())]).await.unwrap();
        let err = put_one_time_pre_keys(&pool, owner, device.id, &[(1, "key-a-again".into())])
            .await
            .expect_err("duplicate (device_id, key_id) must be rejected");
        assert!(matches!(
            err.downcast_ref::<NexusError>(),
            Some(NexusError::AlreadyExists { resource }) if resource == "one_time_pre_key"
        ));
    }

    #[tokio::test]
    async fn verify_device_accepts_emoji_method() {
        let pool = setup().await;
        let owner = Uuid::now_v7();
        let device = create_device(&pool, owner, "phone").await.unwrap();
        let verifier = Uuid::now_v7();

        let verification = verify_device(&pool, verifier, device.id, VerificationMethod::Emoji)
            .await
            .unwrap();
        assert_eq!(verification.method, VerificationMethod::Emoji);
        assert!(is_device_verified(&pool, verifier, device.id).await.unwrap());
    }

    #[tokio::test]
    async fn deleted_device_is_excluded_from_listing() {
        let pool = setup().await;
        let owner = Uuid::now_v7();
        let device = create_device(&pool, owner, "phone").await.unwrap();
        assert_eq!(list_devices(&pool, owner).await.unwrap().len(), 1);

        delete_device(&pool, device.id).await.unwrap();
        assert_eq!(list_devices(&pool, owner).await.unwrap().len(), 0);
    }
}
