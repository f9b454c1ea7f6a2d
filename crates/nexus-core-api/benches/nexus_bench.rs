//! Criterion microbenchmarks for nexus-core-api hot paths.
//!
//! Run with:
//!   cargo bench -p nexus-core-api
//!
//! HTML reports are written to `target/criterion/`.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use serde_json::json;

// ── JSON serialisation ────────────────────────────────────────────────────────

/// Benchmark serialising a representative message-ciphertext envelope.
fn bench_message_serialise(c: &mut Criterion) {
    let msg = json!({
        "id": "01929a5e-6e1b-7000-9c4a-dead00000001",
        "conversation_id": "01929a5e-6e1b-7000-9c4a-dead00000002",
        "sender_id": "01929a5e-6e1b-7000-9c4a-dead00000003",
        "sender_device_id": "01929a5e-6e1b-7000-9c4a-dead00000004",
        "seq_id": 42,
        "message_type": "text",
        "created_at": "2025-01-01T00:00:00Z",
        "deleted_at": null,
        "ciphertext": "AgICAgICAgICAgICAgICAgICAgICAgICAgICAgICAgICAgICAg==",
        "header": "AQEBAQEBAQEBAQEBAQEBAQEBAQEB"
    });

    c.bench_function("message/serialise", |b| {
        b.iter(|| serde_json::to_string(black_box(&msg)).unwrap())
    });
}

/// Benchmark deserialising the same envelope.
fn bench_message_deserialise(c: &mut Criterion) {
    let raw = r#"{
        "id":"01929a5e-6e1b-7000-9c4a-dead00000001",
        "conversation_id":"01929a5e-6e1b-7000-9c4a-dead00000002",
        "sender_id":"01929a5e-6e1b-7000-9c4a-dead00000003",
        "sender_device_id":"01929a5e-6e1b-7000-9c4a-dead00000004",
        "seq_id":42,
        "message_type":"text",
        "created_at":"2025-01-01T00:00:00Z",
        "deleted_at":null,
        "ciphertext":"AgICAgICAgICAgICAgICAgICAgICAgICAgICAgICAgICAgICAg==",
        "header":"AQEBAQEBAQEBAQEBAQEBAQEBAQEB"
    }"#;

    c.bench_function("message/deserialise", |b| {
        b.iter(|| {
            let _: serde_json::Value = serde_json::from_str(black_box(raw)).unwrap();
        })
    });
}

// ── UUID / ID generation ──────────────────────────────────────────────────────

fn bench_uuid_v7(c: &mut Criterion) {
    c.bench_function("id/uuid_v7_generate", |b| {
        b.iter(uuid::Uuid::now_v7)
    });
}

fn bench_uuid_parse(c: &mut Criterion) {
    let s = "01929a5e-6e1b-7000-9c4a-dead00000001";
    c.bench_function("id/uuid_parse", |b| {
        b.iter(|| uuid::Uuid::parse_str(black_box(s)).unwrap())
    });
}

// ── Bearer token verification ──────────────────────────────────────────────────

fn bench_jwt_encode(c: &mut Criterion) {
    use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Claims {
        sub: String,
        device_id: String,
        iat: usize,
        exp: usize,
    }

    let key = EncodingKey::from_secret(b"bench-secret-key-32-bytes-padded!!");
    let header = Header::new(Algorithm::HS256);
    let claims = Claims {
        sub: "01929a5e-6e1b-7000-9c4a-dead00000001".into(),
        device_id: "01929a5e-6e1b-7000-9c4a-dead00000002".into(),
        iat: 1_700_000_000,
        exp: 9_999_999_999,
    };

    c.bench_function("auth/jwt_encode", |b| {
        b.iter(|| encode(black_box(&header), black_box(&claims), black_box(&key)).unwrap())
    });
}

/// The hot path: verifying a bearer token on every authenticated REST call
/// and every gateway connect.
fn bench_verify_bearer_token(c: &mut Criterion) {
    use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
    use serde::Serialize;

    #[derive(Serialize)]
    struct Claims {
        sub: String,
        device_id: String,
        iat: usize,
        exp: usize,
    }

    let secret = "bench-secret-key-32-bytes-padded!!";
    let key = EncodingKey::from_secret(secret.as_bytes());
    let header = Header::new(Algorithm::HS256);
    let claims = Claims {
        sub: "01929a5e-6e1b-7000-9c4a-dead00000001".into(),
        device_id: "01929a5e-6e1b-7000-9c4a-dead00000002".into(),
        iat: 1_700_000_000,
        exp: 9_999_999_999,
    };
    let token = encode(&header, &claims, &key).unwrap();

    c.bench_function("auth/verify_bearer_token", |b| {
        b.iter(|| nexus_core_common::auth::verify_bearer_token(black_box(&token), black_box(secret)).unwrap())
    });
}

// ── Payload size scaling ──────────────────────────────────────────────────────

/// Benchmark JSON serialisation at different ciphertext sizes.
fn bench_message_size_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("message/size_scaling");

    for size in [64usize, 256, 1024, 4096] {
        let ciphertext = "x".repeat(size);
        let msg = json!({
            "id": "01929a5e-6e1b-7000-9c4a-dead00000001",
            "ciphertext": ciphertext,
        });

        group.bench_with_input(BenchmarkId::from_parameter(size), &msg, |b, m| {
            b.iter(|| serde_json::to_string(black_box(m)).unwrap())
        });
    }

    group.finish();
}

// ── criterion entrypoints ─────────────────────────────────────────────────────

criterion_group!(
    serialisation,
    bench_message_serialise,
    bench_message_deserialise,
    bench_message_size_scaling,
);

criterion_group!(ids, bench_uuid_v7, bench_uuid_parse);

criterion_group!(auth, bench_jwt_encode, bench_verify_bearer_token);

criterion_main!(serialisation, ids, auth);
