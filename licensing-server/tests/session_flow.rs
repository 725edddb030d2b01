//! End-to-end exercise of the wire handler against a real sqlite-backed
//! engine: create, refresh, delete, plus a tampered-envelope rejection
//! (mirrors scenarios S1 and S6).

use std::sync::Arc;

use base64::Engine as _;
use chrono::Utc;
use crypto_box::PublicKey;
use http_body_util::BodyExt;
use licensing_core::crypto::{Envelope, KeyPair};
use licensing_core::model::{License, LicenseIssuer};
use licensing_core::store::sqlite::SqliteStore;
use licensing_core::{Config, Engine};
use licensing_server::{build_router, AppState};
use tower::ServiceExt;

async fn test_engine() -> (Arc<Engine<SqliteStore>>, [u8; 32], crypto_box::SecretKey, PublicKey) {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("test.sqlite");
    std::mem::forget(dir);
    let store = SqliteStore::connect(db_path.to_str().unwrap()).await.unwrap();

    let issuer_id = [0xAAu8; 32];
    store
        .upsert_license_issuer(&LicenseIssuer { id: issuer_id, active: true })
        .await
        .unwrap();

    let license_keys = KeyPair::from_seed(&[0x11u8; 32]);
    let now = Utc::now();
    let license = License {
        id: license_keys.public_bytes(),
        key: license_keys.secret_bytes(),
        active: true,
        name: Some("test license".into()),
        data: None,
        max_sessions: 2,
        valid_until: None,
        created: now,
        updated: now,
        last_used: None,
        issuer_id,
        product_id: None,
    };
    store.upsert_license(&license).await.unwrap();

    let config = Config {
        http_listen: "127.0.0.1:0".into(),
        db_path: db_path.to_str().unwrap().into(),
        server_seed: "00".repeat(32),
        limiter: Default::default(),
        refresh: licensing_core::config::RefreshConfig { min: std::time::Duration::from_secs(300), max: std::time::Duration::from_secs(7200), jitter: 0.0 },
        max_time_drift: std::time::Duration::from_secs(6 * 60 * 60),
        cleanup_interval: std::time::Duration::from_secs(1200),
        log_level: "info".into(),
    };
    let server_identity_public = PublicKey::from(KeyPair::from_seed(&config.server_seed_bytes()).public_bytes());

    let engine = Arc::new(Engine::new(store, config));
    (engine, license.id, crypto_box::SecretKey::from_bytes(license.key), server_identity_public)
}

#[tokio::test]
async fn create_refresh_delete_round_trip() {
    let (engine, license_id, license_secret, server_identity_public) = test_engine().await;
    let app = build_router(AppState { engine });

    let client_session = KeyPair::generate();
    let create_body = serde_json::json!({
        "csid": base64::engine::general_purpose::STANDARD.encode(client_session.public_bytes()),
        "id": "test-host",
        "machineID": base64::engine::general_purpose::STANDARD.encode(b"machine-1"),
        "appVersion": "1.0.0",
        "ts": Utc::now().to_rfc3339(),
    });
    let envelope = Envelope::seal(
        serde_json::to_vec(&create_body).unwrap().as_slice(),
        &server_identity_public,
        &license_secret,
        Some(license_id),
    )
    .unwrap();

    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/license-sessions")
        .header("content-type", "application/json")
        .body(axum::body::Body::from(serde_json::to_vec(&envelope).unwrap()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::CREATED);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let response_envelope: Envelope = serde_json::from_slice(&body).unwrap();
    let plaintext = response_envelope.open(&server_identity_public, client_session.secret()).unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&plaintext).unwrap();
    let ssid_bytes: [u8; 32] = base64::engine::general_purpose::STANDARD
        .decode(parsed["ssid"].as_str().unwrap())
        .unwrap()
        .try_into()
        .unwrap();

    // Refresh.
    let csid = licensing_core::crypto::encode_csid(&client_session.public_bytes());
    let server_session_public = PublicKey::from(ssid_bytes);
    let refresh_body = serde_json::json!({ "ts": Utc::now().to_rfc3339() });
    let refresh_envelope = Envelope::seal(
        serde_json::to_vec(&refresh_body).unwrap().as_slice(),
        &server_session_public,
        client_session.secret(),
        None,
    )
    .unwrap();
    let request = axum::http::Request::builder()
        .method("PATCH")
        .uri(format!("/license-sessions/{csid}"))
        .header("content-type", "application/json")
        .body(axum::body::Body::from(serde_json::to_vec(&refresh_envelope).unwrap()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::CREATED);

    // Delete.
    let delete_body = serde_json::json!({ "ts": Utc::now().to_rfc3339() });
    let delete_envelope = Envelope::seal(
        serde_json::to_vec(&delete_body).unwrap().as_slice(),
        &server_session_public,
        client_session.secret(),
        None,
    )
    .unwrap();
    let request = axum::http::Request::builder()
        .method("DELETE")
        .uri(format!("/license-sessions/{csid}"))
        .header("content-type", "application/json")
        .body(axum::body::Body::from(serde_json::to_vec(&delete_envelope).unwrap()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn tampered_envelope_is_rejected() {
    let (engine, license_id, license_secret, server_identity_public) = test_engine().await;
    let app = build_router(AppState { engine });

    let client_session = KeyPair::generate();
    let create_body = serde_json::json!({
        "csid": base64::engine::general_purpose::STANDARD.encode(client_session.public_bytes()),
        "id": "test-host",
        "machineID": base64::engine::general_purpose::STANDARD.encode(b"machine-1"),
        "appVersion": "1.0.0",
        "ts": Utc::now().to_rfc3339(),
    });
    let mut envelope = Envelope::seal(
        serde_json::to_vec(&create_body).unwrap().as_slice(),
        &server_identity_public,
        &license_secret,
        Some(license_id),
    )
    .unwrap();
    envelope.data[0] ^= 0x01;

    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/license-sessions")
        .header("content-type", "application/json")
        .body(axum::body::Body::from(serde_json::to_vec(&envelope).unwrap()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::BAD_REQUEST);
}
