//! The wire handler (§4.6): pure codec and dispatcher, no policy of its own.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use base64::Engine;
use chrono::{DateTime, Utc};
use crypto_box::{PublicKey, SecretKey};
use licensing_core::crypto::{decode_csid, encode_csid, Envelope};
use licensing_core::engine::{CreateRequest, RefreshRequest};
use licensing_core::store::SessionStore;
use licensing_core::model::License;
use licensing_core::Error;

use crate::state::AppState;
use crate::wire::{CreateRequestBody, DeleteRequestBody, RefreshRequestBody, SessionResponseBody};
use crate::wire_error::ApiError;

fn decode_b64(s: &str) -> Result<Vec<u8>, Error> {
    base64::engine::general_purpose::STANDARD
        .decode(s)
        .map_err(|_| Error::InvalidInput("invalid base64 field".to_string()))
}

fn decode_b64_32(s: &str) -> Result<[u8; 32], Error> {
    decode_b64(s)?.try_into().map_err(|_| Error::InvalidInput("field must be 32 bytes".to_string()))
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, Error> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| Error::InvalidInput("invalid timestamp".to_string()))
}

async fn product_fields(state: &AppState, license: &License) -> Result<(Option<String>, Option<String>, Option<serde_json::Value>), Error> {
    let Some(product_id) = license.product_id else {
        return Ok((None, None, None));
    };
    let product = state.engine.store().select_product_by_id(product_id).await?.ok_or(Error::NotFound)?;
    Ok((Some(encode_csid(&product.id)), product.name, product.data))
}

pub async fn create_session(State(state): State<AppState>, Json(envelope): Json<Envelope>) -> Result<(StatusCode, Json<Envelope>), ApiError> {
    let lid = envelope.lid.clone().ok_or_else(|| Error::InvalidInput("missing lid".to_string()))?;
    let license_id: [u8; 32] = lid.try_into().map_err(|_| Error::InvalidInput("lid must be 32 bytes".to_string()))?;

    let license = state.engine.store().select_license_by_id(license_id).await?.ok_or(Error::NotFound)?;
    let license_public = PublicKey::from(license.id);
    let plaintext = envelope
        .open(&license_public, state.engine.server_identity().secret())
        .map_err(|_| Error::InvalidInput("failed to open envelope".to_string()))?;
    let body: CreateRequestBody = serde_json::from_slice(&plaintext).map_err(|e| ApiError(e.into()))?;

    let client_session_id = decode_b64_32(&body.csid)?;
    let machine_id = decode_b64(&body.machine_id)?;
    let client_timestamp = parse_ts(&body.ts)?;

    let req = CreateRequest {
        license_id,
        client_session_id,
        identifier: body.id,
        machine_id,
        app_version: body.app_version,
        client_timestamp,
    };
    let now = Utc::now();
    let response = state.engine.create(req, now).await.map_err(ApiError)?;
    let (product_id, product_name, product_data) = product_fields(&state, &response.license).await.map_err(ApiError)?;

    let response_body = SessionResponseBody {
        ssid: Some(base64::engine::general_purpose::STANDARD.encode(response.server_session_id)),
        ts: now.to_rfc3339(),
        refresh: response.times.refresh.to_rfc3339(),
        expire: response.times.expire.to_rfc3339(),
        name: response.license.name,
        data: response.license.data,
        product_id,
        product_name,
        product_data,
    };
    let plaintext_resp = serde_json::to_vec(&response_body).map_err(|e| Error::sensitive("failed to encode response", e))?;
    let client_session_public = PublicKey::from(client_session_id);
    let out = Envelope::seal(&plaintext_resp, &client_session_public, state.engine.server_identity().secret(), None).map_err(ApiError)?;
    Ok((StatusCode::CREATED, Json(out)))
}

pub async fn refresh_session(
    State(state): State<AppState>,
    Path(csid): Path<String>,
    Json(envelope): Json<Envelope>,
) -> Result<(StatusCode, Json<Envelope>), ApiError> {
    let client_session_id = decode_csid(&csid).map_err(ApiError)?;
    let session = state
        .engine
        .store()
        .select_license_session_by_id(client_session_id)
        .await
        .map_err(ApiError)?
        .ok_or(Error::NotFound)
        .map_err(ApiError)?;

    let client_session_public = PublicKey::from(client_session_id);
    let server_session_secret = SecretKey::from_bytes(session.server_session_key);
    let plaintext = envelope
        .open(&client_session_public, &server_session_secret)
        .map_err(|_| ApiError(Error::InvalidInput("failed to open envelope".to_string())))?;
    let body: RefreshRequestBody = serde_json::from_slice(&plaintext).map_err(|e| ApiError(e.into()))?;
    let client_timestamp = parse_ts(&body.ts).map_err(ApiError)?;

    let now = Utc::now();
    let req = RefreshRequest { client_session_id, client_timestamp };
    let response = state.engine.refresh(req, now).await.map_err(ApiError)?;
    let (product_id, product_name, product_data) = product_fields(&state, &response.license).await.map_err(ApiError)?;

    let response_body = SessionResponseBody {
        ssid: None,
        ts: now.to_rfc3339(),
        refresh: response.times.refresh.to_rfc3339(),
        expire: response.times.expire.to_rfc3339(),
        name: response.license.name,
        data: response.license.data,
        product_id,
        product_name,
        product_data,
    };
    let plaintext_resp = serde_json::to_vec(&response_body).map_err(|e| Error::sensitive("failed to encode response", e))?;
    let out = Envelope::seal(&plaintext_resp, &client_session_public, &server_session_secret, None).map_err(ApiError)?;
    Ok((StatusCode::CREATED, Json(out)))
}

pub async fn delete_session(
    State(state): State<AppState>,
    Path(csid): Path<String>,
    Json(envelope): Json<Envelope>,
) -> Result<StatusCode, ApiError> {
    let client_session_id = decode_csid(&csid).map_err(ApiError)?;
    let session = state
        .engine
        .store()
        .select_license_session_by_id(client_session_id)
        .await
        .map_err(ApiError)?
        .ok_or(Error::NotFound)
        .map_err(ApiError)?;

    let client_session_public = PublicKey::from(client_session_id);
    let server_session_secret = SecretKey::from_bytes(session.server_session_key);
    let plaintext = envelope
        .open(&client_session_public, &server_session_secret)
        .map_err(|_| ApiError(Error::InvalidInput("failed to open envelope".to_string())))?;
    let _body: DeleteRequestBody = serde_json::from_slice(&plaintext).map_err(|e| ApiError(e.into()))?;

    state.engine.delete(client_session_id).await.map_err(ApiError)?;
    Ok(StatusCode::NO_CONTENT)
}
