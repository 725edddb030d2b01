//! The client session driver (§4.7): startup retry loop, steady-state
//! refresh/expire timers, and cooperative cancellation.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use chrono::{DateTime, Utc};
use crypto_box::{PublicKey, SecretKey};
use licensing_core::crypto::{encode_csid, Envelope, KeyPair};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{Error, Result};
use crate::state::{SessionInfo, SessionState};
use crate::transport::Transport;
use crate::wire::{CreateRequestBody, CreateResponseBody, DeleteRequestBody, RefreshRequestBody, RefreshResponseBody};

const INITIAL_BACKOFF: Duration = Duration::from_secs(30);
const MAX_BACKOFF: Duration = Duration::from_secs(30 * 60);
const CLOSE_DEADLINE: Duration = Duration::from_secs(30);

pub struct SessionDriver {
    transport: Transport,
    license_id: [u8; 32],
    license_secret: SecretKey,
    server_identity_public: PublicKey,
    client_session: KeyPair,
    identifier: String,
    machine_id: Vec<u8>,
    app_version: String,
    state: RwLock<SessionState>,
    session: RwLock<Option<SessionInfo>>,
}

impl SessionDriver {
    pub fn new(
        base_url: Url,
        license_id: [u8; 32],
        license_secret: SecretKey,
        server_identity_public: PublicKey,
        identifier: String,
        machine_id: Vec<u8>,
        app_version: String,
    ) -> Result<Self> {
        Ok(Self {
            transport: Transport::new(base_url)?,
            license_id,
            license_secret,
            server_identity_public,
            client_session: KeyPair::generate(),
            identifier,
            machine_id,
            app_version,
            state: RwLock::new(SessionState::Invalid),
            session: RwLock::new(None),
        })
    }

    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    pub async fn session_info(&self) -> Option<SessionInfo> {
        self.session.read().await.clone()
    }

    /// Drive the session to completion: startup retries, then the
    /// steady-state refresh/expire loop, until expiry, a permanent failure,
    /// or cancellation.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> Result<()> {
        self.startup_loop(&cancel).await?;
        self.steady_state_loop(cancel).await
    }

    async fn startup_loop(&self, cancel: &CancellationToken) -> Result<()> {
        let mut backoff = INITIAL_BACKOFF;
        loop {
            match self.create_session().await {
                Ok(info) => {
                    *self.session.write().await = Some(info);
                    *self.state.write().await = SessionState::Valid;
                    return Ok(());
                }
                Err(e) if e.is_temporary() => {
                    tracing::warn!(error = %e, backoff_secs = backoff.as_secs(), "temporary create failure, retrying");
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = cancel.cancelled() => {
                            *self.state.write().await = SessionState::Closed;
                            return Err(e);
                        }
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
                Err(e) => {
                    tracing::error!(error = %e, "permanent create failure");
                    return Err(e);
                }
            }
        }
    }

    async fn steady_state_loop(&self, cancel: CancellationToken) -> Result<()> {
        let mut backoff = INITIAL_BACKOFF;
        loop {
            let info = self.session.read().await.clone().expect("session set by startup_loop");
            let now = Utc::now();
            let refresh_in = (info.refresh_at - now).to_std().unwrap_or(Duration::ZERO);
            let expire_in = (info.expire_at - now).to_std().unwrap_or(Duration::ZERO);

            tokio::select! {
                _ = tokio::time::sleep(refresh_in) => {
                    match self.refresh_session(&info).await {
                        Ok(updated) => {
                            backoff = INITIAL_BACKOFF;
                            *self.session.write().await = Some(updated);
                        }
                        Err(e) if e.is_temporary() => {
                            tracing::warn!(error = %e, "temporary refresh failure, deferring");
                            let mut pushed = info.clone();
                            let push = chrono::Duration::from_std(backoff).unwrap_or(chrono::Duration::zero());
                            pushed.refresh_at = (now + push).min(pushed.expire_at);
                            *self.session.write().await = Some(pushed);
                            backoff = (backoff * 2).min(MAX_BACKOFF);
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "permanent refresh failure, closing");
                            let _ = self.delete_session(&info).await;
                            *self.state.write().await = SessionState::Closed;
                            return Err(e);
                        }
                    }
                }
                _ = tokio::time::sleep(expire_in) => {
                    *self.state.write().await = SessionState::Expired;
                    return Ok(());
                }
                _ = cancel.cancelled() => {
                    let _ = tokio::time::timeout(CLOSE_DEADLINE, self.delete_session(&info)).await;
                    *self.state.write().await = SessionState::Closed;
                    return Ok(());
                }
            }
        }
    }

    async fn create_session(&self) -> Result<SessionInfo> {
        let now = Utc::now();
        let csid = self.client_session.public_bytes();
        let body = CreateRequestBody {
            csid: base64::engine::general_purpose::STANDARD.encode(csid),
            id: self.identifier.clone(),
            machine_id: base64::engine::general_purpose::STANDARD.encode(&self.machine_id),
            app_version: self.app_version.clone(),
            ts: now.to_rfc3339(),
        };
        let plaintext = serde_json::to_vec(&body).map_err(|e| Error::Permanent(format!("encode failure: {e}")))?;
        let envelope = Envelope::seal(&plaintext, &self.server_identity_public, &self.license_secret, Some(self.license_id))
            .map_err(|e| Error::Permanent(e.to_string()))?;

        let response = self.transport.create_session(&envelope).await?;
        let opened = response
            .open(&self.server_identity_public, self.client_session.secret())
            .map_err(|e| Error::Permanent(e.to_string()))?;
        let parsed: CreateResponseBody =
            serde_json::from_slice(&opened).map_err(|e| Error::Permanent(format!("malformed response: {e}")))?;

        let ssid = base64::engine::general_purpose::STANDARD
            .decode(parsed.ssid)
            .map_err(|e| Error::Permanent(format!("bad ssid encoding: {e}")))?;
        let server_session_id: [u8; 32] = ssid.try_into().map_err(|_| Error::Permanent("ssid must be 32 bytes".into()))?;

        Ok(SessionInfo {
            server_session_id,
            refresh_at: parse_rfc3339(&parsed.refresh)?,
            expire_at: parse_rfc3339(&parsed.expire)?,
            name: parsed.name,
            data: parsed.data,
            product_id: parsed.product_id,
            product_name: parsed.product_name,
            product_data: parsed.product_data,
        })
    }

    async fn refresh_session(&self, current: &SessionInfo) -> Result<SessionInfo> {
        let now = Utc::now();
        let body = RefreshRequestBody { ts: now.to_rfc3339() };
        let plaintext = serde_json::to_vec(&body).map_err(|e| Error::Permanent(format!("encode failure: {e}")))?;
        let server_session_public = PublicKey::from(current.server_session_id);
        let envelope = Envelope::seal(&plaintext, &server_session_public, self.client_session.secret(), None)
            .map_err(|e| Error::Permanent(e.to_string()))?;

        let csid = encode_csid(&self.client_session.public_bytes());
        let response = self.transport.refresh_session(&csid, &envelope).await?;
        let opened = response
            .open(&server_session_public, self.client_session.secret())
            .map_err(|e| Error::Permanent(e.to_string()))?;
        let parsed: RefreshResponseBody =
            serde_json::from_slice(&opened).map_err(|e| Error::Permanent(format!("malformed response: {e}")))?;

        Ok(SessionInfo {
            server_session_id: current.server_session_id,
            refresh_at: parse_rfc3339(&parsed.refresh)?,
            expire_at: parse_rfc3339(&parsed.expire)?,
            name: parsed.name,
            data: parsed.data,
            product_id: parsed.product_id,
            product_name: parsed.product_name,
            product_data: parsed.product_data,
        })
    }

    async fn delete_session(&self, current: &SessionInfo) -> Result<()> {
        let now = Utc::now();
        let body = DeleteRequestBody { ts: now.to_rfc3339() };
        let plaintext = serde_json::to_vec(&body).map_err(|e| Error::Permanent(format!("encode failure: {e}")))?;
        let server_session_public = PublicKey::from(current.server_session_id);
        let envelope = Envelope::seal(&plaintext, &server_session_public, self.client_session.secret(), None)
            .map_err(|e| Error::Permanent(e.to_string()))?;
        let csid = encode_csid(&self.client_session.public_bytes());
        self.transport.delete_session(&csid, &envelope).await
    }
}

fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Permanent(format!("bad timestamp {s:?}: {e}")))
}
