//! HTTP transport for the licensing wire protocol (§6): three endpoints,
//! each exchanging a sealed [`licensing_core::crypto::Envelope`].

use licensing_core::crypto::Envelope;
use reqwest::Client;
use url::Url;

use crate::error::{Error, Result};

pub struct Transport {
    http: Client,
    base_url: Url,
}

impl Transport {
    pub fn new(base_url: Url) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self { http, base_url })
    }

    pub async fn create_session(&self, envelope: &Envelope) -> Result<Envelope> {
        let url = self
            .base_url
            .join("/license-sessions")
            .map_err(|e| Error::Permanent(format!("bad base url: {e}")))?;
        self.exchange(self.http.post(url).json(envelope)).await
    }

    pub async fn refresh_session(&self, csid: &str, envelope: &Envelope) -> Result<Envelope> {
        let url = self
            .base_url
            .join(&format!("/license-sessions/{csid}"))
            .map_err(|e| Error::Permanent(format!("bad base url: {e}")))?;
        self.exchange(self.http.patch(url).json(envelope)).await
    }

    pub async fn delete_session(&self, csid: &str, envelope: &Envelope) -> Result<()> {
        let url = self
            .base_url
            .join(&format!("/license-sessions/{csid}"))
            .map_err(|e| Error::Permanent(format!("bad base url: {e}")))?;
        let response = self.http.delete(url).json(envelope).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(Error::from_status(status, &body))
    }

    async fn exchange(&self, request: reqwest::RequestBuilder) -> Result<Envelope> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::from_status(status, &body));
        }
        response
            .json::<Envelope>()
            .await
            .map_err(|e| Error::Permanent(format!("malformed response envelope: {e}")))
    }
}
