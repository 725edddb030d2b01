//! The session store capability (§4.3, §6): an abstract interface the engine
//! mutates sessions through. Any backend satisfying these operations
//! qualifies; [`sqlite`] ships the default one.

pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{License, LicenseIssuer, LicenseSession, Product};

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn select_license_by_id(&self, id: [u8; 32]) -> Result<Option<License>>;
    async fn select_license_issuer_by_id(&self, id: [u8; 32]) -> Result<Option<LicenseIssuer>>;
    async fn select_product_by_id(&self, id: [u8; 32]) -> Result<Option<Product>>;
    async fn update_license_last_used(&self, id: [u8; 32], now: DateTime<Utc>) -> Result<()>;

    async fn select_license_session_by_id(&self, client_session_id: [u8; 32]) -> Result<Option<LicenseSession>>;
    async fn select_all_license_sessions_by_license_id(&self, license_id: [u8; 32]) -> Result<Vec<LicenseSession>>;
    async fn insert_license_session(&self, session: &LicenseSession) -> Result<()>;
    async fn update_license_session(&self, client_session_id: [u8; 32], expire: DateTime<Utc>) -> Result<()>;
    async fn delete_license_session_by_client_session_id(&self, client_session_id: [u8; 32]) -> Result<()>;
    async fn delete_license_sessions_by_license_and_machine(&self, license_id: [u8; 32], machine_id: &[u8]) -> Result<()>;

    /// Remove every session with `expire <= now`. Returns the count removed.
    async fn delete_expired_by_time(&self, now: DateTime<Utc>) -> Result<u64>;

    /// For every license, keep only the `max_sessions` most recently created
    /// sessions; delete the rest. Returns the count removed. Must be atomic
    /// with respect to concurrent inserts.
    async fn delete_overused(&self) -> Result<u64>;
}
