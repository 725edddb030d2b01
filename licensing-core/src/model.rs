//! The persistent and ephemeral data model (§3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A 32-byte identifier: license id, client/server session id.
pub type Id32 = [u8; 32];

/// A persistent entitlement. The keypair is derived once at creation from a
/// seed and never rotated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct License {
    pub id: Id32,
    pub key: Id32,
    pub active: bool,
    pub name: Option<String>,
    pub data: Option<serde_json::Value>,
    pub max_sessions: u32,
    pub valid_until: Option<DateTime<Utc>>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
    pub issuer_id: Id32,
    pub product_id: Option<Id32>,
}

impl License {
    /// A license is unusable if inactive or past its validity window. Issuer
    /// and product status are checked separately against their own rows.
    pub fn is_valid(&self, now: DateTime<Utc>) -> Result<(), LicenseValidity> {
        if !self.active {
            return Err(LicenseValidity::Inactive);
        }
        if let Some(valid_until) = self.valid_until {
            if now > valid_until {
                return Err(LicenseValidity::Expired);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LicenseValidity {
    Inactive,
    Expired,
}

/// The owning account of a license.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LicenseIssuer {
    pub id: Id32,
    pub active: bool,
}

/// An optional grouping a license may reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: Id32,
    pub active: bool,
    pub name: Option<String>,
    pub data: Option<serde_json::Value>,
}

/// An ephemeral record of one client "seat".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LicenseSession {
    pub client_session_id: Id32,
    pub server_session_id: Id32,
    pub server_session_key: Id32,
    pub identifier: String,
    pub machine_id: Vec<u8>,
    pub app_version: String,
    pub created: DateTime<Utc>,
    pub expire: DateTime<Utc>,
    pub license_id: Id32,
}

/// The result of the §4.4 time-math used by both create and refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimes {
    pub refresh: DateTime<Utc>,
    pub expire: DateTime<Utc>,
}
