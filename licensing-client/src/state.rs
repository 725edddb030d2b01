//! Client-observable session state (§4.7).

use chrono::{DateTime, Utc};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Invalid,
    Valid,
    Expired,
    Closed,
}

/// A snapshot of the active session, readable concurrently by application
/// threads through an exclusive lock held only across each transition.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub server_session_id: [u8; 32],
    pub refresh_at: DateTime<Utc>,
    pub expire_at: DateTime<Utc>,
    pub name: Option<String>,
    pub data: Option<Value>,
    pub product_id: Option<String>,
    pub product_name: Option<String>,
    pub product_data: Option<Value>,
}
