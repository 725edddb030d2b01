//! Plaintext JSON shapes carried inside the sealed envelope (§6).

use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct CreateRequestBody {
    pub csid: String,
    pub id: String,
    #[serde(rename = "machineID")]
    pub machine_id: String,
    #[serde(rename = "appVersion")]
    pub app_version: String,
    pub ts: String,
}

#[derive(Debug, Serialize)]
pub struct SessionResponseBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssid: Option<String>,
    pub ts: String,
    pub refresh: String,
    pub expire: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(rename = "productID", skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    #[serde(rename = "productName", skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
    #[serde(rename = "productData", skip_serializing_if = "Option::is_none")]
    pub product_data: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequestBody {
    pub ts: String,
}

#[derive(Debug, Deserialize)]
pub struct DeleteRequestBody {
    pub ts: String,
}
