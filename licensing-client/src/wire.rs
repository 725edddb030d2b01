//! Plaintext JSON shapes carried inside the sealed envelope (§6).

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct CreateRequestBody {
    pub csid: String,
    pub id: String,
    #[serde(rename = "machineID")]
    pub machine_id: String,
    #[serde(rename = "appVersion")]
    pub app_version: String,
    pub ts: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateResponseBody {
    pub ssid: String,
    pub ts: String,
    pub refresh: String,
    pub expire: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default, rename = "productID")]
    pub product_id: Option<String>,
    #[serde(default, rename = "productName")]
    pub product_name: Option<String>,
    #[serde(default, rename = "productData")]
    pub product_data: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct RefreshRequestBody {
    pub ts: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshResponseBody {
    pub ts: String,
    pub refresh: String,
    pub expire: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default, rename = "productID")]
    pub product_id: Option<String>,
    #[serde(default, rename = "productName")]
    pub product_name: Option<String>,
    #[serde(default, rename = "productData")]
    pub product_data: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct DeleteRequestBody {
    pub ts: String,
}
