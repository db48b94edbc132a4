//! JSON-over-HTTP control surface. Every request is a `command` envelope;
//! every response carries a timestamp, an error flag and command-specific
//! fields.

pub mod config_cmd;
pub mod debug;
pub mod distrib;
pub mod node;
pub mod zone;

use std::sync::Arc;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Map, Value, json};

use crate::config::Config;
use crate::distribution::DistributionEngine;
use crate::error::KdcError;
use crate::metrics::KdcMetrics;
use crate::storage::Storage;

#[derive(Clone)]
pub struct AppState {
    pub storage: Storage,
    pub engine: Arc<DistributionEngine>,
    pub config: Arc<Config>,
    pub metrics: Arc<KdcMetrics>,
}

/// The uniform response envelope: `{time, error, error_msg, msg, ...}`.
#[derive(Debug, serde::Serialize)]
pub struct ApiResponse {
    pub time: String,
    pub error: bool,
    pub error_msg: String,
    pub msg: String,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl ApiResponse {
    pub fn ok(msg: impl Into<String>) -> Self {
        ApiResponse {
            time: chrono::Utc::now().to_rfc3339(),
            error: false,
            error_msg: String::new(),
            msg: msg.into(),
            data: Map::new(),
        }
    }

    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.data.insert(key.to_string(), value);
        self
    }

    pub fn failure(err: &KdcError) -> Self {
        ApiResponse {
            time: chrono::Utc::now().to_rfc3339(),
            error: true,
            error_msg: err.to_string(),
            msg: String::new(),
            data: Map::new(),
        }
    }
}

impl IntoResponse for ApiResponse {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

impl From<KdcError> for ApiResponse {
    fn from(err: KdcError) -> Self {
        ApiResponse::failure(&err)
    }
}

/// Pull the command name out of an envelope.
pub fn command_of(body: &Value) -> Result<&str, ApiResponse> {
    body.get("command")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ApiResponse::failure(&KdcError::ValidationError(
            "missing command field".to_string(),
        )))
}

/// Deserialize the command-specific fields of the envelope.
pub fn params<T: serde::de::DeserializeOwned>(body: &Value) -> Result<T, ApiResponse> {
    serde_json::from_value(body.clone()).map_err(|e| {
        ApiResponse::failure(&KdcError::ValidationError(format!("bad request: {}", e)))
    })
}

pub fn unknown_command(endpoint: &str, command: &str) -> ApiResponse {
    ApiResponse::failure(&KdcError::ValidationError(format!(
        "unknown {} command: {}",
        endpoint, command
    )))
}

pub fn to_json<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|_| json!(null))
}
