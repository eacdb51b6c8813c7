//! HTTP API handlers

use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::Json;
use std::sync::Arc;

use crate::relay::hub::{ClientInfo, RelayHub, RelayStats};

/// API response wrapper
#[derive(serde::Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Relay totals and uptime
pub async fn get_status(State(hub): State<Arc<RelayHub>>) -> Json<ApiResponse<RelayStats>> {
    Json(ApiResponse::ok(hub.stats()))
}

/// Connected clients, oldest first
pub async fn get_clients(State(hub): State<Arc<RelayHub>>) -> Json<ApiResponse<Vec<ClientInfo>>> {
    Json(ApiResponse::ok(hub.clients()))
}

/// Anything the router does not know
pub async fn not_found(uri: Uri) -> (StatusCode, Json<ApiResponse<()>>) {
    (
        StatusCode::NOT_FOUND,
        Json(ApiResponse::error(format!("no route for {}", uri.path()))),
    )
}
