use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::api::{self, AppState};

/// HTTP server for the control API, health checks and metrics export
pub struct HttpServer {
    state: AppState,
    bind_addr: SocketAddr,
}

impl HttpServer {
    pub fn new(state: AppState, bind_addr: SocketAddr) -> Self {
        HttpServer { state, bind_addr }
    }

    pub async fn start(self) -> Result<(), Box<dyn std::error::Error>> {
        let app = Router::new()
            .route("/health", get(health_check))
            .route("/metrics", get(prometheus_metrics))
            .route("/api/v1/kdc/zone", post(zone_endpoint))
            .route("/api/v1/kdc/node", post(node_endpoint))
            .route("/api/v1/kdc/config", post(config_endpoint))
            .route("/api/v1/kdc/debug", post(debug_endpoint))
            .route("/api/v1/kdc/distrib", post(distrib_endpoint))
            .with_state(self.state)
            .layer(CorsLayer::permissive());

        info!("control API listening on {}", self.bind_addr);
        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;

        let shutdown_signal = async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to listen for ctrl-c");
            info!("shutting down");
        };

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await?;
        Ok(())
    }
}

/// Static-token authentication: 401 without a token, 403 with a wrong one.
fn check_auth(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    let expected = &state.config.server.api_token;
    if expected.is_empty() {
        return Ok(());
    }
    match headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        None => Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": true, "error_msg": "missing API token"})),
        )
            .into_response()),
        Some(token) if token != expected => Err((
            StatusCode::FORBIDDEN,
            Json(json!({"error": true, "error_msg": "invalid API token"})),
        )
            .into_response()),
        Some(_) => Ok(()),
    }
}

async fn health_check(State(state): State<AppState>) -> Response {
    let storage_ok = state.storage.list_services().await.is_ok();
    let status = if storage_ok { "healthy" } else { "degraded" };
    Json(json!({
        "status": status,
        "storage": storage_ok,
        "control_zone": state.config.kdc.control_zone,
    }))
    .into_response()
}

async fn prometheus_metrics(State(state): State<AppState>) -> Response {
    state.metrics.export().into_response()
}

async fn zone_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(resp) = check_auth(&state, &headers) {
        return resp;
    }
    api::zone::handle(&state, body).await.into_response()
}

async fn node_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(resp) = check_auth(&state, &headers) {
        return resp;
    }
    api::node::handle(&state, body).await.into_response()
}

async fn config_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(resp) = check_auth(&state, &headers) {
        return resp;
    }
    api::config_cmd::handle(&state, body).await.into_response()
}

async fn debug_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(resp) = check_auth(&state, &headers) {
        return resp;
    }
    api::debug::handle(&state, body).await.into_response()
}

async fn distrib_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(resp) = check_auth(&state, &headers) {
        return resp;
    }
    api::distrib::handle(&state, body).await.into_response()
}
