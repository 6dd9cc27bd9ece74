//! HTTP handlers: publish, ping, and liveness.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

use crate::auth::PublisherValidator;
use crate::config::Config;
use crate::error::AppError;
use crate::ws::{BroadcastMessage, Hub};

/// Header carrying the publisher's hex HMAC-SHA256 over the raw body.
pub const SIGNATURE_HEADER: &str = "x-driplet-signature";

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub hub: Hub,
    pub publisher: Arc<PublisherValidator>,
}

impl AppState {
    /// Builds the state and spawns the hub. Must be called inside a tokio
    /// runtime.
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            hub: Hub::new(),
            publisher: Arc::new(PublisherValidator::new()),
        }
    }
}

/// `POST /api/:endpoint/message` — authenticated publish, fanned out to every
/// matching subscriber. The signature covers the raw body, so the body is
/// only parsed after it verifies.
pub async fn publish(
    State(state): State<AppState>,
    Path(endpoint): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, AppError> {
    let endpoint_config = state
        .config
        .endpoints
        .get(&endpoint)
        .ok_or_else(|| AppError::UnknownEndpoint(endpoint.clone()))?;

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::MissingSignature)?;

    state
        .publisher
        .validate(signature, &body, &endpoint, &endpoint_config.api_secret)
        .map_err(|e| {
            debug!(endpoint = %endpoint, error = %e, "publish rejected");
            e
        })?;

    let mut msg: BroadcastMessage =
        serde_json::from_slice(&body).map_err(|e| AppError::InvalidBody(e.to_string()))?;
    // The endpoint comes from the URL; anything in the body is ignored.
    msg.endpoint = endpoint;

    let delivered = state.hub.broadcast(&msg).await?;

    Ok(Json(json!({ "ok": true, "delivered": delivered })))
}

/// `GET /api/:endpoint/ping` — endpoint-scoped liveness.
pub async fn ping(
    State(state): State<AppState>,
    Path(endpoint): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    if !state.config.endpoints.contains_key(&endpoint) {
        return Err(AppError::UnknownEndpoint(endpoint));
    }
    Ok(Json(json!({ "status": "ok", "endpoint": endpoint })))
}

/// `GET /` — liveness probe.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}
