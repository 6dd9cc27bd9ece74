//! WebSocket upgrade handler: endpoint lookup, token validation, upgrade.

use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    response::Response,
};
use std::collections::HashMap;
use tracing::debug;

use crate::auth::jwt;
use crate::error::AppError;
use crate::handlers::http::AppState;

/// `GET /ws/:endpoint?token=…`. The endpoint must exist before the token is
/// validated, so a token signed for another endpoint cannot probe for
/// unknown ones. 404, then 401, then upgrade.
pub async fn ws_handler(
    State(state): State<AppState>,
    Path(endpoint): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    let endpoint_config = state
        .config
        .endpoints
        .get(&endpoint)
        .ok_or_else(|| AppError::UnknownEndpoint(endpoint.clone()))?;

    let token = params.get("token").map(String::as_str).unwrap_or("");
    let claims = jwt::validate_token(token, &endpoint_config.jwt_secret).map_err(|e| {
        debug!(endpoint = %endpoint, "subscriber token rejected");
        e
    })?;

    let hub = state.hub.clone();
    Ok(ws.on_upgrade(move |socket| async move {
        hub.handle_socket(socket, endpoint, claims).await;
    }))
}
