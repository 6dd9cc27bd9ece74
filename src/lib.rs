//! Driplet: a multi-tenant WebSocket fan-out service.
//!
//! Publishers sign JSON messages per endpoint with an HMAC plus nonce replay
//! protection; subscribers connect over WebSocket with a bearer token
//! carrying custom claims, subscribe to topics, and receive every broadcast
//! whose topic and audience target match.

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod ws;

pub use config::Config;
pub use error::AppError;
pub use handlers::http::AppState;
pub use ws::Hub;

use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

/// Build the API router (health, ws, publish, ping). Used by main and by
/// integration tests.
pub fn create_app(state: AppState) -> axum::Router {
    axum::Router::new()
        .route("/", get(handlers::health))
        .route("/ws/:endpoint", get(handlers::ws_handler))
        .route("/api/:endpoint/message", post(handlers::publish))
        .route("/api/:endpoint/ping", get(handlers::ping))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
