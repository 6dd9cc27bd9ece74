//! Application error types surfaced at the HTTP edges.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application-level errors.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(String),

    /// Subscriber token rejected. Carries no detail on purpose.
    #[error("unauthorized")]
    Unauthorized,

    #[error("missing signature")]
    MissingSignature,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("nonce has already been used")]
    ReplayedNonce,

    #[error("message timestamp outside acceptable range")]
    TimestampOutOfRange,

    #[error("invalid message body: {0}")]
    InvalidBody(String),

    #[error("invalid target value at path: {0}")]
    InvalidTarget(String),

    #[error("topic is required")]
    MissingTopic,

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::UnknownEndpoint(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized
            | AppError::MissingSignature
            | AppError::InvalidSignature
            | AppError::ReplayedNonce
            | AppError::TimestampOutOfRange => StatusCode::UNAUTHORIZED,
            AppError::InvalidBody(_) | AppError::InvalidTarget(_) | AppError::MissingTopic => {
                StatusCode::BAD_REQUEST
            }
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
