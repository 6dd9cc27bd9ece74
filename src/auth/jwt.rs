//! Subscriber token validation and claims.

use crate::error::{AppError, AppResult};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identity presented by a subscriber at connect time. Immutable once
/// validated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    /// Arbitrarily nested custom fields, targeted by dot-separated paths.
    #[serde(default)]
    pub custom: Map<String, Value>,
}

impl Claims {
    /// Resolves a dot-separated path into the custom claims. Every non-final
    /// segment must be an object; otherwise resolution fails.
    pub fn custom_claim(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.custom.get(first)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }
}

/// Validates a subscriber bearer token against an endpoint's JWT secret.
///
/// Only the HMAC family of signing algorithms is accepted; `exp` is enforced
/// when present. Failures collapse to [`AppError::Unauthorized`] so no detail
/// leaks to the caller.
pub fn validate_token(token: &str, jwt_secret: &str) -> AppResult<Claims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
    validation.required_spec_claims.clear();

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &validation,
    )
    .map_err(|e| {
        tracing::debug!(error = %e, "subscriber token rejected");
        AppError::Unauthorized
    })?;

    Ok(data.claims)
}
