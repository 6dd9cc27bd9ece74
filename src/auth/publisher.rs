//! Publisher authentication: HMAC signature, timestamp window, nonce replay.

use crate::auth::nonce::NonceStore;
use crate::error::{AppError, AppResult};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Publishes older or newer than this many seconds are rejected; successful
/// nonces are retained for the same horizon.
const TIMESTAMP_WINDOW_SECS: i64 = 60;

/// Replay-protection metadata every publish body must carry. Other body
/// fields are ignored here.
#[derive(Debug, Deserialize)]
struct MessageMetadata {
    nonce: String,
    timestamp: i64,
}

/// Validates publisher-signed messages for all endpoints.
#[derive(Debug, Default)]
pub struct PublisherValidator {
    nonces: NonceStore,
}

impl PublisherValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates one publish. Steps in order, any failure short-circuits:
    /// signature, metadata, timestamp window, nonce uniqueness. The signature
    /// is verified before any of the body is trusted, and the nonce is only
    /// recorded on full success so rejected publishes cannot pollute the set.
    pub fn validate(
        &self,
        signature: &str,
        body: &[u8],
        endpoint: &str,
        api_secret: &str,
    ) -> AppResult<()> {
        self.validate_at(signature, body, endpoint, api_secret, Utc::now().timestamp())
    }

    fn validate_at(
        &self,
        signature: &str,
        body: &[u8],
        endpoint: &str,
        api_secret: &str,
        now: i64,
    ) -> AppResult<()> {
        let provided = hex::decode(signature).map_err(|_| AppError::InvalidSignature)?;

        let mut mac = HmacSha256::new_from_slice(api_secret.as_bytes())
            .map_err(|e| AppError::Internal(anyhow::anyhow!("hmac init: {e}")))?;
        mac.update(body);
        // Constant-time comparison.
        mac.verify_slice(&provided)
            .map_err(|_| AppError::InvalidSignature)?;

        let metadata: MessageMetadata =
            serde_json::from_slice(body).map_err(|e| AppError::InvalidBody(e.to_string()))?;

        if metadata.timestamp < now - TIMESTAMP_WINDOW_SECS
            || metadata.timestamp > now + TIMESTAMP_WINDOW_SECS
        {
            return Err(AppError::TimestampOutOfRange);
        }

        if self.nonces.check(&metadata.nonce, endpoint) {
            return Err(AppError::ReplayedNonce);
        }
        self.nonces
            .store(&metadata.nonce, endpoint, now + TIMESTAMP_WINDOW_SECS);

        Ok(())
    }
}
