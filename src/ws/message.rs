//! Wire message models for the publish API and subscriber frames.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::Value;
use std::collections::HashMap;

/// Audience filter applied against subscriber claims.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Target {
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub include: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub exclude: HashMap<String, Value>,
}

impl Target {
    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }
}

/// Publisher-supplied envelope, delivered verbatim to matching subscribers.
///
/// `endpoint` is always overwritten from the URL after parsing; a value in
/// the body is ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastMessage {
    /// Opaque payload, passed through without re-interpretation.
    #[serde(default)]
    pub message: Option<Box<RawValue>>,
    #[serde(default)]
    pub target: Target,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub topic: String,
}

/// Frame from subscriber to service. Anything that does not parse as one of
/// these is ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SubscriptionMessage {
    Subscribe { topic: String },
    Unsubscribe { topic: String },
}
