//! Replay-protection nonce store with TTL expiry.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;

/// Expired entries are dropped in bulk after this many stores.
const SWEEP_EVERY: usize = 1024;

#[derive(Debug, Clone)]
struct Entry {
    endpoint: String,
    expires_at: i64,
}

/// In-memory set of `(nonce, endpoint)` pairs seen within the replay window.
///
/// Nonce strings are opaque; uniqueness is process-wide. Safe for arbitrary
/// concurrent callers.
#[derive(Debug, Default)]
pub struct NonceStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    stores_since_sweep: usize,
}

impl NonceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true iff an unexpired entry exists for `nonce` and its endpoint
    /// matches. An expired entry found here is removed and treated as absent.
    pub fn check(&self, nonce: &str, endpoint: &str) -> bool {
        let now = Utc::now().timestamp();
        let mut inner = self.inner.lock().expect("nonce store lock poisoned");

        match inner.entries.get(nonce) {
            None => false,
            Some(entry) if entry.expires_at <= now => {
                inner.entries.remove(nonce);
                false
            }
            Some(entry) => entry.endpoint == endpoint,
        }
    }

    /// Records `nonce` for `endpoint` until `expires_at` (Unix seconds),
    /// overwriting any existing entry.
    pub fn store(&self, nonce: &str, endpoint: &str, expires_at: i64) {
        let mut inner = self.inner.lock().expect("nonce store lock poisoned");
        inner.entries.insert(
            nonce.to_string(),
            Entry {
                endpoint: endpoint.to_string(),
                expires_at,
            },
        );

        inner.stores_since_sweep += 1;
        if inner.stores_since_sweep >= SWEEP_EVERY {
            let now = Utc::now().timestamp();
            inner.entries.retain(|_, e| e.expires_at > now);
            inner.stores_since_sweep = 0;
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }
}
