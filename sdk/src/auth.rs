//! Auth token storage.
//!
//! The realtime engine only consults the store to decide whether to attach an
//! `Authorization` header, so the store is deliberately small: it holds one
//! token, knows how to check its expiry, and can be swapped or cleared at any
//! time without restarting the stream.

use base64::{engine::general_purpose, Engine as _};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(0);

/// A shared store for the client's auth token.
pub struct TokenStore {
    id: u64,
    token: RwLock<String>,
}

impl TokenStore {
    /// Creates a new store holding `token`. An empty token means anonymous.
    pub fn new(token: String) -> Self {
        Self {
            id: NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed),
            token: RwLock::new(token),
        }
    }

    /// A process-unique identity for this store, used to key realtime connections.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Replaces the stored token.
    pub fn save(&self, token: String) {
        *self.token.write().unwrap() = token;
    }

    /// Clears the stored token.
    pub fn clear(&self) {
        self.token.write().unwrap().clear();
    }

    /// Returns the stored token, or `None` when empty.
    pub fn token(&self) -> Option<String> {
        let token = self.token.read().unwrap();
        if token.is_empty() {
            None
        } else {
            Some(token.clone())
        }
    }

    /// Whether the stored token is non-empty and, if it is a JWT with an `exp`
    /// claim, not yet expired. Opaque tokens without a parseable claim are
    /// considered valid.
    pub fn is_valid(&self) -> bool {
        let token = self.token.read().unwrap();
        if token.is_empty() {
            return false;
        }
        match jwt_expiry(&token) {
            Some(exp) => {
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                exp > now
            }
            None => true,
        }
    }
}

/// Extracts the `exp` claim (seconds since the epoch) from a JWT payload.
fn jwt_expiry(token: &str) -> Option<u64> {
    let payload = token.split('.').nth(1)?;
    let decoded = general_purpose::URL_SAFE_NO_PAD.decode(payload).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&decoded).ok()?;
    claims.get("exp")?.as_u64()
}
