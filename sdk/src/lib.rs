//! Rust SDK for the Driftbase API.
//!
//! The SDK is organized around a cheaply cloneable [Client] that owns the HTTP
//! connection pool, the base URL, and a shared [auth::TokenStore]. The realtime
//! module multiplexes topic subscriptions over a single server-sent-events
//! stream; see [realtime] for the details.

mod error;
pub use error::Error;
pub mod auth;
pub mod realtime;

use crate::auth::TokenStore;
use realtime::{Hub, Realtime};
use reqwest::Client as HttpClient;
use std::sync::Arc;

/// The user agent reported on every request.
pub const USER_AGENT: &str = concat!("driftbase-sdk-rs/", env!("CARGO_PKG_VERSION"));

/// The client for interacting with the Driftbase API.
#[derive(Clone)]
pub struct Client {
    http_client: HttpClient,
    base_url: String,
    language: String,
    auth: Arc<TokenStore>,
    hub: Hub,
}

impl Client {
    /// Creates a new [Client].
    ///
    /// # Arguments
    ///
    /// * `base_url` - The base URL of the Driftbase server (e.g., `http://localhost:8080`).
    /// * `token` - The initial auth token. Pass an empty string for anonymous access.
    pub fn new(base_url: String, token: String) -> Self {
        Self::with_hub(base_url, token, Hub::default())
    }

    /// Creates a new [Client] that shares a realtime [Hub] with other clients.
    ///
    /// Clients constructed against the same hub share one realtime connection per
    /// distinct (base URL, token store) identity.
    pub fn with_hub(base_url: String, token: String, hub: Hub) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        Self {
            http_client: HttpClient::new(),
            base_url,
            language: "en-US".to_string(),
            auth: Arc::new(TokenStore::new(token)),
            hub,
        }
    }

    /// Returns a [Realtime] handle for subscribing to server events.
    pub fn realtime(&self) -> Realtime {
        self.hub.get_or_spawn(self)
    }

    /// Returns the token store backing this client.
    pub fn auth(&self) -> &Arc<TokenStore> {
        &self.auth
    }

    /// Returns the base URL of the server.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Sets the language reported in `Accept-Language` headers.
    pub fn set_language(&mut self, language: String) {
        self.language = language;
    }

    pub(crate) fn http_client(&self) -> &HttpClient {
        &self.http_client
    }

    pub(crate) fn language(&self) -> &str {
        &self.language
    }
}
