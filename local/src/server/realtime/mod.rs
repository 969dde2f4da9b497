use crate::server::auth;
use crate::server::realtime::handlers::{connect, drop_streams, publish, submit};
use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

mod handlers;

/// A connected realtime client: the sender feeding its event stream plus the
/// subscription set it last submitted.
pub struct ClientEntry {
    pub tx: mpsc::UnboundedSender<Bytes>,
    pub subscriptions: HashSet<String>,
}

/// A type alias for a map of client ids to their connection entries.
pub type ClientMap = Arc<DashMap<String, ClientEntry>>;

/// The state for the realtime routes.
#[derive(Clone)]
pub struct RealtimeState {
    /// All currently connected clients.
    pub clients: ClientMap,
    /// The authentication token.
    pub auth_token: Arc<String>,
    /// A flag to allow unauthenticated access for read-only methods.
    pub allow_public_access: bool,
}

impl auth::RequireAuth for RealtimeState {
    fn auth_token(&self) -> Arc<String> {
        self.auth_token.clone()
    }

    fn allow_public_access(&self) -> bool {
        self.allow_public_access
    }
}

/// Creates a new `Router` for the realtime endpoints.
///
/// `GET /realtime` opens an event stream (the first record is the handshake
/// assigning a client id), `POST /realtime` replaces a client's subscription
/// set, `POST /publish/{topic}` fans an event out to subscribed clients, and
/// `POST /drop` severs every live stream.
pub fn router(auth_token: Arc<String>, allow_public_access: bool) -> Router {
    info!(
        allow_public_access = allow_public_access,
        "initializing realtime module"
    );

    let state = RealtimeState {
        clients: ClientMap::new(DashMap::new()),
        auth_token,
        allow_public_access,
    };

    Router::new()
        .route("/realtime", get(connect).post(submit))
        .route("/publish/{*topic}", post(publish))
        .route("/drop", post(drop_streams))
        .layer(from_fn_with_state(
            state.clone(),
            auth::middleware::<RealtimeState>,
        ))
        .with_state(state)
}
