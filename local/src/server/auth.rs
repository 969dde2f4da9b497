use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// A trait for states that require authentication.
///
/// This trait provides access to the authentication token and the public access flag,
/// allowing the authentication middleware to be generic over different states.
pub trait RequireAuth: Clone + Send + Sync + 'static {
    /// Returns the authentication token.
    fn auth_token(&self) -> Arc<String>;
    /// Returns whether public access is allowed.
    fn allow_public_access(&self) -> bool;
}

/// Axum middleware for authentication.
///
/// Accepts the token either bare or with a `Bearer ` prefix, matching both
/// browser SDKs and tooling that speaks standard bearer auth. If
/// `allow_public_access` is true, GET requests are allowed without a token.
pub async fn middleware<S>(
    State(state): State<S>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode>
where
    S: RequireAuth,
{
    let method = request.method().clone();
    let uri = request.uri().clone();

    if let Some(auth_header) = request.headers().get("Authorization") {
        if let Ok(auth_str) = auth_header.to_str() {
            let token = auth_str.strip_prefix("Bearer ").unwrap_or(auth_str);
            if token == state.auth_token().as_str() {
                return Ok(next.run(request).await);
            }
            warn!(method = %method, uri = %uri, "authentication failed: invalid token");
        } else {
            warn!(
                method = %method,
                uri = %uri,
                "authentication failed: invalid authorization header encoding"
            );
        }
    }

    if state.allow_public_access() && request.method() == "GET" {
        debug!(method = %method, uri = %uri, "allowing public access for GET request");
        return Ok(next.run(request).await);
    }

    warn!(
        method = %method,
        uri = %uri,
        "authentication failed: no valid credentials provided"
    );

    Err(StatusCode::UNAUTHORIZED)
}
