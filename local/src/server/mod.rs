use axum::{serve, Router};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::info;

mod auth;
pub mod realtime;

/// Subcommand for the server.
pub const CMD: &str = "server";

/// Run the local server.
pub const RUN_CMD: &str = "run";

/// Errors that can occur when running the local server.
#[derive(Error, Debug)]
pub enum Error {
    /// An I/O error occurred.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Runs the Driftbase local server.
///
/// # Arguments
///
/// * `port` - The port to bind the server to.
/// * `auth_token` - The token expected in `Authorization` headers.
/// * `allow_public_access` - A flag to allow unauthenticated access for read-only methods.
pub async fn run(port: &u16, auth_token: String, allow_public_access: bool) -> Result<(), Error> {
    info!(
        port = port,
        allow_public_access = allow_public_access,
        "starting driftbase local server"
    );

    let listener = TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!(address = %listener.local_addr()?, "server listening");

    let auth_token = Arc::new(auth_token);
    let realtime_router = realtime::router(auth_token, allow_public_access);

    // Create a permissive CORS layer.
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any);

    let router = Router::new().nest("/api", realtime_router).layer(cors);

    info!("server routes configured, starting to serve requests");

    serve(listener, router.into_make_service())
        .await
        .map_err(Error::Io)
}
