use thiserror::Error;

/// Errors that can occur when interacting with the Driftbase API.
///
/// The realtime engine absorbs transport, submission, and parse failures
/// internally (they feed the reconnect loop instead of surfacing), so the
/// public API only ever produces these.
#[derive(Error, Debug)]
pub enum Error {
    /// The realtime connection did not become ready within the allotted time.
    #[error("realtime connection not established within {0:?}")]
    NotConnected(std::time::Duration),
    /// An internal SDK error.
    #[error("internal error: {0}")]
    Internal(String),
}
