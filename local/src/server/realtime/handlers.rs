use crate::server::realtime::{ClientEntry, RealtimeState};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use futures::StreamExt;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Deserialize;
use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info};

/// The event name of the handshake record sent first on every stream.
const CONNECT_EVENT: &str = "PB_CONNECT";

static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

/// Opens an event stream for a new client.
///
/// Assigns a fresh client id, registers the connection, and immediately sends
/// the handshake record carrying that id. Subsequent records are whatever gets
/// published to topics in the client's submitted subscription set.
pub async fn connect(State(state): State<RealtimeState>) -> Response {
    let client_id: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(15)
        .map(char::from)
        .collect();

    let (tx, rx) = mpsc::unbounded_channel::<Bytes>();
    state.clients.insert(
        client_id.clone(),
        ClientEntry {
            tx,
            subscriptions: HashSet::new(),
        },
    );
    info!(client_id = %client_id, "realtime client connected");

    let payload = serde_json::json!({ "clientId": client_id });
    let hello = Bytes::from(format!(
        "id: {client_id}\nevent: {CONNECT_EVENT}\ndata: {payload}\n\n"
    ));
    let stream = futures::stream::once(async move { Ok::<_, Infallible>(hello) })
        .chain(UnboundedReceiverStream::new(rx).map(Ok));

    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}

/// The JSON payload replacing a client's subscription set.
#[derive(Deserialize)]
pub struct SubmitPayload {
    #[serde(rename = "clientId")]
    pub client_id: String,
    pub subscriptions: Vec<String>,
}

/// Replaces the subscription set for a connected client. Each submission is a
/// full replacement, not an incremental diff.
pub async fn submit(
    State(state): State<RealtimeState>,
    Json(payload): Json<SubmitPayload>,
) -> StatusCode {
    match state.clients.get_mut(&payload.client_id) {
        Some(mut entry) => {
            debug!(
                client_id = %payload.client_id,
                subscriptions = payload.subscriptions.len(),
                "subscription set replaced"
            );
            entry.subscriptions = payload.subscriptions.into_iter().collect();
            StatusCode::NO_CONTENT
        }
        None => StatusCode::NOT_FOUND,
    }
}

/// Publishes the raw request body under `topic` to every client whose
/// subscription set contains a key for that topic. The body is forwarded
/// verbatim; it is not required to be JSON.
pub async fn publish(
    State(state): State<RealtimeState>,
    Path(topic): Path<String>,
    body: Bytes,
) -> StatusCode {
    let event_id = NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed);
    let mut frame = format!("id: e-{event_id}\nevent: {topic}\n");
    for line in String::from_utf8_lossy(&body).split('\n') {
        frame.push_str("data: ");
        frame.push_str(line);
        frame.push('\n');
    }
    frame.push('\n');
    let frame = Bytes::from(frame);

    let mut delivered = 0usize;
    state.clients.retain(|_, entry| {
        let subscribed = entry
            .subscriptions
            .iter()
            .any(|key| topic_portion(key) == topic);
        if !subscribed {
            return true;
        }
        // Stale entries (disconnected receivers) are pruned on failed sends.
        if entry.tx.send(frame.clone()).is_ok() {
            delivered += 1;
            true
        } else {
            false
        }
    });

    debug!(topic = %topic, delivered = delivered, "event published");
    StatusCode::NO_CONTENT
}

/// Severs every live event stream. Clients are expected to reconnect and
/// perform a fresh handshake; used to exercise reconnect behavior.
pub async fn drop_streams(State(state): State<RealtimeState>) -> StatusCode {
    let dropped = state.clients.len();
    state.clients.clear();
    info!(dropped = dropped, "dropped all realtime streams");
    StatusCode::NO_CONTENT
}

/// Returns the topic half of a composite subscription key.
fn topic_portion(key: &str) -> &str {
    match key.split_once("?options=") {
        Some((topic, _)) => topic,
        None => key,
    }
}
