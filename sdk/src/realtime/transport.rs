//! The streaming half of a realtime connection.
//!
//! Each connection attempt runs as its own task so a blocked read never stalls
//! subscribe/unsubscribe calls. The task forwards body chunks to the actor
//! tagged with the generation it was spawned under and collapses every outcome
//! (refused connection, non-success status, mid-stream drop, natural end) into
//! a single `Ended` message. It never surfaces errors to caller code.

use crate::realtime::{Inbound, StreamEvent};
use futures_util::StreamExt;
use http::HeaderMap;
use reqwest::Client as HttpClient;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::debug;

pub(crate) fn spawn(
    http_client: HttpClient,
    url: String,
    headers: HeaderMap,
    generation: u64,
    tx: UnboundedSender<Inbound>,
    delay: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        read_stream(http_client, url, headers, generation, &tx).await;
        let _ = tx.send(Inbound::Stream(StreamEvent::Ended { generation }));
    })
}

async fn read_stream(
    http_client: HttpClient,
    url: String,
    headers: HeaderMap,
    generation: u64,
    tx: &UnboundedSender<Inbound>,
) {
    let res = match http_client.get(&url).headers(headers).send().await {
        Ok(res) => res,
        Err(err) => {
            debug!(error = ?err, "realtime stream request failed");
            return;
        }
    };
    if !res.status().is_success() {
        debug!(status = %res.status(), "realtime stream rejected");
        return;
    }

    let mut body = res.bytes_stream();
    while let Some(chunk) = body.next().await {
        match chunk {
            Ok(bytes) => {
                if tx
                    .send(Inbound::Stream(StreamEvent::Chunk { generation, bytes }))
                    .is_err()
                {
                    // Actor gone; nothing left to feed.
                    return;
                }
            }
            Err(err) => {
                debug!(error = ?err, "realtime stream dropped");
                return;
            }
        }
    }
    debug!("realtime stream ended");
}
