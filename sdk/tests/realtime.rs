use driftbase_sdk::realtime::{Message, SubscribeOptions};
use driftbase_sdk::{Client, Error};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Handle for driving the local server from tests (publishing events and
/// severing streams are server-side operations).
struct TestServer {
    base_url: String,
    token: String,
    http: reqwest::Client,
}

impl TestServer {
    async fn publish(&self, topic: &str, body: &str) {
        let url = format!("{}/api/publish/{}", self.base_url, topic);
        let res = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.token))
            .body(body.to_string())
            .send()
            .await
            .expect("publish request failed");
        assert!(res.status().is_success(), "publish rejected: {}", res.status());
    }

    async fn drop_streams(&self) {
        let url = format!("{}/api/drop", self.base_url);
        let res = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.token))
            .send()
            .await
            .expect("drop request failed");
        assert!(res.status().is_success(), "drop rejected: {}", res.status());
    }
}

/// A test helper to run the local server and a test function against it.
///
/// Picks an unused port, generates a random auth token, and starts the server
/// in the background. When the test function completes, the server is aborted.
async fn with_server<F, Fut>(allow_public_access: bool, test_fn: F)
where
    F: FnOnce(Client, TestServer) -> Fut,
    Fut: Future<Output = ()>,
{
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();

    let port = portpicker::pick_unused_port().expect("failed to find unused port");
    let addr = format!("http://127.0.0.1:{}", port);
    let token: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect();

    let server_task: JoinHandle<Result<(), driftbase_local::server::Error>> = tokio::spawn({
        let token = token.clone();
        async move { driftbase_local::server::run(&port, token, allow_public_access).await }
    });

    // Give the server a moment to start up
    tokio::time::sleep(Duration::from_millis(100)).await;

    let client = Client::new(addr.clone(), token.clone());
    let server = TestServer {
        base_url: addr,
        token,
        http: reqwest::Client::new(),
    };
    test_fn(client, server).await;

    server_task.abort();
}

/// Subscribes to `topic`, forwarding every delivered message into a channel.
async fn subscribe_collecting(
    client: &Client,
    topic: &str,
    options: SubscribeOptions,
) -> (String, UnboundedReceiver<Message>) {
    let (tx, rx) = unbounded_channel();
    let id = client
        .realtime()
        .subscribe(topic, options, move |message: &Message| {
            let _ = tx.send(message.clone());
        })
        .await
        .unwrap();
    (id, rx)
}

/// Waits for the in-flight subscription submission to land server-side.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(250)).await;
}

#[tokio::test]
async fn test_connect_and_receive() {
    with_server(true, |client, server| async move {
        let realtime = client.realtime();
        let (_, mut rx) = subscribe_collecting(&client, "posts/*", SubscribeOptions::default()).await;

        let client_id = realtime
            .ensure_connected(Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!client_id.is_empty());
        assert_eq!(
            realtime.client_id().await.unwrap(),
            Some(client_id.clone())
        );
        // A second wait on an established connection is idempotent.
        assert_eq!(
            realtime.ensure_connected(Duration::from_secs(5)).await.unwrap(),
            client_id
        );
        settle().await;

        server
            .publish("posts/*", r#"{"id":"r1","action":"create"}"#)
            .await;

        let message = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no event within deadline")
            .unwrap();
        assert_eq!(message.topic, "posts/*");
        assert_eq!(message.data["action"], "create");
        assert_eq!(message.data["id"], "r1");

        // Exactly one delivery.
        assert!(timeout(Duration::from_millis(300), rx.recv()).await.is_err());
    })
    .await;
}

#[tokio::test]
async fn test_unsubscribe_by_id_preserves_other_listeners() {
    with_server(true, |client, server| async move {
        let realtime = client.realtime();

        let (tx, mut rx) = unbounded_channel::<&'static str>();
        let subscribe_tagged = |tag: &'static str| {
            let tx: UnboundedSender<&'static str> = tx.clone();
            let realtime = realtime.clone();
            async move {
                realtime
                    .subscribe("tasks", SubscribeOptions::default(), move |_| {
                        let _ = tx.send(tag);
                    })
                    .await
                    .unwrap()
            }
        };
        let _first = subscribe_tagged("first").await;
        let second = subscribe_tagged("second").await;
        let _third = subscribe_tagged("third").await;

        realtime
            .ensure_connected(Duration::from_secs(5))
            .await
            .unwrap();
        realtime.unsubscribe_by_id("tasks", &second).await.unwrap();
        settle().await;

        server.publish("tasks", r#"{"n":1}"#).await;

        let mut tags = Vec::new();
        for _ in 0..2 {
            tags.push(
                timeout(Duration::from_secs(5), rx.recv())
                    .await
                    .expect("missing delivery")
                    .unwrap(),
            );
        }
        assert_eq!(tags, ["first", "third"]);
        assert!(timeout(Duration::from_millis(300), rx.recv()).await.is_err());
    })
    .await;
}

#[tokio::test]
async fn test_identical_submission_is_idempotent() {
    with_server(true, |client, server| async move {
        let realtime = client.realtime();
        let (_, mut rx) = subscribe_collecting(&client, "posts/*", SubscribeOptions::default()).await;

        let client_id = realtime
            .ensure_connected(Duration::from_secs(5))
            .await
            .unwrap();
        settle().await;

        // Adding and removing a second listener on the same key submits the
        // exact same subscription set twice more.
        let extra = realtime
            .subscribe("posts/*", SubscribeOptions::default(), |_| {})
            .await
            .unwrap();
        realtime.unsubscribe_by_id("posts/*", &extra).await.unwrap();
        settle().await;

        // No client-side state changed: same connection, same client id.
        assert_eq!(realtime.client_id().await.unwrap(), Some(client_id));

        server.publish("posts/*", r#"{"n":1}"#).await;
        let message = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no event after resubmissions")
            .unwrap();
        assert_eq!(message.data["n"], 1);

        // Exactly one delivery.
        assert!(timeout(Duration::from_millis(300), rx.recv()).await.is_err());
    })
    .await;
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    with_server(true, |client, server| async move {
        let realtime = client.realtime();
        // Keep a sender clone alive so dropping the listener on unsubscribe
        // does not close the channel; recv() then only resolves on delivery.
        let (tx, mut rx) = unbounded_channel::<Message>();
        let _keep_open = tx.clone();
        realtime
            .subscribe("posts/*", SubscribeOptions::default(), move |message: &Message| {
                let _ = tx.send(message.clone());
            })
            .await
            .unwrap();

        realtime
            .ensure_connected(Duration::from_secs(5))
            .await
            .unwrap();
        settle().await;

        realtime.unsubscribe("posts/*").await.unwrap();
        // Registry is empty, so the connection is torn down entirely.
        assert_eq!(realtime.client_id().await.unwrap(), None);

        server.publish("posts/*", r#"{"n":1}"#).await;
        assert!(timeout(Duration::from_millis(300), rx.recv()).await.is_err());
    })
    .await;
}

#[tokio::test]
async fn test_unsubscribe_unknown_topic_is_noop() {
    with_server(true, |client, _server| async move {
        let realtime = client.realtime();
        realtime.unsubscribe("never-subscribed").await.unwrap();
        realtime
            .unsubscribe_by_id("never-subscribed", "l-0")
            .await
            .unwrap();
        realtime.unsubscribe_prefix("never/").await.unwrap();
    })
    .await;
}

#[tokio::test]
async fn test_reconnect_after_stream_drop() {
    with_server(true, |client, server| async move {
        let realtime = client.realtime();
        let (_, mut rx) = subscribe_collecting(&client, "posts/*", SubscribeOptions::default()).await;

        let first_id = realtime
            .ensure_connected(Duration::from_secs(5))
            .await
            .unwrap();
        settle().await;

        server.drop_streams().await;

        // The engine notices the dropped stream and performs a fresh
        // handshake, which assigns a new client id.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        let second_id = loop {
            let id = realtime
                .ensure_connected(Duration::from_secs(5))
                .await
                .unwrap();
            if id != first_id {
                break id;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "stream never reconnected"
            );
            tokio::time::sleep(Duration::from_millis(50)).await;
        };
        assert_ne!(second_id, first_id);
        settle().await;

        // Listeners survived the reconnect.
        server.publish("posts/*", r#"{"after":"reconnect"}"#).await;
        let message = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no event after reconnect")
            .unwrap();
        assert_eq!(message.data["after"], "reconnect");
    })
    .await;
}

#[tokio::test]
async fn test_malformed_payload_dispatches_empty_object() {
    with_server(true, |client, server| async move {
        let realtime = client.realtime();
        let (_, mut rx) = subscribe_collecting(&client, "posts/*", SubscribeOptions::default()).await;

        realtime
            .ensure_connected(Duration::from_secs(5))
            .await
            .unwrap();
        settle().await;

        server.publish("posts/*", "{not json}").await;

        let message = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("record was dropped")
            .unwrap();
        assert_eq!(message.data, serde_json::json!({}));
    })
    .await;
}

#[tokio::test]
async fn test_listener_panic_is_isolated() {
    with_server(true, |client, server| async move {
        let realtime = client.realtime();
        realtime
            .subscribe("posts/*", SubscribeOptions::default(), |_| {
                panic!("listener blew up");
            })
            .await
            .unwrap();
        let (_, mut rx) = subscribe_collecting(&client, "posts/*", SubscribeOptions::default()).await;

        realtime
            .ensure_connected(Duration::from_secs(5))
            .await
            .unwrap();
        settle().await;

        server.publish("posts/*", r#"{"n":1}"#).await;
        let message = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("panicking listener blocked delivery")
            .unwrap();
        assert_eq!(message.data["n"], 1);

        // The connection survived the panic.
        server.publish("posts/*", r#"{"n":2}"#).await;
        let message = timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.data["n"], 2);
    })
    .await;
}

#[tokio::test]
async fn test_options_create_distinct_subscriptions() {
    with_server(true, |client, server| async move {
        let realtime = client.realtime();

        let mut options = SubscribeOptions::default();
        options
            .query
            .insert("filter".to_string(), "status='open'".to_string());

        let (_, mut plain_rx) =
            subscribe_collecting(&client, "tasks", SubscribeOptions::default()).await;
        let (_, mut filtered_rx) = subscribe_collecting(&client, "tasks", options).await;

        realtime
            .ensure_connected(Duration::from_secs(5))
            .await
            .unwrap();
        settle().await;

        server.publish("tasks", r#"{"n":1}"#).await;

        // Both keys share the topic portion, so both listeners get the event.
        let plain = timeout(Duration::from_secs(5), plain_rx.recv())
            .await
            .expect("plain subscription missed the event")
            .unwrap();
        let filtered = timeout(Duration::from_secs(5), filtered_rx.recv())
            .await
            .expect("filtered subscription missed the event")
            .unwrap();
        assert_eq!(plain.data["n"], 1);
        assert_eq!(filtered.data["n"], 1);
    })
    .await;
}

#[tokio::test]
async fn test_ensure_connected_times_out_without_credentials() {
    with_server(false, |client, _server| async move {
        let unauth = Client::new(client.base_url().to_string(), "wrong-token".to_string());
        let err = unauth
            .realtime()
            .ensure_connected(Duration::from_millis(500))
            .await
            .unwrap_err();
        match err {
            Error::NotConnected(_) => {}
            other => panic!("unexpected error type: {other}"),
        }
    })
    .await;
}

#[tokio::test]
async fn test_ensure_connected_without_listeners_releases_connection() {
    with_server(true, |client, _server| async move {
        let realtime = client.realtime();

        // The explicit wait still performs a full handshake...
        let client_id = realtime
            .ensure_connected(Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!client_id.is_empty());

        // ...but with nothing registered the connection does not linger.
        assert_eq!(realtime.client_id().await.unwrap(), None);

        // A subscribe afterwards re-establishes from idle as usual.
        realtime
            .subscribe("posts/*", SubscribeOptions::default(), |_| {})
            .await
            .unwrap();
        let reconnected = realtime
            .ensure_connected(Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!reconnected.is_empty());
    })
    .await;
}

#[tokio::test]
async fn test_cloned_clients_share_connection() {
    with_server(true, |client, _server| async move {
        let clone = client.clone();
        let realtime = client.realtime();
        realtime
            .subscribe("posts/*", SubscribeOptions::default(), |_| {})
            .await
            .unwrap();
        let client_id = realtime
            .ensure_connected(Duration::from_secs(5))
            .await
            .unwrap();

        // The clone routes through the same hub entry, so it observes the
        // same live connection instead of opening a second one.
        assert_eq!(
            clone.realtime().client_id().await.unwrap(),
            Some(client_id)
        );
    })
    .await;
}

#[tokio::test]
async fn test_resubscribe_after_teardown() {
    with_server(true, |client, server| async move {
        let realtime = client.realtime();
        let (_, _rx) = subscribe_collecting(&client, "posts/*", SubscribeOptions::default()).await;
        realtime
            .ensure_connected(Duration::from_secs(5))
            .await
            .unwrap();
        realtime.unsubscribe("posts/*").await.unwrap();
        assert_eq!(realtime.client_id().await.unwrap(), None);

        // A later subscribe lazily re-establishes everything from idle.
        let (_, mut rx) = subscribe_collecting(&client, "users", SubscribeOptions::default()).await;
        realtime
            .ensure_connected(Duration::from_secs(5))
            .await
            .unwrap();
        settle().await;

        server.publish("users", r#"{"back":"up"}"#).await;
        let message = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no event after re-establishing")
            .unwrap();
        assert_eq!(message.data["back"], "up");
    })
    .await;
}
