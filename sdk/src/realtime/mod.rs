//! Realtime event subscriptions.
//!
//! The engine multiplexes any number of topic subscriptions over a single
//! server-sent-events stream. One actor task per client identity owns the
//! subscription registry and the connection state machine; callers and the
//! stream transport talk to it exclusively through its mailbox, so no state is
//! shared across tasks.
//!
//! Lifecycle: the first subscribe (or an explicit [Realtime::ensure_connected])
//! spawns the transport. The server's handshake record assigns a client id,
//! after which the current subscription set is submitted to the control
//! endpoint. Every registry mutation while connected re-submits the full set.
//! A dropped stream is transparently re-established while listeners remain;
//! removing the last listener tears the connection down.

mod key;
mod parser;
mod registry;
mod transport;

pub use key::SubscribeOptions;
pub use parser::Record;

use crate::auth::TokenStore;
use crate::error::Error;
use crate::Client;
use bytes::Bytes;
use http::{header, HeaderMap, HeaderValue};
use registry::{Listener, Registry};
use reqwest::Client as HttpClient;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// The event name of the handshake record that assigns the client id.
pub const CONNECT_EVENT: &str = "PB_CONNECT";

/// Path of both the streaming endpoint (GET) and the control endpoint (POST).
pub const REALTIME_PATH: &str = "/api/realtime";

/// Pause before re-establishing a dropped stream, to avoid hot-looping on a
/// refused connection.
const RECONNECT_DELAY: Duration = Duration::from_millis(200);

/// An event delivered to a listener callback.
#[derive(Clone, Debug)]
pub struct Message {
    /// The record id carried on the stream, if any.
    pub id: Option<String>,
    /// The topic the record was published under.
    pub topic: String,
    /// The record's JSON payload. Malformed payloads decode as `{}`.
    pub data: Value,
}

/// A keyed table of realtime actors, one per distinct client identity
/// (base URL + token store). Clients sharing a hub share connections; tests
/// can create independent hubs to get isolated instances.
#[derive(Clone, Default)]
pub struct Hub {
    actors: Arc<Mutex<HashMap<String, Realtime>>>,
}

impl Hub {
    pub(crate) fn get_or_spawn(&self, client: &Client) -> Realtime {
        let fingerprint = format!("{}#{}", client.base_url(), client.auth().id());
        let mut actors = self.actors.lock().unwrap();
        actors
            .entry(fingerprint)
            .or_insert_with(|| Realtime::spawn(client))
            .clone()
    }
}

/// A handle to the realtime engine for one client identity.
///
/// Cheap to clone; all clones address the same actor.
#[derive(Clone)]
pub struct Realtime {
    tx: mpsc::UnboundedSender<Inbound>,
}

impl Realtime {
    fn spawn(client: &Client) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let actor = Actor {
            http_client: client.http_client().clone(),
            base_url: client.base_url().to_string(),
            language: client.language().to_string(),
            auth: client.auth().clone(),
            registry: Registry::default(),
            state: ConnState::Idle,
            parser: parser::FrameParser::default(),
            generation: 0,
            transport: None,
            waiters: Vec::new(),
            tx: tx.clone(),
        };
        tokio::spawn(actor.run(rx));
        Self { tx }
    }

    /// Registers `callback` for records published under `topic` and returns
    /// the listener id. Establishes the stream if it is not already up.
    pub async fn subscribe<F>(
        &self,
        topic: &str,
        options: SubscribeOptions,
        callback: F,
    ) -> Result<String, Error>
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        if topic.is_empty() {
            return Err(Error::Internal("topic must not be empty".to_string()));
        }
        let (id, seq) = registry::next_listener_id();
        let listener = Listener {
            id: id.clone(),
            seq,
            callback: Arc::new(callback),
        };
        let key = key::composite_key(topic, &options);
        self.command(|done| Command::Subscribe {
            key,
            listener,
            done,
        })
        .await?;
        Ok(id)
    }

    /// Removes every listener for `topic`, including subscriptions created
    /// with options. Unknown topics are a no-op. Tears the connection down
    /// when no listeners remain anywhere.
    pub async fn unsubscribe(&self, topic: &str) -> Result<(), Error> {
        self.command(|done| Command::Unsubscribe {
            topic: topic.to_string(),
            done,
        })
        .await
    }

    /// Removes the single listener `id` from `topic`. Unknown ids are a no-op.
    pub async fn unsubscribe_by_id(&self, topic: &str, id: &str) -> Result<(), Error> {
        self.command(|done| Command::UnsubscribeById {
            topic: topic.to_string(),
            id: id.to_string(),
            done,
        })
        .await
    }

    /// Removes every listener whose topic matches `prefix`. Used for
    /// collection-scoped unbinding; equivalent to [Realtime::unsubscribe].
    pub async fn unsubscribe_prefix(&self, prefix: &str) -> Result<(), Error> {
        self.unsubscribe(prefix).await
    }

    /// Blocks until the connection is ready, returning the server-assigned
    /// client id. Initiates a connection when idle. Fails with
    /// [Error::NotConnected] after `timeout` without affecting the reconnect
    /// loop.
    pub async fn ensure_connected(&self, timeout: Duration) -> Result<String, Error> {
        let (notify, ready) = oneshot::channel();
        self.tx
            .send(Inbound::Command(Command::WaitReady { notify }))
            .map_err(|_| Self::stopped())?;
        match tokio::time::timeout(timeout, ready).await {
            Ok(Ok(client_id)) => Ok(client_id),
            Ok(Err(_)) => Err(Self::stopped()),
            Err(_) => Err(Error::NotConnected(timeout)),
        }
    }

    /// The current server-assigned client id, if the connection is ready.
    pub async fn client_id(&self) -> Result<Option<String>, Error> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Inbound::Command(Command::ClientId { reply }))
            .map_err(|_| Self::stopped())?;
        rx.await.map_err(|_| Self::stopped())
    }

    async fn command<F>(&self, make: F) -> Result<(), Error>
    where
        F: FnOnce(oneshot::Sender<()>) -> Command,
    {
        let (done, applied) = oneshot::channel();
        self.tx
            .send(Inbound::Command(make(done)))
            .map_err(|_| Self::stopped())?;
        applied.await.map_err(|_| Self::stopped())
    }

    fn stopped() -> Error {
        Error::Internal("realtime actor stopped".to_string())
    }
}

pub(crate) enum Inbound {
    Command(Command),
    Stream(StreamEvent),
}

pub(crate) enum Command {
    Subscribe {
        key: String,
        listener: Listener,
        done: oneshot::Sender<()>,
    },
    Unsubscribe {
        topic: String,
        done: oneshot::Sender<()>,
    },
    UnsubscribeById {
        topic: String,
        id: String,
        done: oneshot::Sender<()>,
    },
    WaitReady {
        notify: oneshot::Sender<String>,
    },
    ClientId {
        reply: oneshot::Sender<Option<String>>,
    },
}

pub(crate) enum StreamEvent {
    Chunk { generation: u64, bytes: Bytes },
    Ended { generation: u64 },
}

enum ConnState {
    Idle,
    Connecting,
    Ready { client_id: String },
}

/// The single-writer owner of registry and connection state.
struct Actor {
    http_client: HttpClient,
    base_url: String,
    language: String,
    auth: Arc<TokenStore>,
    registry: Registry,
    state: ConnState,
    parser: parser::FrameParser,
    /// Bumped on every (re)connect and teardown; messages from transports of
    /// older generations are discarded.
    generation: u64,
    transport: Option<JoinHandle<()>>,
    waiters: Vec<oneshot::Sender<String>>,
    tx: mpsc::UnboundedSender<Inbound>,
}

impl Actor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Inbound>) {
        while let Some(inbound) = rx.recv().await {
            match inbound {
                Inbound::Command(command) => self.handle_command(command),
                Inbound::Stream(event) => self.handle_stream(event),
            }
        }
        // Every handle dropped; stop the transport with the actor.
        self.teardown();
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Subscribe {
                key,
                listener,
                done,
            } => {
                self.registry.add(key, listener);
                match self.state {
                    ConnState::Idle => self.connect(Duration::ZERO),
                    ConnState::Ready { .. } => self.submit(),
                    ConnState::Connecting => {}
                }
                let _ = done.send(());
            }
            Command::Unsubscribe { topic, done } => {
                let removed = self.registry.remove_topic(&topic);
                self.after_removal(removed);
                let _ = done.send(());
            }
            Command::UnsubscribeById { topic, id, done } => {
                let removed = self.registry.remove_listener(&topic, &id);
                self.after_removal(removed);
                let _ = done.send(());
            }
            Command::WaitReady { notify } => match &self.state {
                ConnState::Ready { client_id } => {
                    let _ = notify.send(client_id.clone());
                }
                ConnState::Connecting => self.waiters.push(notify),
                ConnState::Idle => {
                    self.waiters.push(notify);
                    self.connect(Duration::ZERO);
                }
            },
            Command::ClientId { reply } => {
                let client_id = match &self.state {
                    ConnState::Ready { client_id } => Some(client_id.clone()),
                    _ => None,
                };
                let _ = reply.send(client_id);
            }
        }
    }

    fn handle_stream(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Chunk { generation, bytes } => {
                if generation != self.generation {
                    return;
                }
                for record in self.parser.push(&bytes) {
                    self.dispatch(record);
                }
            }
            StreamEvent::Ended { generation } => {
                if generation != self.generation {
                    return;
                }
                self.transport = None;
                if self.registry.is_empty() {
                    self.teardown();
                } else {
                    debug!("realtime stream ended, reconnecting");
                    self.connect(RECONNECT_DELAY);
                }
            }
        }
    }

    fn dispatch(&mut self, record: Record) {
        if record.event == CONNECT_EVENT {
            self.complete_handshake(&record);
            return;
        }
        let data: Value =
            serde_json::from_str(&record.data).unwrap_or_else(|_| Value::Object(Default::default()));
        let message = Message {
            id: record.id,
            topic: record.event,
            data,
        };
        for listener in self.registry.listeners_for_topic(&message.topic) {
            let callback = listener.callback.clone();
            if catch_unwind(AssertUnwindSafe(|| callback(&message))).is_err() {
                debug!(
                    listener = %listener.id,
                    topic = %message.topic,
                    "listener callback panicked"
                );
            }
        }
    }

    fn complete_handshake(&mut self, record: &Record) {
        let data: Value = serde_json::from_str(&record.data).unwrap_or(Value::Null);
        let client_id = data
            .get("clientId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| record.id.clone());
        let Some(client_id) = client_id else {
            warn!("handshake record carried no client id");
            return;
        };
        debug!(client_id = %client_id, "realtime connection ready");
        self.state = ConnState::Ready {
            client_id: client_id.clone(),
        };
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(client_id.clone());
        }
        if self.registry.is_empty() {
            // The connection only lives while subscriptions exist; with the
            // waiters served there is nothing left for it to carry.
            debug!("no listeners registered, closing realtime connection");
            self.teardown();
            return;
        }
        self.submit();
    }

    fn after_removal(&mut self, removed: bool) {
        if self.registry.is_empty() {
            if !matches!(self.state, ConnState::Idle) {
                debug!("last listener removed, closing realtime connection");
                self.teardown();
            }
        } else if removed && matches!(self.state, ConnState::Ready { .. }) {
            self.submit();
        }
    }

    /// Spawns a new transport under a fresh generation, stopping any previous
    /// one. `delay` paces reconnect attempts.
    fn connect(&mut self, delay: Duration) {
        self.generation += 1;
        self.state = ConnState::Connecting;
        self.parser.reset();
        if let Some(transport) = self.transport.take() {
            transport.abort();
        }
        let url = format!("{}{}", self.base_url, REALTIME_PATH);
        self.transport = Some(transport::spawn(
            self.http_client.clone(),
            url,
            self.stream_headers(),
            self.generation,
            self.tx.clone(),
            delay,
        ));
    }

    /// Forcibly stops the transport and returns to idle. A later subscribe
    /// re-establishes everything from scratch.
    fn teardown(&mut self) {
        self.generation += 1;
        self.state = ConnState::Idle;
        self.parser.reset();
        if let Some(transport) = self.transport.take() {
            transport.abort();
        }
    }

    /// Pushes the authoritative subscription set for this client id to the
    /// control endpoint. Best-effort: the server replaces the whole set, and
    /// failures only get logged.
    fn submit(&self) {
        let ConnState::Ready { client_id } = &self.state else {
            return;
        };
        let body = serde_json::json!({
            "clientId": client_id,
            "subscriptions": self.registry.keys(),
        });
        let url = format!("{}{}", self.base_url, REALTIME_PATH);
        let request = self
            .http_client
            .post(&url)
            .headers(self.auth_headers())
            .json(&body);
        tokio::spawn(async move {
            match request.send().await {
                Ok(res) if !res.status().is_success() => {
                    warn!(status = %res.status(), "subscription submission rejected");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(error = ?err, "subscription submission failed");
                }
            }
        });
    }

    fn stream_headers(&self) -> HeaderMap {
        let mut headers = self.auth_headers();
        headers.insert(header::ACCEPT, HeaderValue::from_static("text/event-stream"));
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        if let Ok(language) = HeaderValue::from_str(&self.language) {
            headers.insert(header::ACCEPT_LANGUAGE, language);
        }
        headers.insert(
            header::USER_AGENT,
            HeaderValue::from_static(crate::USER_AGENT),
        );
        headers
    }

    fn auth_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if self.auth.is_valid() {
            if let Some(token) = self.auth.token() {
                if let Ok(value) = HeaderValue::from_str(&token) {
                    headers.insert(header::AUTHORIZATION, value);
                }
            }
        }
        headers
    }
}
