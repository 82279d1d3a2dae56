//! Single relay connection management.
//!
//! A [`RelayConnection`] owns exactly one relay endpoint: its connection
//! state machine, its subscription table, and its read task. Relays forget
//! clients across reconnects, so every transition into `Connected` replays
//! the whole subscription table onto the wire.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock, mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, warn};
use url::Url;

use weir_protocol::{ClientMessage, Event, RelayMessage, Subscription};

use crate::error::{ClientError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;

/// Per-relay connection state, published on the status stream.
///
/// Transitions: `Idle → Connecting → Connected → {Closing → Closed} |
/// Failed`. Failure is not fatal to the owning process and there is no
/// automatic retry; recovery means calling [`RelayConnection::connect`]
/// again. Consecutive identical statuses collapse to one emission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayStatus {
    Idle,
    Connecting,
    Connected,
    Closing { code: Option<u16>, reason: String },
    Closed { code: Option<u16>, reason: String },
    Failed { cause: String },
}

impl RelayStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Relay connection configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub connect_timeout: Duration,
    /// Capacity of each subscription's delivery channel. Sends block when
    /// full, so downstream backpressure reaches the socket.
    pub subscription_buffer: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            subscription_buffer: 1024,
        }
    }
}

struct SubscriptionEntry {
    subscription: Subscription,
    sender: mpsc::Sender<Event>,
}

enum Command {
    Unsubscribe(String),
}

/// One persistent connection to one relay.
pub struct RelayConnection {
    url: Url,
    config: RelayConfig,
    status_tx: watch::Sender<RelayStatus>,
    writer: Arc<Mutex<Option<WsWriter>>>,
    subscriptions: Arc<RwLock<HashMap<String, SubscriptionEntry>>>,
    command_tx: mpsc::UnboundedSender<Command>,
    read_task: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl RelayConnection {
    /// Create a new relay connection with default config.
    pub fn new(url: &str) -> Result<Self> {
        Self::with_config(url, RelayConfig::default())
    }

    /// Create a new relay connection with custom config.
    pub fn with_config(url: &str, config: RelayConfig) -> Result<Self> {
        let parsed_url = Url::parse(url)?;
        if parsed_url.scheme() != "ws" && parsed_url.scheme() != "wss" {
            return Err(ClientError::InvalidUrl(format!(
                "expected ws:// or wss:// scheme, got: {}",
                parsed_url.scheme()
            )));
        }

        let (status_tx, _status_rx) = watch::channel(RelayStatus::Idle);
        let writer: Arc<Mutex<Option<WsWriter>>> = Arc::new(Mutex::new(None));
        let subscriptions: Arc<RwLock<HashMap<String, SubscriptionEntry>>> =
            Arc::new(RwLock::new(HashMap::new()));

        // Subscription streams signal their teardown through this channel;
        // dropping a stream is enough to unsubscribe.
        let (command_tx, mut command_rx) = mpsc::unbounded_channel();
        {
            let subscriptions = Arc::clone(&subscriptions);
            let writer = Arc::clone(&writer);
            let status_tx = status_tx.clone();
            let relay_url = parsed_url.to_string();
            tokio::spawn(async move {
                while let Some(Command::Unsubscribe(id)) = command_rx.recv().await {
                    close_subscription(&subscriptions, &writer, &status_tx, &relay_url, &id).await;
                }
            });
        }

        Ok(Self {
            url: parsed_url,
            config,
            status_tx,
            writer,
            subscriptions,
            command_tx,
            read_task: std::sync::Mutex::new(None),
        })
    }

    /// Relay URL as string.
    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    /// Current connection status.
    pub fn current_status(&self) -> RelayStatus {
        self.status_tx.borrow().clone()
    }

    /// Status stream; only changed values are published.
    pub fn status(&self) -> watch::Receiver<RelayStatus> {
        self.status_tx.subscribe()
    }

    /// Connect and start the read task.
    ///
    /// Idempotent while already connected or connecting. On every
    /// successful transition into `Connected` the local subscription table
    /// is replayed onto the wire, exactly once per subscription.
    pub async fn connect(&self) -> Result<()> {
        let started = self.status_tx.send_if_modified(|current| {
            if matches!(current, RelayStatus::Connected | RelayStatus::Connecting) {
                false
            } else {
                *current = RelayStatus::Connecting;
                true
            }
        });
        if !started {
            return Ok(());
        }

        let connected = timeout(
            self.config.connect_timeout,
            connect_async(self.url.as_str()),
        )
        .await;

        let (stream, _response) = match connected {
            Err(_) => {
                let cause = format!("connect timeout after {:?}", self.config.connect_timeout);
                publish_status(&self.status_tx, RelayStatus::Failed { cause: cause.clone() });
                return Err(ClientError::Connection(cause));
            }
            Ok(Err(error)) => {
                let cause = error.to_string();
                publish_status(&self.status_tx, RelayStatus::Failed { cause: cause.clone() });
                return Err(ClientError::WebSocket(cause));
            }
            Ok(Ok(pair)) => pair,
        };

        let (writer, reader) = stream.split();
        *self.writer.lock().await = Some(writer);
        publish_status(&self.status_tx, RelayStatus::Connected);

        self.replay_subscriptions().await;

        let task = tokio::spawn(read_loop(
            reader,
            Arc::clone(&self.subscriptions),
            Arc::clone(&self.writer),
            self.status_tx.clone(),
            self.url.to_string(),
        ));
        if let Ok(mut slot) = self.read_task.lock()
            && let Some(previous) = slot.replace(task)
        {
            previous.abort();
        }
        Ok(())
    }

    /// Close the connection and stop the read task. Subscriptions stay in
    /// the local table and are replayed on the next `connect()`.
    pub async fn disconnect(&self) {
        publish_status(
            &self.status_tx,
            RelayStatus::Closing {
                code: Some(1000),
                reason: "client disconnect".to_string(),
            },
        );

        if let Some(mut writer) = self.writer.lock().await.take()
            && let Err(error) = writer.send(Message::Close(None)).await
        {
            debug!("close handshake with {} failed: {}", self.url, error);
        }

        if let Ok(mut slot) = self.read_task.lock()
            && let Some(task) = slot.take()
        {
            task.abort();
        }

        publish_status(
            &self.status_tx,
            RelayStatus::Closed {
                code: Some(1000),
                reason: "client disconnect".to_string(),
            },
        );
    }

    /// Register a subscription and return its event stream.
    ///
    /// The REQ goes out immediately when connected; otherwise it is
    /// deferred to the next reconnect (never an error). The returned
    /// stream yields only events for this subscription id, in wire arrival
    /// order. Dropping the stream unsubscribes. Re-using an id replaces
    /// the previous registration, keeping at most one outstanding wire
    /// subscription per id.
    pub async fn subscribe(&self, subscription: Subscription) -> SubscriptionStream {
        let (sender, receiver) = mpsc::channel(self.config.subscription_buffer);
        let subscription_id = subscription.id.clone();
        let request = ClientMessage::req(&subscription);

        self.subscriptions.write().await.insert(
            subscription_id.clone(),
            SubscriptionEntry {
                subscription,
                sender,
            },
        );

        let connected = self.status_tx.borrow().is_connected();
        if connected
            && let Err(error) = self.send_message(&request).await
        {
            debug!(
                "deferring REQ {} to {} until reconnect: {}",
                subscription_id, self.url, error
            );
        }

        SubscriptionStream {
            subscription_id,
            receiver,
            command_tx: self.command_tx.clone(),
        }
    }

    /// Remove a subscription; idempotent if already removed.
    pub async fn unsubscribe(&self, subscription_id: &str) {
        close_subscription(
            &self.subscriptions,
            &self.writer,
            &self.status_tx,
            self.url.as_str(),
            subscription_id,
        )
        .await;
    }

    /// Subscription ids currently registered.
    pub async fn subscription_ids(&self) -> Vec<String> {
        self.subscriptions.read().await.keys().cloned().collect()
    }

    async fn replay_subscriptions(&self) {
        let snapshot: Vec<Subscription> = {
            let table = self.subscriptions.read().await;
            table
                .values()
                .map(|entry| entry.subscription.clone())
                .collect()
        };
        for subscription in snapshot {
            if let Err(error) = self.send_message(&ClientMessage::req(&subscription)).await {
                warn!(
                    "replaying subscription {} to {} failed: {}",
                    subscription.id, self.url, error
                );
            }
        }
    }

    async fn send_message(&self, message: &ClientMessage) -> Result<()> {
        let text = message.to_wire()?;
        let mut writer_guard = self.writer.lock().await;
        let writer = writer_guard.as_mut().ok_or(ClientError::NotConnected)?;
        writer
            .send(Message::Text(text.into()))
            .await
            .map_err(|error| ClientError::WebSocket(error.to_string()))
    }
}

impl Drop for RelayConnection {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.read_task.lock()
            && let Some(task) = slot.take()
        {
            task.abort();
        }
    }
}

/// Stream of events for one subscription on one relay.
///
/// Dropping the stream sends CLOSE and removes the subscription from the
/// connection's table.
pub struct SubscriptionStream {
    subscription_id: String,
    receiver: mpsc::Receiver<Event>,
    command_tx: mpsc::UnboundedSender<Command>,
}

impl SubscriptionStream {
    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    pub async fn recv(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }
}

impl Stream for SubscriptionStream {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for SubscriptionStream {
    fn drop(&mut self) {
        let _ = self
            .command_tx
            .send(Command::Unsubscribe(self.subscription_id.clone()));
    }
}

fn publish_status(status_tx: &watch::Sender<RelayStatus>, next: RelayStatus) {
    status_tx.send_if_modified(move |current| {
        if *current == next {
            false
        } else {
            *current = next;
            true
        }
    });
}

async fn close_subscription(
    subscriptions: &RwLock<HashMap<String, SubscriptionEntry>>,
    writer: &Mutex<Option<WsWriter>>,
    status_tx: &watch::Sender<RelayStatus>,
    relay_url: &str,
    subscription_id: &str,
) {
    let removed = subscriptions.write().await.remove(subscription_id).is_some();
    if !removed || !status_tx.borrow().is_connected() {
        return;
    }

    let Ok(text) = ClientMessage::close(subscription_id).to_wire() else {
        return;
    };
    let mut writer_guard = writer.lock().await;
    if let Some(writer) = writer_guard.as_mut()
        && let Err(error) = writer.send(Message::Text(text.into())).await
    {
        debug!("CLOSE {} to {} failed: {}", subscription_id, relay_url, error);
    }
}

async fn read_loop(
    mut reader: WsReader,
    subscriptions: Arc<RwLock<HashMap<String, SubscriptionEntry>>>,
    writer: Arc<Mutex<Option<WsWriter>>>,
    status_tx: watch::Sender<RelayStatus>,
    relay_url: String,
) {
    while let Some(frame) = reader.next().await {
        match frame {
            Ok(Message::Text(text)) => match RelayMessage::from_wire(text.as_str()) {
                Ok(RelayMessage::Event {
                    subscription_id,
                    event,
                }) => {
                    let sender = {
                        subscriptions
                            .read()
                            .await
                            .get(&subscription_id)
                            .map(|entry| entry.sender.clone())
                    };
                    if let Some(sender) = sender
                        && sender.send(event).await.is_err()
                    {
                        debug!(
                            "subscription {} on {} dropped its stream",
                            subscription_id, relay_url
                        );
                    }
                }
                Ok(RelayMessage::Notice { message }) => {
                    // Diagnostic only; never terminates the connection or a
                    // subscription stream.
                    debug!("notice from {}: {}", relay_url, message);
                }
                Err(error) => {
                    // One undecodable frame must not take the connection
                    // down; log and skip.
                    warn!("undecodable frame from {}: {}", relay_url, error);
                }
            },
            Ok(Message::Ping(payload)) => {
                debug!("ping from {} ({} bytes)", relay_url, payload.len());
            }
            Ok(Message::Pong(_)) | Ok(Message::Binary(_)) | Ok(Message::Frame(_)) => {}
            Ok(Message::Close(frame)) => {
                let (code, reason) = match frame {
                    Some(frame) => (Some(u16::from(frame.code)), frame.reason.to_string()),
                    None => (None, String::new()),
                };
                publish_status(
                    &status_tx,
                    RelayStatus::Closing {
                        code,
                        reason: reason.clone(),
                    },
                );
                writer.lock().await.take();
                publish_status(&status_tx, RelayStatus::Closed { code, reason });
                return;
            }
            Err(error) => {
                writer.lock().await.take();
                publish_status(
                    &status_tx,
                    RelayStatus::Failed {
                        cause: error.to_string(),
                    },
                );
                return;
            }
        }
    }

    // Peer went away without a close handshake.
    writer.lock().await.take();
    publish_status(
        &status_tx,
        RelayStatus::Closed {
            code: None,
            reason: "connection closed".to_string(),
        },
    );
}
