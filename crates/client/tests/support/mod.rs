//! In-process relay for driving the client against a real WebSocket.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, Notify, mpsc};
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::Message;

use weir_protocol::{ClientMessage, RelayMessage};

#[derive(Default)]
struct RelayState {
    /// One entry per accepted connection, in accept order; each holds the
    /// client messages that session decoded.
    sessions: Mutex<Vec<Vec<ClientMessage>>>,
    /// Writer into the most recent live session.
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    drop_signal: Notify,
}

/// A relay test double: accepts any number of sequential connections,
/// records every decoded client message per session, and lets the test
/// inject relay messages or kill the live session.
pub struct MockRelay {
    addr: SocketAddr,
    state: Arc<RelayState>,
}

impl MockRelay {
    pub async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(RelayState::default());

        let accept_state = Arc::clone(&state);
        tokio::spawn(async move {
            loop {
                let Ok((tcp, _)) = listener.accept().await else {
                    return;
                };
                let Ok(ws) = tokio_tungstenite::accept_async(tcp).await else {
                    continue;
                };
                let (mut sink, mut stream) = ws.split();

                let session_index = {
                    let mut sessions = accept_state.sessions.lock().await;
                    sessions.push(Vec::new());
                    sessions.len() - 1
                };

                let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
                *accept_state.outbound.lock().await = Some(outbound_tx);

                let writer = tokio::spawn(async move {
                    while let Some(message) = outbound_rx.recv().await {
                        if sink.send(message).await.is_err() {
                            break;
                        }
                    }
                });

                let drop_signal = accept_state.drop_signal.notified();
                tokio::pin!(drop_signal);
                loop {
                    tokio::select! {
                        () = &mut drop_signal => break,
                        frame = stream.next() => match frame {
                            Some(Ok(Message::Text(text))) => {
                                if let Ok(message) = ClientMessage::from_wire(text.as_str()) {
                                    accept_state.sessions.lock().await[session_index].push(message);
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => {}
                            Some(Err(_)) => break,
                        }
                    }
                }

                // Dropping the writer half tears the TCP session down
                // without a close handshake.
                writer.abort();
                *accept_state.outbound.lock().await = None;
            }
        });

        Self { addr, state }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Push a relay message to the live session.
    pub async fn send(&self, message: &RelayMessage) {
        let text = message.to_wire().unwrap();
        self.send_raw(&text).await;
    }

    /// Push a raw text frame (for malformed / unknown messages).
    pub async fn send_raw(&self, text: &str) {
        let outbound = self.state.outbound.lock().await;
        outbound
            .as_ref()
            .expect("no live session")
            .send(Message::Text(text.to_string().into()))
            .unwrap();
    }

    /// Abruptly drop the live session, as a crashing relay would.
    pub async fn kill_session(&self) {
        self.state.drop_signal.notify_waiters();
    }

    pub async fn session_count(&self) -> usize {
        self.state.sessions.lock().await.len()
    }

    /// Messages recorded for one session, in arrival order.
    pub async fn session(&self, index: usize) -> Vec<ClientMessage> {
        self.state.sessions.lock().await[index].clone()
    }

    pub async fn wait_for_sessions(&self, count: usize) {
        wait_for(|| async move { self.session_count().await >= count }).await;
    }

    /// Wait until session `index` has recorded at least `count` messages.
    pub async fn wait_for_messages(&self, index: usize, count: usize) {
        wait_for(|| async move {
            let sessions = self.state.sessions.lock().await;
            sessions.get(index).is_some_and(|log| log.len() >= count)
        })
        .await;
    }
}

/// Poll a condition for up to five seconds.
pub async fn wait_for<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if condition().await {
            return;
        }
        sleep(Duration::from_millis(25)).await;
    }
    panic!("condition not met within 5s");
}

/// Wait until a connection's status stream satisfies a predicate.
pub async fn wait_for_status(
    rx: &mut tokio::sync::watch::Receiver<weir_client::RelayStatus>,
    predicate: impl Fn(&weir_client::RelayStatus) -> bool,
) {
    loop {
        if predicate(&rx.borrow_and_update()) {
            return;
        }
        rx.changed().await.unwrap();
    }
}

/// Subscription ids of every REQ in a session log.
pub fn req_ids(log: &[ClientMessage]) -> Vec<String> {
    log.iter()
        .filter_map(|message| match message {
            ClientMessage::Req {
                subscription_id, ..
            } => Some(subscription_id.clone()),
            ClientMessage::Close { .. } => None,
        })
        .collect()
}

/// Subscription ids of every CLOSE in a session log.
pub fn close_ids(log: &[ClientMessage]) -> Vec<String> {
    log.iter()
        .filter_map(|message| match message {
            ClientMessage::Close { subscription_id } => Some(subscription_id.clone()),
            ClientMessage::Req { .. } => None,
        })
        .collect()
}
