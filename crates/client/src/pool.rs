//! Relay pool: one logical relay interface backed by N connections.
//!
//! The pool broadcasts subscribe/unsubscribe/connect to every owned
//! connection and merges their streams, so the rest of the system is
//! relay-count-agnostic. The merge is "many writers, one channel": each
//! relay gets its own forwarder task, which is what isolates a wedged
//! relay from its siblings.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::Stream;
use futures_util::future::join_all;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::debug;

use weir_protocol::{Event, Subscription};

use crate::error::{ClientError, Result};
use crate::relay::{RelayConfig, RelayConnection, RelayStatus};

/// Relay pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of relays in the pool.
    pub max_relays: usize,
    /// Relay configuration template.
    pub relay_config: RelayConfig,
    /// Capacity of the merged event channel.
    pub merge_buffer: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_relays: 16,
            relay_config: RelayConfig::default(),
            merge_buffer: 1024,
        }
    }
}

/// Multi-relay pool.
pub struct RelayPool {
    relays: Arc<RwLock<HashMap<String, Arc<RelayConnection>>>>,
    config: PoolConfig,
}

impl RelayPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            relays: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// Add a relay URL to the pool; not connected until `connect_all`.
    /// Adding an already-known URL is a no-op.
    pub async fn add_relay(&self, url: &str) -> Result<()> {
        let mut relays = self.relays.write().await;
        if relays.contains_key(url) {
            return Ok(());
        }
        if relays.len() >= self.config.max_relays {
            return Err(ClientError::PoolLimit(self.config.max_relays));
        }
        let relay = RelayConnection::with_config(url, self.config.relay_config.clone())?;
        relays.insert(url.to_string(), Arc::new(relay));
        Ok(())
    }

    /// Get a relay by URL.
    pub async fn relay(&self, url: &str) -> Option<Arc<RelayConnection>> {
        self.relays.read().await.get(url).cloned()
    }

    /// URLs of every owned relay.
    pub async fn relay_urls(&self) -> Vec<String> {
        self.relays.read().await.keys().cloned().collect()
    }

    /// Connect every relay concurrently. Individual failures are logged
    /// and do not affect the others; an error is returned only when no
    /// relay could be reached at all.
    pub async fn connect_all(&self) -> Result<()> {
        let relays = self.snapshot().await;
        let total = relays.len();
        let attempts = relays.into_iter().map(|relay| async move {
            let result = relay.connect().await;
            (relay.url().to_string(), result)
        });

        let mut connected = 0usize;
        for (url, result) in join_all(attempts).await {
            match result {
                Ok(()) => connected += 1,
                Err(error) => debug!("connect to {} failed: {}", url, error),
            }
        }

        if total > 0 && connected == 0 {
            return Err(ClientError::Connection(
                "failed to connect to any relay".to_string(),
            ));
        }
        Ok(())
    }

    /// Disconnect every relay.
    pub async fn disconnect_all(&self) {
        for relay in self.snapshot().await {
            relay.disconnect().await;
        }
    }

    /// Broadcast a subscription to every relay and merge their streams.
    ///
    /// No ordering guarantee across relays; within one relay, arrival
    /// order is preserved. Duplicate events from different relays are NOT
    /// deduplicated here — that is the storage layer's upsert. Dropping
    /// the returned stream unsubscribes everywhere.
    pub async fn subscribe(&self, subscription: Subscription) -> PoolSubscription {
        let relays = self.snapshot().await;
        let (merged_tx, merged_rx) = mpsc::channel(self.config.merge_buffer);

        let mut forwarders = Vec::with_capacity(relays.len());
        for relay in relays {
            let mut stream = relay.subscribe(subscription.clone()).await;
            let merged_tx = merged_tx.clone();
            forwarders.push(tokio::spawn(async move {
                while let Some(event) = stream.recv().await {
                    if merged_tx.send(event).await.is_err() {
                        break;
                    }
                }
                // `stream` drops here, which unsubscribes this relay.
            }));
        }

        PoolSubscription {
            subscription_id: subscription.id,
            receiver: merged_rx,
            forwarders,
        }
    }

    /// Close a subscription on every relay; idempotent.
    pub async fn unsubscribe(&self, subscription_id: &str) {
        for relay in self.snapshot().await {
            relay.unsubscribe(subscription_id).await;
        }
    }

    /// Merged status stream of every owned connection, tagged by relay
    /// URL. The current status of each relay is emitted first.
    pub async fn connection_status(&self) -> mpsc::Receiver<(String, RelayStatus)> {
        let relays = self.snapshot().await;
        let (status_tx, status_rx) = mpsc::channel(64);

        for relay in relays {
            let mut watch_rx = relay.status();
            let url = relay.url().to_string();
            let status_tx = status_tx.clone();
            tokio::spawn(async move {
                loop {
                    let status = watch_rx.borrow_and_update().clone();
                    if status_tx.send((url.clone(), status)).await.is_err() {
                        return;
                    }
                    if watch_rx.changed().await.is_err() {
                        return;
                    }
                }
            });
        }

        status_rx
    }

    async fn snapshot(&self) -> Vec<Arc<RelayConnection>> {
        self.relays.read().await.values().cloned().collect()
    }
}

/// Merged event stream for one subscription across the whole pool.
pub struct PoolSubscription {
    subscription_id: String,
    receiver: mpsc::Receiver<Event>,
    forwarders: Vec<JoinHandle<()>>,
}

impl PoolSubscription {
    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    pub async fn recv(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }
}

impl Stream for PoolSubscription {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for PoolSubscription {
    fn drop(&mut self) {
        // Aborting a forwarder drops its per-relay stream, whose teardown
        // sends the CLOSE.
        for forwarder in &self.forwarders {
            forwarder.abort();
        }
    }
}
