//! Batched ingestion.
//!
//! The pipeline sits between the merged relay stream and the store. The
//! producer side validates identity and pushes into a bounded buffer
//! (blocking when full, which is how backpressure reaches the sockets). A
//! single drain task takes at least one event, greedily drains whatever
//! else is immediately available up to `max_batch`, writes the batch, then
//! waits `check_interval` before draining again. Batches are variable-size
//! but bounded, and emission rate is bounded by the interval — latency
//! traded for write amortization.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use weir_protocol::Event;

use crate::error::{IngestError, Result};
use crate::refs::{References, extract_references};
use crate::store::EventStore;

/// Ingestion pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Upper bound on batch size; also the buffer capacity at which
    /// producers start blocking.
    pub max_batch: usize,
    /// Pause between drains; bounds the batch emission rate.
    pub check_interval: Duration,
    /// Capacity of the live broadcast to application subscribers.
    pub live_buffer: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_batch: 1000,
            check_interval: Duration::from_millis(500),
            live_buffer: 1024,
        }
    }
}

/// What happened to a submitted event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Accepted,
    /// Identity validation failed; the event was counted and dropped
    /// before reaching storage. Not an error: a bad relay or bad actor
    /// must not be able to wedge the pipeline.
    Rejected(String),
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    accepted: AtomicU64,
    rejected: AtomicU64,
    stored: AtomicU64,
    batches: AtomicU64,
    failed_batches: AtomicU64,
}

/// Snapshot of the pipeline's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub received: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub stored: u64,
    pub batches: u64,
    pub failed_batches: u64,
}

/// Batched, reference-extracting store writer.
pub struct IngestionPipeline<S> {
    store: Arc<S>,
    config: PipelineConfig,
}

impl<S: EventStore + 'static> IngestionPipeline<S> {
    pub fn new(store: Arc<S>, config: PipelineConfig) -> Self {
        Self { store, config }
    }

    /// Start the drain task. Returns the producer handle and the drain
    /// task's join handle; the task exits once every handle clone is
    /// dropped and the buffer has been flushed.
    pub fn start(self) -> (IngestHandle, JoinHandle<()>) {
        let (event_tx, event_rx) = mpsc::channel(self.config.max_batch);
        let (live_tx, _) = broadcast::channel(self.config.live_buffer);
        let counters = Arc::new(Counters::default());

        let drain = tokio::spawn(drain_loop(
            self.store,
            self.config,
            event_rx,
            Arc::clone(&counters),
        ));

        (
            IngestHandle {
                event_tx,
                live_tx,
                counters,
            },
            drain,
        )
    }
}

/// Producer side of the pipeline. Clonable; the pipeline shuts down and
/// flushes once all clones are dropped.
#[derive(Clone)]
pub struct IngestHandle {
    event_tx: mpsc::Sender<Event>,
    live_tx: broadcast::Sender<Event>,
    counters: Arc<Counters>,
}

impl IngestHandle {
    /// Validate and enqueue one event.
    ///
    /// Blocks while the buffer is full — that is the backpressure applied
    /// to the merge stream. Identity failures are an [`IngestOutcome`],
    /// not an error; `Err` only means the pipeline is gone.
    pub async fn submit(&self, event: Event) -> Result<IngestOutcome> {
        self.counters.received.fetch_add(1, Ordering::Relaxed);

        if let Err(reason) = event.validate() {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            debug!("rejected event {}: {}", event.id, reason);
            return Ok(IngestOutcome::Rejected(reason.to_string()));
        }

        // Refined stream for live application subscribers; lagging or
        // absent subscribers never block ingestion.
        let _ = self.live_tx.send(event.clone());

        self.event_tx
            .send(event)
            .await
            .map_err(|_| IngestError::Closed)?;
        self.counters.accepted.fetch_add(1, Ordering::Relaxed);
        Ok(IngestOutcome::Accepted)
    }

    /// Drive a merged relay stream to completion, submitting every event.
    pub async fn consume<St>(&self, mut stream: St) -> Result<()>
    where
        St: Stream<Item = Event> + Unpin,
    {
        while let Some(event) = stream.next().await {
            self.submit(event).await?;
        }
        Ok(())
    }

    /// Post-validation event stream for application-level subscribers.
    pub fn live_events(&self) -> broadcast::Receiver<Event> {
        self.live_tx.subscribe()
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            received: self.counters.received.load(Ordering::Relaxed),
            accepted: self.counters.accepted.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            stored: self.counters.stored.load(Ordering::Relaxed),
            batches: self.counters.batches.load(Ordering::Relaxed),
            failed_batches: self.counters.failed_batches.load(Ordering::Relaxed),
        }
    }
}

async fn drain_loop<S: EventStore>(
    store: Arc<S>,
    config: PipelineConfig,
    mut events: mpsc::Receiver<Event>,
    counters: Arc<Counters>,
) {
    let mut batch = Vec::with_capacity(config.max_batch);

    loop {
        // Park until something arrives. `None` means every producer is
        // gone and the buffer is drained: the shutdown flush has already
        // happened through the normal path, so nothing is dropped.
        let Some(first) = events.recv().await else {
            break;
        };
        batch.push(first);

        // Greedy drain of whatever is immediately available, no blocking.
        while batch.len() < config.max_batch {
            match events.try_recv() {
                Ok(event) => batch.push(event),
                Err(_) => break,
            }
        }

        write_batch(store.as_ref(), &batch, &counters).await;
        batch.clear();

        if !config.check_interval.is_zero() {
            tokio::time::sleep(config.check_interval).await;
        }
    }
}

async fn write_batch<S: EventStore + ?Sized>(store: &S, batch: &[Event], counters: &Counters) {
    // A batch can carry the same id more than once (duplicate delivery
    // from two relays landing in one drain); extract references once per
    // unique event so no duplicate rows are produced.
    let mut seen = HashSet::new();
    let mut references = References::default();
    for event in batch {
        if seen.insert(event.id.as_str()) {
            references.merge(extract_references(event));
        }
    }

    // Event rows first, then reference rows: references are child rows
    // under the event they point from.
    let written = match store.upsert(batch).await {
        Ok(()) => {
            store
                .insert_references(
                    &references.event_refs,
                    &references.pubkey_refs,
                    &references.hashtag_refs,
                )
                .await
        }
        Err(error) => Err(error),
    };

    match written {
        Ok(()) => {
            counters.batches.fetch_add(1, Ordering::Relaxed);
            counters
                .stored
                .fetch_add(batch.len() as u64, Ordering::Relaxed);
        }
        Err(store_error) => {
            counters.failed_batches.fetch_add(1, Ordering::Relaxed);
            // The read side must keep running; log enough context (the
            // event ids) for the batch to be replayed.
            let ids: Vec<&str> = batch.iter().map(|event| event.id.as_str()).collect();
            error!(
                "batch write failed ({} events): {}; event ids: {:?}",
                batch.len(),
                store_error,
                ids
            );
        }
    }
}
