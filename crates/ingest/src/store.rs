//! Storage contract.
//!
//! The on-device store is an external collaborator; this module only fixes
//! the ingestion-facing contract: idempotent upsert keyed by event id,
//! reference rows regenerated per source event, and the read path used to
//! pre-filter backfill subscriptions.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use weir_protocol::Event;

use crate::error::Result;
use crate::refs::{EventReference, HashtagReference, PubkeyReference};

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Upsert event rows keyed by `id`. Re-delivery of the same id from
    /// multiple relays or reconnects is expected and must neither
    /// duplicate nor error.
    async fn upsert(&self, events: &[Event]) -> Result<()>;

    /// Insert reference rows. Rows for a given source event replace that
    /// event's previous rows: references are derived data and are
    /// regenerated wholesale on re-ingestion. Called after `upsert` for
    /// the same batch, so child rows never point at a missing event row.
    async fn insert_references(
        &self,
        event_refs: &[EventReference],
        pubkey_refs: &[PubkeyReference],
        hashtag_refs: &[HashtagReference],
    ) -> Result<()>;

    async fn get_by_id(&self, id: &str) -> Result<Option<Event>>;

    /// Which of `ids` are not yet stored — used to avoid re-fetching
    /// already-known events before issuing a backfill subscription.
    async fn missing_ids(&self, ids: &[String]) -> Result<Vec<String>> {
        let mut missing = Vec::new();
        for id in ids {
            if self.get_by_id(id).await?.is_none() {
                missing.push(id.clone());
            }
        }
        Ok(missing)
    }
}

/// In-memory store: the reference implementation of the contract, also
/// used as the test double. Records per-call batch sizes so tests can
/// assert batching behavior.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    events: HashMap<String, Event>,
    event_refs: HashMap<String, Vec<EventReference>>,
    pubkey_refs: HashMap<String, Vec<PubkeyReference>>,
    hashtag_refs: HashMap<String, Vec<HashtagReference>>,
    batch_sizes: Vec<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn event_count(&self) -> usize {
        self.inner.lock().await.events.len()
    }

    /// Sizes of every `upsert` batch, in call order.
    pub async fn batch_sizes(&self) -> Vec<usize> {
        self.inner.lock().await.batch_sizes.clone()
    }

    pub async fn event_refs_for(&self, source_event: &str) -> Vec<EventReference> {
        self.inner
            .lock()
            .await
            .event_refs
            .get(source_event)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn pubkey_refs_for(&self, source_event: &str) -> Vec<PubkeyReference> {
        self.inner
            .lock()
            .await
            .pubkey_refs
            .get(source_event)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn hashtag_refs_for(&self, source_event: &str) -> Vec<HashtagReference> {
        self.inner
            .lock()
            .await
            .hashtag_refs
            .get(source_event)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn reference_count(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.event_refs.values().map(Vec::len).sum::<usize>()
            + inner.pubkey_refs.values().map(Vec::len).sum::<usize>()
            + inner.hashtag_refs.values().map(Vec::len).sum::<usize>()
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn upsert(&self, events: &[Event]) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.batch_sizes.push(events.len());
        for event in events {
            inner.events.insert(event.id.clone(), event.clone());
        }
        Ok(())
    }

    async fn insert_references(
        &self,
        event_refs: &[EventReference],
        pubkey_refs: &[PubkeyReference],
        hashtag_refs: &[HashtagReference],
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;

        let mut grouped_events: HashMap<String, Vec<EventReference>> = HashMap::new();
        for row in event_refs {
            grouped_events
                .entry(row.source_event.clone())
                .or_default()
                .push(row.clone());
        }
        for (source, rows) in grouped_events {
            inner.event_refs.insert(source, rows);
        }

        let mut grouped_pubkeys: HashMap<String, Vec<PubkeyReference>> = HashMap::new();
        for row in pubkey_refs {
            grouped_pubkeys
                .entry(row.source_event.clone())
                .or_default()
                .push(row.clone());
        }
        for (source, rows) in grouped_pubkeys {
            inner.pubkey_refs.insert(source, rows);
        }

        let mut grouped_hashtags: HashMap<String, Vec<HashtagReference>> = HashMap::new();
        for row in hashtag_refs {
            grouped_hashtags
                .entry(row.source_event.clone())
                .or_default()
                .push(row.clone());
        }
        for (source, rows) in grouped_hashtags {
            inner.hashtag_refs.insert(source, rows);
        }

        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Event>> {
        Ok(self.inner.lock().await.events.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_event(id: &str) -> Event {
        Event {
            id: id.to_string(),
            pubkey: "p".repeat(64),
            created_at: 1,
            kind: 1,
            tags: vec![],
            content: String::new(),
            sig: "s".repeat(128),
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent_by_id() -> Result<()> {
        let store = MemoryStore::new();
        let event = stub_event("dup");
        store.upsert(&[event.clone()]).await?;
        store.upsert(&[event]).await?;

        assert_eq!(store.event_count().await, 1);
        assert_eq!(store.batch_sizes().await, vec![1, 1]);
        Ok(())
    }

    #[tokio::test]
    async fn reference_rows_replace_rather_than_accumulate() -> Result<()> {
        let store = MemoryStore::new();
        let row = EventReference {
            source_event: "src".to_string(),
            target_event: "dst".to_string(),
            relay_hint: None,
            marker: None,
        };
        store.insert_references(&[row.clone()], &[], &[]).await?;
        store.insert_references(&[row.clone()], &[], &[]).await?;

        assert_eq!(store.event_refs_for("src").await, vec![row]);
        assert_eq!(store.reference_count().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn missing_ids_reports_only_unknown_events() -> Result<()> {
        let store = MemoryStore::new();
        store.upsert(&[stub_event("known")]).await?;

        let missing = store
            .missing_ids(&["known".to_string(), "unknown".to_string()])
            .await?;
        assert_eq!(missing, vec!["unknown".to_string()]);
        Ok(())
    }
}
