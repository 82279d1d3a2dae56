//! Subscription predicates.

use serde::{Deserialize, Serialize};

/// What a subscription wants. A value, not an entity: two filters with the
/// same fields are the same filter.
///
/// Empty collections mean "any" and are omitted from the wire form. Tag
/// predicates serialize under `#`-prefixed keys as sibling fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    /// Inclusive lower bound on `created_at`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kinds: Vec<u32>,

    /// Event ids referenced via `e`-tags (thread / reaction queries).
    #[serde(rename = "#e", default, skip_serializing_if = "Vec::is_empty")]
    pub event_refs: Vec<String>,

    /// Pubkeys referenced via `p`-tags.
    #[serde(rename = "#p", default, skip_serializing_if = "Vec::is_empty")]
    pub pubkey_refs: Vec<String>,

    /// Cap on historical backfill; live delivery is unaffected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn since(mut self, since: u64) -> Self {
        self.since = Some(since);
        self
    }

    pub fn authors(mut self, authors: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.authors = authors.into_iter().map(Into::into).collect();
        self
    }

    pub fn kinds(mut self, kinds: impl IntoIterator<Item = u32>) -> Self {
        self.kinds = kinds.into_iter().collect();
        self
    }

    pub fn event_refs(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.event_refs = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn pubkey_refs(mut self, pubkeys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.pubkey_refs = pubkeys.into_iter().map(Into::into).collect();
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// A client-assigned opaque id paired with one or more filters (OR
/// semantics across filters, applied relay-side).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub id: String,
    pub filters: Vec<Filter>,
}

impl Subscription {
    pub fn new(id: impl Into<String>, filters: Vec<Filter>) -> Self {
        Self {
            id: id.into(),
            filters,
        }
    }

    /// Mint a subscription with a random hex id.
    pub fn generate(filters: Vec<Filter>) -> Self {
        let id: [u8; 16] = rand::random();
        Self::new(hex::encode(id), filters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_fields_are_omitted_from_wire_form() -> serde_json::Result<()> {
        let filter = Filter::new();
        assert_eq!(serde_json::to_string(&filter)?, "{}");
        Ok(())
    }

    #[test]
    fn tag_predicates_use_hash_prefixed_keys() -> serde_json::Result<()> {
        let filter = Filter::new()
            .since(1_700_000_000)
            .kinds([1, 7])
            .event_refs(["abc123"])
            .pubkey_refs(["def456"])
            .limit(50);

        let value = serde_json::to_value(&filter)?;
        assert_eq!(value["since"], 1_700_000_000);
        assert_eq!(value["kinds"], serde_json::json!([1, 7]));
        assert_eq!(value["#e"], serde_json::json!(["abc123"]));
        assert_eq!(value["#p"], serde_json::json!(["def456"]));
        assert_eq!(value["limit"], 50);
        assert!(value.get("authors").is_none());

        let back: Filter = serde_json::from_value(value)?;
        assert_eq!(back, filter);
        Ok(())
    }

    #[test]
    fn generated_subscription_ids_are_unique() {
        let a = Subscription::generate(vec![Filter::new()]);
        let b = Subscription::generate(vec![Filter::new()]);
        assert_ne!(a.id, b.id);
        assert_eq!(a.id.len(), 32);
    }
}
