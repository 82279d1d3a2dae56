//! The protocol's sole object type: an immutable, content-addressed,
//! signed event.

use serde::{Deserialize, Serialize};

/// Well-known kind discriminators. The set is open-ended; unknown kinds
/// flow through the client opaquely.
pub mod kind {
    pub const METADATA: u32 = 0;
    pub const TEXT_NOTE: u32 = 1;
    pub const RECOMMEND_RELAY: u32 = 2;
    pub const CONTACTS: u32 = 3;
    pub const REPOST: u32 = 6;
    pub const REACTION: u32 = 7;
}

/// A signed event as it appears on the wire.
///
/// `id` is the lowercase hex SHA-256 of the canonical form and `sig` a
/// 64-byte Schnorr signature over it; both are recomputed during
/// validation, never trusted from the wire. Events are immutable after
/// construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u32,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: String,
}

/// First element of a tag, which discriminates its type (`"e"`, `"p"`, …).
pub fn tag_name(tag: &[String]) -> Option<&str> {
    tag.first().map(String::as_str)
}

/// Positional tag element, `None` when the tag is too short.
pub fn tag_field(tag: &[String], index: usize) -> Option<&str> {
    tag.get(index).map(String::as_str)
}
