//! Reference records derived from an event's tags.
//!
//! These are deterministic projections of the source event: they are never
//! created independently and never mutated, only regenerated when the
//! source event is (re-)ingested. Malformed tags are skipped, never fatal.

use serde::{Deserialize, Serialize};

use weir_protocol::{Event, tag_field, tag_name};

/// Positional marker on an `e`-tag (4th element).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Marker {
    Root,
    Reply,
    Mention,
}

impl Marker {
    /// Unknown or absent markers are `None`, never an error.
    pub fn parse(value: Option<&str>) -> Option<Marker> {
        match value {
            Some("root") => Some(Self::Root),
            Some("reply") => Some(Self::Reply),
            Some("mention") => Some(Self::Mention),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Reply => "reply",
            Self::Mention => "mention",
        }
    }
}

/// `e`-tag: this event references another event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventReference {
    pub source_event: String,
    pub target_event: String,
    pub relay_hint: Option<String>,
    pub marker: Option<Marker>,
}

/// `p`-tag: this event references a pubkey.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubkeyReference {
    pub source_event: String,
    pub pubkey: String,
    pub relay_hint: Option<String>,
}

/// `t`-tag: this event carries a hashtag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashtagReference {
    pub source_event: String,
    pub hashtag: String,
}

/// All reference rows extracted from one or more events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct References {
    pub event_refs: Vec<EventReference>,
    pub pubkey_refs: Vec<PubkeyReference>,
    pub hashtag_refs: Vec<HashtagReference>,
}

impl References {
    pub fn merge(&mut self, other: References) {
        self.event_refs.extend(other.event_refs);
        self.pubkey_refs.extend(other.pubkey_refs);
        self.hashtag_refs.extend(other.hashtag_refs);
    }

    pub fn len(&self) -> usize {
        self.event_refs.len() + self.pubkey_refs.len() + self.hashtag_refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Scan an event's tags for `e`/`p`/`t` references.
///
/// Tags with fewer than two elements carry no target and are skipped.
/// Empty relay hints collapse to `None`.
pub fn extract_references(event: &Event) -> References {
    let mut references = References::default();

    for tag in &event.tags {
        match tag_name(tag) {
            Some("e") => {
                let Some(target) = tag_field(tag, 1) else {
                    continue;
                };
                references.event_refs.push(EventReference {
                    source_event: event.id.clone(),
                    target_event: target.to_string(),
                    relay_hint: relay_hint(tag_field(tag, 2)),
                    marker: Marker::parse(tag_field(tag, 3)),
                });
            }
            Some("p") => {
                let Some(pubkey) = tag_field(tag, 1) else {
                    continue;
                };
                references.pubkey_refs.push(PubkeyReference {
                    source_event: event.id.clone(),
                    pubkey: pubkey.to_string(),
                    relay_hint: relay_hint(tag_field(tag, 2)),
                });
            }
            Some("t") => {
                let Some(hashtag) = tag_field(tag, 1) else {
                    continue;
                };
                references.hashtag_refs.push(HashtagReference {
                    source_event: event.id.clone(),
                    hashtag: hashtag.to_string(),
                });
            }
            _ => {}
        }
    }

    references
}

fn relay_hint(value: Option<&str>) -> Option<String> {
    value.filter(|hint| !hint.is_empty()).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event_with_tags(tags: Vec<Vec<String>>) -> Event {
        Event {
            id: "source-id".to_string(),
            pubkey: "p".repeat(64),
            created_at: 1,
            kind: 1,
            tags,
            content: String::new(),
            sig: "s".repeat(128),
        }
    }

    fn tag(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|part| part.to_string()).collect()
    }

    #[test]
    fn extracts_one_reference_per_tag_kind() {
        let event = event_with_tags(vec![
            tag(&["e", "abc123", "", "reply"]),
            tag(&["p", "def456"]),
            tag(&["t", "nostr"]),
        ]);

        let references = extract_references(&event);

        assert_eq!(
            references.event_refs,
            vec![EventReference {
                source_event: "source-id".to_string(),
                target_event: "abc123".to_string(),
                relay_hint: None,
                marker: Some(Marker::Reply),
            }]
        );
        assert_eq!(
            references.pubkey_refs,
            vec![PubkeyReference {
                source_event: "source-id".to_string(),
                pubkey: "def456".to_string(),
                relay_hint: None,
            }]
        );
        assert_eq!(
            references.hashtag_refs,
            vec![HashtagReference {
                source_event: "source-id".to_string(),
                hashtag: "nostr".to_string(),
            }]
        );
    }

    #[test]
    fn malformed_tags_are_skipped_without_stopping_the_scan() {
        let event = event_with_tags(vec![
            tag(&["e"]),
            tag(&[]),
            tag(&["p"]),
            tag(&["t", "survives"]),
            tag(&["e", "tail-ref"]),
        ]);

        let references = extract_references(&event);
        assert_eq!(references.event_refs.len(), 1);
        assert_eq!(references.event_refs[0].target_event, "tail-ref");
        assert!(references.pubkey_refs.is_empty());
        assert_eq!(references.hashtag_refs[0].hashtag, "survives");
    }

    #[test]
    fn relay_hints_are_carried_and_empty_hints_collapse() {
        let event = event_with_tags(vec![
            tag(&["e", "target", "wss://relay.example"]),
            tag(&["p", "someone", ""]),
        ]);

        let references = extract_references(&event);
        assert_eq!(
            references.event_refs[0].relay_hint.as_deref(),
            Some("wss://relay.example")
        );
        assert_eq!(references.pubkey_refs[0].relay_hint, None);
    }

    #[test]
    fn marker_parsing_never_errors() {
        assert_eq!(Marker::parse(Some("root")), Some(Marker::Root));
        assert_eq!(Marker::parse(Some("reply")), Some(Marker::Reply));
        assert_eq!(Marker::parse(Some("mention")), Some(Marker::Mention));
        assert_eq!(Marker::parse(Some("REPLY")), None);
        assert_eq!(Marker::parse(Some("something-else")), None);
        assert_eq!(Marker::parse(None), None);
    }

    #[test]
    fn unknown_tag_types_are_ignored() {
        let event = event_with_tags(vec![tag(&["d", "identifier"]), tag(&["r", "wss://x"])]);
        assert!(extract_references(&event).is_empty());
    }
}
