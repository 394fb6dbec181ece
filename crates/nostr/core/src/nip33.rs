//! Addressable event identity (formerly NIP-33, now part of NIP-01).
//!
//! Replaceable kinds keep one event per `(pubkey, kind)`. Addressable kinds
//! (30000-39999) keep one event per `(pubkey, kind, d)` where `d` is the value
//! of the first `d` tag, or the empty string when the tag is missing.
//!
//! ```
//! use nostr::{Event, replace_key};
//!
//! let event = Event {
//!     id: "0".repeat(64),
//!     pubkey: "f".repeat(64),
//!     created_at: 1,
//!     kind: 30023,
//!     tags: vec![vec!["d".to_string(), "my-article".to_string()]],
//!     content: String::new(),
//!     sig: "0".repeat(128),
//! };
//! let key = replace_key(&event).unwrap();
//! assert_eq!(key.d.as_deref(), Some("my-article"));
//! assert_eq!(key.address(), format!("30023:{}:my-article", "f".repeat(64)));
//! ```

use crate::nip01::{Event, KindClassification, classify_kind_nip01};
use std::fmt;

/// Tag name for the d-identifier
pub const D_TAG: &str = "d";

/// Identity under which at most one replaceable or addressable event survives.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReplaceKey {
    pub pubkey: String,
    pub kind: u16,
    /// `Some` for addressable kinds, `None` for plain replaceable kinds
    pub d: Option<String>,
}

impl ReplaceKey {
    /// The `d` value as stored: empty for replaceable kinds.
    pub fn d_value(&self) -> &str {
        self.d.as_deref().unwrap_or("")
    }

    /// `<kind>:<pubkey>:<d>` reference string.
    pub fn address(&self) -> String {
        create_address(self.kind, &self.pubkey, self.d_value())
    }
}

impl fmt::Display for ReplaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address())
    }
}

/// Value of the first `d` tag.
pub fn get_d_tag(event: &Event) -> Option<&str> {
    event.first_tag_value(D_TAG)
}

/// Build an address string: `<kind>:<pubkey>:<d-tag-value>`.
pub fn create_address(kind: u16, pubkey: &str, d_tag: &str) -> String {
    format!("{}:{}:{}", kind, pubkey, d_tag)
}

/// Identity key of a replaceable or addressable event; `None` for kinds that
/// are never replaced.
pub fn replace_key(event: &Event) -> Option<ReplaceKey> {
    let d = match classify_kind_nip01(event.kind) {
        KindClassification::Replaceable => None,
        KindClassification::Addressable => Some(get_d_tag(event).unwrap_or("").to_string()),
        _ => return None,
    };
    Some(ReplaceKey {
        pubkey: event.pubkey.clone(),
        kind: event.kind,
        d,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_event(kind: u16, tags: Vec<Vec<String>>) -> Event {
        Event {
            id: "0".repeat(64),
            pubkey: "a".repeat(64),
            created_at: 1_700_000_000,
            kind,
            tags,
            content: String::new(),
            sig: "0".repeat(128),
        }
    }

    #[test]
    fn test_replace_key_replaceable_ignores_d_tag() {
        let event = create_test_event(0, vec![vec!["d".to_string(), "x".to_string()]]);
        let key = replace_key(&event).unwrap();
        assert_eq!(key.kind, 0);
        assert_eq!(key.d, None);
        assert_eq!(key.d_value(), "");
    }

    #[test]
    fn test_replace_key_addressable_uses_first_d_tag() {
        let event = create_test_event(
            30001,
            vec![
                vec!["d".to_string(), "one".to_string()],
                vec!["d".to_string(), "two".to_string()],
            ],
        );
        assert_eq!(replace_key(&event).unwrap().d.as_deref(), Some("one"));
    }

    #[test]
    fn test_replace_key_addressable_missing_d_tag_is_empty() {
        let event = create_test_event(30001, vec![]);
        assert_eq!(replace_key(&event).unwrap().d.as_deref(), Some(""));
    }

    #[test]
    fn test_replace_key_none_for_other_kinds() {
        assert!(replace_key(&create_test_event(1, vec![])).is_none());
        assert!(replace_key(&create_test_event(20000, vec![])).is_none());
        assert!(replace_key(&create_test_event(45000, vec![])).is_none());
    }

    #[test]
    fn test_distinct_d_tags_are_distinct_keys() {
        let a = create_test_event(30023, vec![vec!["d".to_string(), "a".to_string()]]);
        let b = create_test_event(30023, vec![vec!["d".to_string(), "b".to_string()]]);
        assert_ne!(replace_key(&a), replace_key(&b));
    }

    #[test]
    fn test_display_is_address() {
        let key = ReplaceKey {
            pubkey: "p".to_string(),
            kind: 10002,
            d: None,
        };
        assert_eq!(key.to_string(), "10002:p:");
    }
}
