//! Nostr REQ/COUNT filters
//!
//! The dispatcher forwards filters to the store untouched. Stores use
//! [`Filter::matches`] (or an equivalent query) to select events.
//! Filters support: ids, authors, kinds, `#<tag>` values, since, until, and limit.
//! Values match exactly; an empty list matches nothing.

use crate::error::{Result, StorageError};
use nostr::Event;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Largest `limit` a filter may ask for
pub const MAX_FILTER_LIMIT: usize = 5000;

/// Nostr subscription filter
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Filter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u16>>,

    /// Generic tag filters keyed as `#e`, `#p`, `#d`, ...
    #[serde(flatten)]
    pub tags: BTreeMap<String, Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authors = Some(authors.into_iter().map(Into::into).collect());
        self
    }

    pub fn kinds(mut self, kinds: impl IntoIterator<Item = u16>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    /// Require a tag named `name` (without the `#`) with one of `values`.
    pub fn tag<I, S>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.insert(
            format!("#{}", name),
            values.into_iter().map(Into::into).collect(),
        );
        self
    }

    pub fn since(mut self, since: u64) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: u64) -> Self {
        self.until = Some(until);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Tag conditions with the leading `#` stripped; other flattened keys are ignored.
    pub fn tag_conditions(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.tags
            .iter()
            .filter_map(|(key, values)| Some((key.strip_prefix('#')?, values.as_slice())))
    }

    /// Check if an event matches this filter
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ref ids) = self.ids
            && !ids.contains(&event.id)
        {
            return false;
        }

        if let Some(ref authors) = self.authors
            && !authors.contains(&event.pubkey)
        {
            return false;
        }

        if let Some(ref kinds) = self.kinds
            && !kinds.contains(&event.kind)
        {
            return false;
        }

        if let Some(since) = self.since
            && event.created_at < since
        {
            return false;
        }

        if let Some(until) = self.until
            && event.created_at > until
        {
            return false;
        }

        self.tag_conditions().all(|(name, values)| {
            event.tags.iter().any(|tag| {
                tag.len() >= 2 && tag[0] == name && values.iter().any(|value| *value == tag[1])
            })
        })
    }

    /// Check if this filter is valid
    pub fn validate(&self) -> Result<()> {
        if let Some(limit) = self.limit
            && limit > MAX_FILTER_LIMIT
        {
            return Err(StorageError::Malformed(format!(
                "limit too large (max {})",
                MAX_FILTER_LIMIT
            )));
        }
        Ok(())
    }
}
