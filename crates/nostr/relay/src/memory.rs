//! In-memory event store
//!
//! Keeps everything in a single `RwLock`ed index. Useful for tests, benches and
//! relays that do not need durability. Unlike [`SqliteStore`](crate::SqliteStore)
//! it performs no structural validation of events.

use crate::context::Context;
use crate::error::{Result, StorageError};
use crate::filter::{Filter, MAX_FILTER_LIMIT};
use crate::store::EventStore;
use async_trait::async_trait;
use nostr::{Event, ReplaceKey, replace_key, sort_events};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Results per filter when the filter sets no `limit`
const DEFAULT_LIMIT: usize = 500;

#[derive(Debug, Default)]
struct Index {
    events: HashMap<String, Event>,
    latest: HashMap<ReplaceKey, String>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    index: RwLock<Index>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.index.read().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: &str) -> Option<Event> {
        self.index.read().events.get(id).cloned()
    }

    fn matching(&self, filter: &Filter) -> Vec<Event> {
        let limit = filter.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_FILTER_LIMIT);
        let index = self.index.read();
        let mut events: Vec<Event> = index
            .events
            .values()
            .filter(|event| filter.matches(event))
            .cloned()
            .collect();
        sort_events(&mut events);
        events.truncate(limit);
        events
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn save(&self, ctx: &Context, event: &Event) -> Result<bool> {
        ctx.check()?;
        let mut index = self.index.write();
        if index.events.contains_key(&event.id) {
            return Ok(false);
        }
        index.events.insert(event.id.clone(), event.clone());
        Ok(true)
    }

    async fn replace(&self, ctx: &Context, event: &Event) -> Result<bool> {
        ctx.check()?;
        let key = replace_key(event).ok_or_else(|| {
            StorageError::Malformed(format!("kind {} is not replaceable", event.kind))
        })?;

        let mut index = self.index.write();
        if let Some(existing_id) = index.latest.get(&key)
            && let Some(existing) = index.events.get(existing_id)
            && existing.created_at >= event.created_at
        {
            debug!("Kept {} over older or equal {}", existing.id, event.id);
            return Ok(false);
        }

        if let Some(old_id) = index.latest.insert(key, event.id.clone()) {
            index.events.remove(&old_id);
        }
        index.events.insert(event.id.clone(), event.clone());
        Ok(true)
    }

    async fn query(&self, ctx: &Context, filters: &[Filter]) -> Result<Vec<Event>> {
        ctx.check()?;
        filters.iter().try_for_each(Filter::validate)?;
        let mut seen = HashSet::new();
        let mut events = Vec::new();
        for filter in filters {
            for event in self.matching(filter) {
                if seen.insert(event.id.clone()) {
                    events.push(event);
                }
            }
        }
        sort_events(&mut events);
        Ok(events)
    }

    async fn count(&self, ctx: &Context, filters: &[Filter]) -> Result<i64> {
        ctx.check()?;
        filters.iter().try_for_each(Filter::validate)?;
        let index = self.index.read();
        let count = index
            .events
            .values()
            .filter(|event| filters.iter().any(|filter| filter.matches(event)))
            .count();
        Ok(count as i64)
    }
}
