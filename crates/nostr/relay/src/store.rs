//! Storage port consumed by the dispatcher
//!
//! Implementations own filter matching, indexing and the replace-if-newer
//! rule. Every method receives a [`Context`] and must stop promptly once it is
//! done, returning [`StorageError::DeadlineExceeded`](crate::StorageError) or
//! [`StorageError::Cancelled`](crate::StorageError).

use crate::context::Context;
use crate::error::Result;
use crate::filter::Filter;
use async_trait::async_trait;
use nostr::Event;

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append a regular event. `Ok(false)` when the id is already stored.
    async fn save(&self, ctx: &Context, event: &Event) -> Result<bool>;

    /// Store a replaceable or addressable event, superseding older events with
    /// the same identity key. Atomic per key. `Ok(false)` when a stored event
    /// with the same key has `created_at` greater than or equal to the new one.
    async fn replace(&self, ctx: &Context, event: &Event) -> Result<bool>;

    /// Events matching any of `filters`, materialized in full.
    async fn query(&self, ctx: &Context, filters: &[Filter]) -> Result<Vec<Event>>;

    /// Number of stored events matching any of `filters`.
    async fn count(&self, ctx: &Context, filters: &[Filter]) -> Result<i64>;
}
