//! Storage-dispatch layer
//!
//! Routes each incoming message to the right [`EventStore`] operation:
//!
//! - `EVENT`: classify the kind, then `save` (regular), `replace`
//!   (replaceable/addressable) or nothing (broadcast only). Runs under a fresh
//!   deadline detached from the client's context so a disconnect cannot abort
//!   a write halfway.
//! - `REQ`: `query` under a deadline derived from the caller's context.
//! - `COUNT`: `count` under a fresh deadline; failures carry the
//!   [`CountResult::FAILED`] sentinel.
//!
//! Each store call is raced against its deadline, so a store that ignores its
//! [`Context`] still cannot hold a request past the budget. The dispatcher
//! holds no per-request state and can be shared across tasks.

use crate::config::DispatchConfig;
use crate::context::Context;
use crate::error::{CountError, Result};
use crate::filter::Filter;
use crate::metrics::DispatchMetrics;
use crate::store::EventStore;
use nostr::{Event, KindClass, classify_kind};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, warn};

/// The connection a message arrived on.
///
/// Only used for log fields; the dispatcher never inspects it otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    pub id: String,
    pub addr: Option<SocketAddr>,
}

impl Client {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            addr: None,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = Some(addr);
        self
    }
}

/// Answer to a COUNT request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountResult {
    pub count: i64,
    pub approximate: bool,
}

impl CountResult {
    /// Reported alongside every count failure
    pub const FAILED: CountResult = CountResult {
        count: -1,
        approximate: false,
    };

    pub fn exact(count: i64) -> Self {
        Self {
            count,
            approximate: false,
        }
    }
}

pub struct Dispatcher {
    store: Arc<dyn EventStore>,
    config: DispatchConfig,
    metrics: Arc<DispatchMetrics>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn EventStore>, config: DispatchConfig) -> Self {
        Self {
            store,
            config,
            metrics: Arc::new(DispatchMetrics::new()),
        }
    }

    pub fn metrics(&self) -> Arc<DispatchMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Persist an EVENT according to its kind class.
    ///
    /// Broadcast-only kinds return `Ok(())` without touching the store. Store
    /// errors are returned unchanged.
    #[tracing::instrument(skip_all, fields(client = %client.id, addr = ?client.addr, id = %event.id, kind = event.kind))]
    pub async fn on_event(&self, client: &Client, event: &Event) -> Result<()> {
        self.metrics.event_received();

        let class = classify_kind(event.kind);
        if class == KindClass::BroadcastOnly {
            debug!("Not storing broadcast-only event");
            self.metrics.event_broadcast_only();
            return Ok(());
        }

        let ctx = Context::background().with_timeout(self.config.save_timeout());
        let _guard = ctx.drop_guard();

        let result = match class {
            KindClass::Regular => ctx.run(self.store.save(&ctx, event)).await,
            KindClass::ReplaceableOrAddressable => ctx.run(self.store.replace(&ctx, event)).await,
            KindClass::BroadcastOnly => return Ok(()),
        };

        match result {
            Ok(stored) => {
                match (class, stored) {
                    (_, false) => self.metrics.event_unchanged(),
                    (KindClass::Regular, true) => self.metrics.event_saved(),
                    (_, true) => self.metrics.event_replaced(),
                }
                debug!(?class, stored, "Event dispatched");
                Ok(())
            }
            Err(e) => {
                warn!(?class, "Failed to store event: {}", e);
                self.metrics.event_failed(&e);
                Err(e)
            }
        }
    }

    /// Run a REQ against the store.
    ///
    /// The query deadline never outlives `ctx`; an already-done `ctx` fails
    /// without calling the store.
    #[tracing::instrument(skip_all, fields(client = %client.id, addr = ?client.addr, filters = filters.len()))]
    pub async fn on_req(
        &self,
        ctx: &Context,
        client: &Client,
        filters: &[Filter],
    ) -> Result<Vec<Event>> {
        self.metrics.query();

        if let Err(e) = ctx.check() {
            debug!("Caller context already done: {}", e);
            self.metrics.query_failed(&e);
            return Err(e);
        }

        let query_ctx = ctx.with_timeout(self.config.query_timeout());
        let _guard = query_ctx.drop_guard();

        match query_ctx.run(self.store.query(&query_ctx, filters)).await {
            Ok(events) => {
                debug!(results = events.len(), "Query complete");
                Ok(events)
            }
            Err(e) => {
                warn!("Query failed: {}", e);
                self.metrics.query_failed(&e);
                Err(e)
            }
        }
    }

    /// Count events matching any of `filters`.
    ///
    /// Counts are always exact. On failure the error carries
    /// [`CountResult::FAILED`].
    #[tracing::instrument(skip_all, fields(client = %client.id, addr = ?client.addr, filters = filters.len()))]
    pub async fn on_count(
        &self,
        client: &Client,
        filters: &[Filter],
    ) -> std::result::Result<CountResult, CountError> {
        self.metrics.count();

        let ctx = Context::background().with_timeout(self.config.count_timeout());
        let _guard = ctx.drop_guard();

        match ctx.run(self.store.count(&ctx, filters)).await {
            Ok(count) => {
                debug!(count, "Count complete");
                Ok(CountResult::exact(count))
            }
            Err(e) => {
                warn!("Count failed: {}", e);
                self.metrics.count_failed(&e);
                Err(CountError::new(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        Save,
        Replace,
        Query,
        Count,
    }

    /// Records calls and the deadline each call received.
    #[derive(Default)]
    struct RecordingStore {
        calls: Mutex<Vec<(Call, Option<Duration>)>>,
        fail_with: Mutex<Option<fn() -> StorageError>>,
    }

    impl RecordingStore {
        fn failing(make: fn() -> StorageError) -> Self {
            let store = Self::default();
            *store.fail_with.lock() = Some(make);
            store
        }

        fn record(&self, call: Call, ctx: &Context) -> Result<()> {
            self.calls.lock().push((call, ctx.remaining()));
            match *self.fail_with.lock() {
                Some(make) => Err(make()),
                None => Ok(()),
            }
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().iter().map(|(call, _)| *call).collect()
        }

        fn budgets(&self) -> Vec<Option<Duration>> {
            self.calls.lock().iter().map(|(_, budget)| *budget).collect()
        }
    }

    #[async_trait]
    impl EventStore for RecordingStore {
        async fn save(&self, ctx: &Context, _event: &Event) -> Result<bool> {
            self.record(Call::Save, ctx).map(|_| true)
        }

        async fn replace(&self, ctx: &Context, _event: &Event) -> Result<bool> {
            self.record(Call::Replace, ctx).map(|_| true)
        }

        async fn query(&self, ctx: &Context, _filters: &[Filter]) -> Result<Vec<Event>> {
            self.record(Call::Query, ctx).map(|_| Vec::new())
        }

        async fn count(&self, ctx: &Context, _filters: &[Filter]) -> Result<i64> {
            self.record(Call::Count, ctx).map(|_| 3)
        }
    }

    fn event(kind: u16) -> Event {
        Event {
            id: "abc".to_string(),
            pubkey: "pk".to_string(),
            created_at: 1,
            kind,
            tags: vec![],
            content: String::new(),
            sig: String::new(),
        }
    }

    fn dispatcher(store: Arc<RecordingStore>) -> Dispatcher {
        Dispatcher::new(store, DispatchConfig::default())
    }

    #[tokio::test]
    async fn test_regular_kind_saves() {
        let store = Arc::new(RecordingStore::default());
        let d = dispatcher(store.clone());
        for kind in [1, 2, 4, 44, 1000, 9999] {
            d.on_event(&Client::new("c"), &event(kind)).await.unwrap();
        }
        assert_eq!(store.calls(), vec![Call::Save; 6]);
    }

    #[tokio::test]
    async fn test_replaceable_kind_replaces() {
        let store = Arc::new(RecordingStore::default());
        let d = dispatcher(store.clone());
        for kind in [0, 3, 10000, 19999, 30000, 39999] {
            d.on_event(&Client::new("c"), &event(kind)).await.unwrap();
        }
        assert_eq!(store.calls(), vec![Call::Replace; 6]);
    }

    #[tokio::test]
    async fn test_broadcast_only_skips_store() {
        let store = Arc::new(RecordingStore::default());
        let d = dispatcher(store.clone());
        for kind in [45, 999, 20000, 29999, 40000, u16::MAX] {
            d.on_event(&Client::new("c"), &event(kind)).await.unwrap();
        }
        assert!(store.calls().is_empty());
        assert_eq!(d.metrics().snapshot().events_broadcast_only, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_operation_gets_its_budget() {
        let store = Arc::new(RecordingStore::default());
        let d = dispatcher(store.clone());
        let client = Client::new("c");

        d.on_event(&client, &event(1)).await.unwrap();
        d.on_req(&Context::background(), &client, &[Filter::new()])
            .await
            .unwrap();
        d.on_count(&client, &[Filter::new()]).await.unwrap();

        assert_eq!(
            store.budgets(),
            vec![
                Some(Duration::from_secs(2)),
                Some(Duration::from_secs(2)),
                Some(Duration::from_secs(1)),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_budget_respects_tighter_caller_deadline() {
        let store = Arc::new(RecordingStore::default());
        let d = dispatcher(store.clone());
        let ctx = Context::background().with_timeout(Duration::from_millis(300));

        d.on_req(&ctx, &Client::new("c"), &[]).await.unwrap();
        assert_eq!(store.budgets(), vec![Some(Duration::from_millis(300))]);
    }

    #[tokio::test]
    async fn test_done_caller_context_skips_query() {
        let store = Arc::new(RecordingStore::default());
        let d = dispatcher(store.clone());
        let ctx = Context::background();
        ctx.cancel();

        let result = d.on_req(&ctx, &Client::new("c"), &[Filter::new()]).await;
        assert!(matches!(result, Err(StorageError::Cancelled)));
        assert!(store.calls().is_empty());
        assert_eq!(d.metrics().snapshot().cancelled, 1);
    }

    #[tokio::test]
    async fn test_store_errors_pass_through() {
        let store = Arc::new(RecordingStore::failing(|| {
            StorageError::Unavailable("disk full".into())
        }));
        let d = dispatcher(store.clone());

        let result = d.on_event(&Client::new("c"), &event(1)).await;
        assert!(matches!(result, Err(StorageError::Unavailable(msg)) if msg == "disk full"));

        let result = d.on_req(&Context::background(), &Client::new("c"), &[]).await;
        assert!(matches!(result, Err(StorageError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_count_success_and_sentinel() {
        let store = Arc::new(RecordingStore::default());
        let d = dispatcher(store);
        assert_eq!(
            d.on_count(&Client::new("c"), &[]).await.unwrap(),
            CountResult {
                count: 3,
                approximate: false
            }
        );

        let store = Arc::new(RecordingStore::failing(|| StorageError::DeadlineExceeded));
        let d = dispatcher(store);
        let err = d.on_count(&Client::new("c"), &[]).await.unwrap_err();
        assert_eq!(err.result, CountResult::FAILED);
        assert!(matches!(err.source, StorageError::DeadlineExceeded));

        let snapshot = d.metrics().snapshot();
        assert_eq!(snapshot.count_failures, 1);
        assert_eq!(snapshot.deadline_exceeded, 1);
    }

    #[tokio::test]
    async fn test_unchanged_writes_counted_apart() {
        let d = Dispatcher::new(
            Arc::new(crate::memory::MemoryStore::new()),
            DispatchConfig::default(),
        );
        let client = Client::new("c").with_addr("127.0.0.1:4848".parse().unwrap());
        let versioned = |id: &str, created_at| Event {
            id: id.to_string(),
            created_at,
            ..event(0)
        };

        d.on_event(&client, &versioned("old", 10)).await.unwrap();
        d.on_event(&client, &versioned("new", 20)).await.unwrap();
        d.on_event(&client, &versioned("old", 10)).await.unwrap();
        d.on_event(&client, &event(1)).await.unwrap();
        d.on_event(&client, &event(1)).await.unwrap();

        let snapshot = d.metrics().snapshot();
        assert_eq!(snapshot.events_replaced, 2);
        assert_eq!(snapshot.events_saved, 1);
        assert_eq!(snapshot.events_unchanged, 2);
    }

    #[test]
    fn test_count_result_wire_shape() {
        let json = serde_json::to_value(CountResult::exact(12)).unwrap();
        assert_eq!(json, serde_json::json!({"count": 12, "approximate": false}));
    }
}
