//! SQLite event store with connection pooling
//!
//! The store uses three separate connection pools:
//! - Writer pool: Single connection for writes (SQLite write lock)
//! - Reader pool: Multiple connections for queries
//! - Metadata pool: Separate connections for counts
//!
//! Statements run on the blocking thread pool. When the caller's [`Context`]
//! is done before a statement finishes, the connection is interrupted so the
//! statement aborts instead of running on in the background.

use crate::context::Context;
use crate::error::{Result, StorageError};
use crate::filter::{Filter, MAX_FILTER_LIMIT};
use crate::store::EventStore;
use async_trait::async_trait;
use nostr::{Event, replace_key, sort_events, validate_event_structure};
use parking_lot::Mutex;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Value;
use rusqlite::{Connection, InterruptHandle, TransactionBehavior, params};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Database configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file
    pub path: PathBuf,
    /// Maximum number of reader connections
    pub max_reader_connections: u32,
    /// Maximum number of metadata connections
    pub max_metadata_connections: u32,
    /// How long SQLite waits on a locked database
    pub busy_timeout_ms: u64,
    /// How long to wait for a pooled connection
    pub acquire_timeout_ms: u64,
    /// Results per filter when the filter sets no `limit`
    pub default_limit: usize,
    /// Upper bound applied to every filter's `limit`
    pub max_limit: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("store.sqlite"),
            max_reader_connections: 10,
            max_metadata_connections: 5,
            busy_timeout_ms: 5000,
            acquire_timeout_ms: 1000,
            default_limit: 500,
            max_limit: MAX_FILTER_LIMIT,
        }
    }
}

type Conn = PooledConnection<SqliteConnectionManager>;

/// Connection pool wrapper managing writer, reader, and metadata pools
#[derive(Clone)]
pub struct ConnectionPool {
    writer: Pool<SqliteConnectionManager>,
    reader: Pool<SqliteConnectionManager>,
    metadata: Pool<SqliteConnectionManager>,
}

impl ConnectionPool {
    pub fn new(config: &DatabaseConfig) -> Result<Self> {
        let busy_timeout = Duration::from_millis(config.busy_timeout_ms);
        let acquire_timeout = Duration::from_millis(config.acquire_timeout_ms);

        let build = |max_size: u32| -> Result<Pool<SqliteConnectionManager>> {
            let manager = SqliteConnectionManager::file(&config.path).with_init(move |conn| {
                conn.busy_timeout(busy_timeout)?;
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
                conn.pragma_update(None, "synchronous", "NORMAL")?;
                conn.pragma_update(None, "foreign_keys", "ON")
            });
            Ok(Pool::builder()
                .max_size(max_size)
                .connection_timeout(acquire_timeout)
                .build(manager)?)
        };

        Ok(Self {
            writer: build(1)?,
            reader: build(config.max_reader_connections)?,
            metadata: build(config.max_metadata_connections)?,
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Role {
    Writer,
    Reader,
    Metadata,
}

/// Durable [`EventStore`] backed by SQLite
#[derive(Clone)]
pub struct SqliteStore {
    pool: ConnectionPool,
    default_limit: usize,
    max_limit: usize,
}

impl SqliteStore {
    /// Open (or create) the database and initialize its schema
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        let pool = ConnectionPool::new(config)?;
        let conn = pool.writer.get()?;
        Self::init_schema(&conn)?;

        info!("Event store opened at {:?}", config.path);

        Ok(Self {
            pool,
            default_limit: config.default_limit,
            max_limit: config.max_limit,
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                pubkey TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                kind INTEGER NOT NULL,
                d_tag TEXT NOT NULL DEFAULT '',
                raw_event TEXT NOT NULL,
                first_seen INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_events_pubkey ON events(pubkey);
            CREATE INDEX IF NOT EXISTS idx_events_kind ON events(kind);
            CREATE INDEX IF NOT EXISTS idx_events_created_at ON events(created_at);
            CREATE INDEX IF NOT EXISTS idx_events_replace_key ON events(pubkey, kind, d_tag);

            CREATE TABLE IF NOT EXISTS event_tags (
                event_id TEXT NOT NULL,
                tag_name TEXT NOT NULL,
                tag_value TEXT NOT NULL,
                FOREIGN KEY (event_id) REFERENCES events(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_event_tags_event_id ON event_tags(event_id);
            CREATE INDEX IF NOT EXISTS idx_event_tags_name_value ON event_tags(tag_name, tag_value);",
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    fn pool(&self, role: Role) -> Pool<SqliteConnectionManager> {
        match role {
            Role::Writer => self.pool.writer.clone(),
            Role::Reader => self.pool.reader.clone(),
            Role::Metadata => self.pool.metadata.clone(),
        }
    }

    /// Run `op` on a pooled connection under `ctx`.
    ///
    /// If `ctx` finishes first, the connection is interrupted and the context's
    /// error is returned.
    async fn run<T, F>(&self, ctx: &Context, role: Role, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Conn) -> Result<T> + Send + 'static,
    {
        ctx.check()?;

        let pool = self.pool(role);
        let interrupt: Arc<Mutex<Option<InterruptHandle>>> = Arc::default();
        let abandoned = Arc::new(AtomicBool::new(false));

        let task = tokio::task::spawn_blocking({
            let interrupt = Arc::clone(&interrupt);
            let abandoned = Arc::clone(&abandoned);
            move || {
                let mut conn = pool.get()?;
                *interrupt.lock() = Some(conn.get_interrupt_handle());
                if abandoned.load(Ordering::SeqCst) {
                    return Err(StorageError::Cancelled);
                }
                op(&mut conn)
            }
        });

        let result = ctx.run(async { task.await? }).await;
        if let Err(ref err) = result
            && err.is_context_error()
        {
            abandoned.store(true, Ordering::SeqCst);
            if let Some(handle) = interrupt.lock().take() {
                handle.interrupt();
            }
            warn!("Storage call abandoned: {}", err);
        }
        result
    }

    fn now() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default()
    }

    fn insert_event(conn: &Connection, event: &Event, d_tag: &str) -> Result<bool> {
        let created_at = stored_timestamp(event.created_at)?;
        let raw_event = serde_json::to_string(event)?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO events (id, pubkey, created_at, kind, d_tag, raw_event, first_seen)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                &event.id,
                &event.pubkey,
                created_at,
                event.kind,
                d_tag,
                raw_event,
                Self::now(),
            ],
        )?;
        if inserted == 0 {
            return Ok(false);
        }

        let mut stmt = conn.prepare_cached(
            "INSERT INTO event_tags (event_id, tag_name, tag_value) VALUES (?1, ?2, ?3)",
        )?;
        for tag in &event.tags {
            if let [name, value, ..] = tag.as_slice() {
                stmt.execute(params![&event.id, name, value])?;
            }
        }
        Ok(true)
    }

    fn query_blocking(conn: &Connection, filter: &Filter, limit: usize) -> Result<Vec<Event>> {
        let (clause, mut values) = where_clause(filter);
        let sql = format!(
            "SELECT raw_event FROM events WHERE {} ORDER BY created_at DESC, id ASC LIMIT ?",
            clause
        );
        values.push(Value::Integer(limit as i64));

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(values), |row| {
            row.get::<_, String>(0)
        })?;

        let mut events = Vec::new();
        for row in rows {
            events.push(serde_json::from_str(&row?)?);
        }
        Ok(events)
    }
}

#[async_trait]
impl EventStore for SqliteStore {
    async fn save(&self, ctx: &Context, event: &Event) -> Result<bool> {
        validate_event_structure(event)?;
        let event = event.clone();

        self.run(ctx, Role::Writer, move |conn| {
            let tx = conn.transaction()?;
            let stored = Self::insert_event(&tx, &event, "")?;
            tx.commit()?;
            debug!("Saved event {} (new: {})", event.id, stored);
            Ok(stored)
        })
        .await
    }

    async fn replace(&self, ctx: &Context, event: &Event) -> Result<bool> {
        validate_event_structure(event)?;
        let key = replace_key(event).ok_or_else(|| {
            StorageError::Malformed(format!("kind {} is not replaceable", event.kind))
        })?;
        let created_at = stored_timestamp(event.created_at)?;
        let event = event.clone();

        self.run(ctx, Role::Writer, move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let newest: Option<i64> = tx.query_row(
                "SELECT MAX(created_at) FROM events WHERE pubkey = ?1 AND kind = ?2 AND d_tag = ?3",
                params![&key.pubkey, key.kind, key.d_value()],
                |row| row.get(0),
            )?;

            if let Some(newest) = newest
                && newest >= created_at
            {
                debug!("Replace of {} ignored: {} holds a newer event", event.id, key);
                return Ok(false);
            }

            let superseded = tx.execute(
                "DELETE FROM events WHERE pubkey = ?1 AND kind = ?2 AND d_tag = ?3",
                params![&key.pubkey, key.kind, key.d_value()],
            )?;
            let stored = Self::insert_event(&tx, &event, key.d_value())?;
            tx.commit()?;

            debug!(
                "Replaced {} with {} ({} superseded)",
                key, event.id, superseded
            );
            Ok(stored)
        })
        .await
    }

    async fn query(&self, ctx: &Context, filters: &[Filter]) -> Result<Vec<Event>> {
        filters.iter().try_for_each(Filter::validate)?;
        if filters.is_empty() {
            return Ok(Vec::new());
        }
        let filters = filters.to_vec();
        let default_limit = self.default_limit;
        let max_limit = self.max_limit;

        self.run(ctx, Role::Reader, move |conn| {
            let mut seen = HashSet::new();
            let mut events = Vec::new();
            for filter in &filters {
                let limit = filter.limit.unwrap_or(default_limit).min(max_limit);
                if limit == 0 {
                    continue;
                }
                for event in Self::query_blocking(conn, filter, limit)? {
                    if seen.insert(event.id.clone()) {
                        events.push(event);
                    }
                }
            }
            sort_events(&mut events);
            Ok(events)
        })
        .await
    }

    async fn count(&self, ctx: &Context, filters: &[Filter]) -> Result<i64> {
        filters.iter().try_for_each(Filter::validate)?;
        if filters.is_empty() {
            return Ok(0);
        }

        let mut clauses = Vec::with_capacity(filters.len());
        let mut values = Vec::new();
        for filter in filters {
            let (clause, filter_values) = where_clause(filter);
            clauses.push(format!("({})", clause));
            values.extend(filter_values);
        }
        let sql = format!("SELECT COUNT(*) FROM events WHERE {}", clauses.join(" OR "));

        self.run(ctx, Role::Metadata, move |conn| {
            let count = conn.query_row(&sql, rusqlite::params_from_iter(values), |row| {
                row.get::<_, i64>(0)
            })?;
            Ok(count)
        })
        .await
    }
}

/// `created_at` as stored in SQLite.
fn stored_timestamp(created_at: u64) -> Result<i64> {
    i64::try_from(created_at)
        .map_err(|_| StorageError::Malformed(format!("created_at {} out of range", created_at)))
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(",")
}

/// SQL condition selecting the events a filter matches. `limit` is not part of it.
fn where_clause(filter: &Filter) -> (String, Vec<Value>) {
    let mut sql = String::from("1=1");
    let mut values: Vec<Value> = Vec::new();

    if let Some(ref ids) = filter.ids {
        sql.push_str(&format!(" AND id IN ({})", placeholders(ids.len())));
        values.extend(ids.iter().cloned().map(Value::Text));
    }

    if let Some(ref authors) = filter.authors {
        sql.push_str(&format!(" AND pubkey IN ({})", placeholders(authors.len())));
        values.extend(authors.iter().cloned().map(Value::Text));
    }

    if let Some(ref kinds) = filter.kinds {
        sql.push_str(&format!(" AND kind IN ({})", placeholders(kinds.len())));
        values.extend(kinds.iter().map(|kind| Value::Integer(*kind as i64)));
    }

    // No stored timestamp exceeds i64::MAX: a larger `since` matches nothing
    // and a larger `until` bounds nothing.
    if let Some(since) = filter.since {
        match i64::try_from(since) {
            Ok(since) => {
                sql.push_str(" AND created_at >= ?");
                values.push(Value::Integer(since));
            }
            Err(_) => sql.push_str(" AND 0=1"),
        }
    }

    if let Some(until) = filter.until
        && let Ok(until) = i64::try_from(until)
    {
        sql.push_str(" AND created_at <= ?");
        values.push(Value::Integer(until));
    }

    for (name, tag_values) in filter.tag_conditions() {
        sql.push_str(&format!(
            " AND id IN (SELECT event_id FROM event_tags WHERE tag_name = ? AND tag_value IN ({}))",
            placeholders(tag_values.len())
        ));
        values.push(Value::Text(name.to_string()));
        values.extend(tag_values.iter().cloned().map(Value::Text));
    }

    (sql, values)
}
