//! Storage dispatch for a Nostr relay
//!
//! This crate sits between a relay's protocol handler and its event storage:
//! - Kind-based routing of EVENT messages (save, replace, or broadcast only)
//! - Deadline-bound REQ queries and COUNT requests
//! - A pluggable [`EventStore`] port with SQLite and in-memory backends
//! - A cancellable [`Context`] with per-operation deadlines
//! - Lock-free dispatch metrics
//!
//! # Architecture
//!
//! ```text
//!   EVENT / REQ / COUNT (from the protocol handler)
//!                  │
//!        ┌─────────▼─────────┐
//!        │    Dispatcher     │  classify kind, attach deadline
//!        └─────────┬─────────┘
//!                  │ Context
//!        ┌─────────▼─────────┐
//!        │  dyn EventStore   │
//!        └────┬─────────┬────┘
//!             ▼         ▼
//!      ┌───────────┐ ┌─────────────┐
//!      │SqliteStore│ │ MemoryStore │
//!      └───────────┘ └─────────────┘
//! ```

mod config;
mod context;
mod db;
mod dispatch;
mod error;
mod filter;
mod memory;
mod metrics;
mod store;


pub use config::{DispatchConfig, RelayConfig};
pub use context::Context;
pub use db::{ConnectionPool, DatabaseConfig, SqliteStore};
pub use dispatch::{Client, CountResult, Dispatcher};
pub use error::{ConfigError, CountError, Result, StorageError};
pub use filter::{Filter, MAX_FILTER_LIMIT};
pub use memory::MemoryStore;
pub use metrics::{DispatchMetrics, MetricsSnapshot};
pub use store::EventStore;
