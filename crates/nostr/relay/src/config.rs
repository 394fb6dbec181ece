//! Relay configuration
//!
//! Loaded from TOML, then overridden by `NOSTR_RELAY_*` environment variables:
//!
//! ```toml
//! [database]
//! path = "relay.sqlite"
//!
//! [dispatch]
//! save_timeout_ms = 2000
//! query_timeout_ms = 2000
//! count_timeout_ms = 1000
//! ```

use crate::db::DatabaseConfig;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Per-operation storage deadlines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Budget for `save`/`replace`, measured from a fresh context
    pub save_timeout_ms: u64,
    /// Budget for `query`, capped by the caller's own deadline
    pub query_timeout_ms: u64,
    /// Budget for `count`, measured from a fresh context
    pub count_timeout_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            save_timeout_ms: 2000,
            query_timeout_ms: 2000,
            count_timeout_ms: 1000,
        }
    }
}

impl DispatchConfig {
    pub fn save_timeout(&self) -> Duration {
        Duration::from_millis(self.save_timeout_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn count_timeout(&self) -> Duration {
        Duration::from_millis(self.count_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub database: DatabaseConfig,
    pub dispatch: DispatchConfig,
}

impl RelayConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: RelayConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Apply `NOSTR_RELAY_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from `lookup`, which maps a variable name to its value.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("NOSTR_RELAY_DB_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(ms) = parse_ms(&lookup, "NOSTR_RELAY_SAVE_TIMEOUT_MS")? {
            self.dispatch.save_timeout_ms = ms;
        }
        if let Some(ms) = parse_ms(&lookup, "NOSTR_RELAY_QUERY_TIMEOUT_MS")? {
            self.dispatch.query_timeout_ms = ms;
        }
        if let Some(ms) = parse_ms(&lookup, "NOSTR_RELAY_COUNT_TIMEOUT_MS")? {
            self.dispatch.count_timeout_ms = ms;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let timeouts = [
            ("dispatch.save_timeout_ms", self.dispatch.save_timeout_ms),
            ("dispatch.query_timeout_ms", self.dispatch.query_timeout_ms),
            ("dispatch.count_timeout_ms", self.dispatch.count_timeout_ms),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    name,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        if self.database.max_reader_connections == 0 {
            return Err(ConfigError::Invalid {
                name: "database.max_reader_connections",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.database.default_limit > self.database.max_limit {
            return Err(ConfigError::Invalid {
                name: "database.default_limit",
                reason: format!("exceeds max_limit ({})", self.database.max_limit),
            });
        }
        Ok(())
    }
}

fn parse_ms<F>(lookup: &F, name: &'static str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|value| {
            value.trim().parse::<u64>().map_err(|e| ConfigError::Invalid {
                name,
                reason: format!("{:?} is not a millisecond count: {}", value, e),
            })
        })
        .transpose()
}
