//! Connection pools for the graph and analytics databases.

use std::time::{Duration, Instant};

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use linkrank_core::{Error, Result};

/// Pool sizing and timeouts, shared by both databases.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    pub max_connections: u32,
    /// Bound on acquiring a connection; an exhausted pool surfaces as a
    /// transient `PoolTimedOut`.
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
        }
    }
}

impl PoolConfig {
    /// `DB_MAX_CONNECTIONS`, `DB_ACQUIRE_TIMEOUT_SECS` and
    /// `DB_IDLE_TIMEOUT_SECS` over the defaults. Unparseable values are
    /// ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(n) = lookup("DB_MAX_CONNECTIONS").and_then(|v| v.parse().ok()) {
            config.max_connections = n;
        }
        if let Some(secs) = lookup("DB_ACQUIRE_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            config.acquire_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = lookup("DB_IDLE_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            config.idle_timeout = Duration::from_secs(secs);
        }
        config
    }
}

/// Connect a pool for one of the stores (`graph` or `analytics`).
pub async fn connect_pool(database_url: &str, config: &PoolConfig, store: &str) -> Result<PgPool> {
    let start = Instant::now();
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .connect(database_url)
        .await
        .map_err(Error::Database)?;

    info!(
        subsystem = "database",
        component = "pool",
        store,
        max_connections = config.max_connections,
        pool_size = pool.size(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Database connection pool established"
    );
    Ok(pool)
}
