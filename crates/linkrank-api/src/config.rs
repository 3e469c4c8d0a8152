//! Server configuration from environment variables.

use std::net::SocketAddr;
use std::str::FromStr;

use linkrank_core::defaults;

/// Which store implementation backs the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    /// In-process stores; state is lost on restart.
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(format!("unknown store backend: {other}")),
        }
    }
}

/// Where the embedding and suggestion stores live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalyticsTarget {
    /// Share the graph store's pool.
    Shared,
    /// Separate database URL.
    Url(String),
    /// Not configured; reads degrade to empty results.
    Disabled,
}

impl AnalyticsTarget {
    /// Parse `ANALYTICS_DATABASE_URL` relative to the graph store URL.
    pub fn parse(raw: Option<&str>, database_url: &str) -> Self {
        match raw.map(str::trim) {
            None | Some("") => AnalyticsTarget::Shared,
            Some(v) if v.eq_ignore_ascii_case("disabled") || v.eq_ignore_ascii_case("none") => {
                AnalyticsTarget::Disabled
            }
            Some(v) if v == database_url => AnalyticsTarget::Shared,
            Some(v) => AnalyticsTarget::Url(v.to_string()),
        }
    }
}

/// HTTP server and store wiring configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub analytics: AnalyticsTarget,
    pub store_backend: StoreBackend,
    /// `false` selects the inline orchestrator.
    pub workflow_enabled: bool,
    pub task_queue: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            database_url: "postgres://localhost/linkrank".to_string(),
            analytics: AnalyticsTarget::Shared,
            store_backend: StoreBackend::Postgres,
            workflow_enabled: true,
            task_queue: defaults::TASK_QUEUE.to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `HOST` | `0.0.0.0` |
    /// | `PORT` | `3000` |
    /// | `DATABASE_URL` | `postgres://localhost/linkrank` |
    /// | `ANALYTICS_DATABASE_URL` | same as `DATABASE_URL`; `disabled` turns it off |
    /// | `STORE_BACKEND` | `postgres` (`memory` for in-process stores) |
    /// | `WORKFLOW_ENABLED` | `true` |
    /// | `WORKFLOW_TASK_QUEUE` | `seo-tasks-queue` |
    pub fn from_env() -> anyhow::Result<Self> {
        let base = Self::default();

        let database_url = std::env::var("DATABASE_URL").unwrap_or(base.database_url);
        let analytics = AnalyticsTarget::parse(
            std::env::var("ANALYTICS_DATABASE_URL").ok().as_deref(),
            &database_url,
        );
        let store_backend = match std::env::var("STORE_BACKEND") {
            Ok(v) => v.parse::<StoreBackend>().map_err(anyhow::Error::msg)?,
            Err(_) => base.store_backend,
        };
        let port = match std::env::var("PORT") {
            Ok(v) => v
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid PORT {v:?}: {e}"))?,
            Err(_) => base.port,
        };

        Ok(Self {
            host: std::env::var("HOST").unwrap_or(base.host),
            port,
            database_url,
            analytics,
            store_backend,
            workflow_enabled: env_flag("WORKFLOW_ENABLED", base.workflow_enabled),
            task_queue: std::env::var("WORKFLOW_TASK_QUEUE").unwrap_or(base.task_queue),
        })
    }

    pub fn with_store_backend(mut self, backend: StoreBackend) -> Self {
        self.store_backend = backend;
        self
    }

    pub fn with_workflow_enabled(mut self, enabled: bool) -> Self {
        self.workflow_enabled = enabled;
        self
    }

    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

/// Boolean environment flag; anything other than `false`/`0` counts as set.
pub fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| parse_flag(&v))
        .unwrap_or(default)
}

fn parse_flag(value: &str) -> bool {
    !matches!(value.trim().to_ascii_lowercase().as_str(), "false" | "0" | "no" | "off")
}
