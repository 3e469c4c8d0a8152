//! # linkrank-db
//!
//! PostgreSQL stores for linkrank.
//!
//! This crate provides:
//! - Connection pool management
//! - The page graph store (pages, links, cluster ids, authority)
//! - The analytics stores (pgvector embeddings, suggestion cache)
//! - Durable workflow run and stage job persistence
//! - An in-memory implementation of every store for tests and single-process use
//!
//! ## Example
//!
//! ```rust,ignore
//! use linkrank_db::{AnalyticsDatabase, Database, PoolConfig, Stores};
//!
//! let db = Database::connect_with_config("postgres://localhost/linkrank", PoolConfig::from_env()).await?;
//! db.migrate().await?;
//! let analytics = AnalyticsDatabase::new(db.pool.clone());
//! let stores = Stores::postgres(&db, Some(&analytics));
//! ```

use std::sync::Arc;

use linkrank_core::{EmbeddingStore, PageGraphStore, Result, RunRepository, SuggestionStore};

pub mod embeddings;
pub mod memory;
pub mod pages;
pub mod pool;
pub mod runs;
pub mod suggestions;

pub use embeddings::PgEmbeddingStore;
pub use memory::{MemoryStore, UnavailableStore};
pub use pages::PgPageGraphStore;
pub use pool::{connect_pool, PoolConfig};
pub use runs::PgRunRepository;
pub use suggestions::PgSuggestionStore;

// Re-export core types
pub use linkrank_core::*;

/// Graph store database: pages, links, authority and workflow state.
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Page graph store.
    pub pages: PgPageGraphStore,
    /// Workflow run repository.
    pub runs: PgRunRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            pages: PgPageGraphStore::new(pool.clone()),
            runs: PgRunRepository::new(pool.clone()),
            pool,
        }
    }

    /// Connect to the graph store database.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = connect_pool(url, &config, "graph").await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        migrate_pool(&self.pool).await
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self::new(self.pool.clone())
    }
}

/// Analytics database: embeddings and the suggestion cache.
///
/// May share the graph store's pool or point at a separate server.
pub struct AnalyticsDatabase {
    pub pool: sqlx::Pool<sqlx::Postgres>,
    pub embeddings: PgEmbeddingStore,
    pub suggestions: PgSuggestionStore,
}

impl AnalyticsDatabase {
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            embeddings: PgEmbeddingStore::new(pool.clone()),
            suggestions: PgSuggestionStore::new(pool.clone()),
            pool,
        }
    }

    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = connect_pool(url, &config, "analytics").await?;
        Ok(Self::new(pool))
    }

    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        migrate_pool(&self.pool).await
    }
}

impl Clone for AnalyticsDatabase {
    fn clone(&self) -> Self {
        Self::new(self.pool.clone())
    }
}

#[cfg(feature = "migrations")]
async fn migrate_pool(pool: &sqlx::Pool<sqlx::Postgres>) -> Result<()> {
    sqlx::migrate!("../../migrations")
        .run(pool)
        .await
        .map_err(|e| linkrank_core::Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
    Ok(())
}

/// Explicitly constructed store handles shared by the worker, the service
/// and the HTTP layer.
#[derive(Clone)]
pub struct Stores {
    pub graph: Arc<dyn PageGraphStore>,
    pub embeddings: Arc<dyn EmbeddingStore>,
    pub suggestions: Arc<dyn SuggestionStore>,
    pub runs: Arc<dyn RunRepository>,
}

impl Stores {
    /// PostgreSQL-backed stores. Without an analytics database the embedding
    /// and suggestion stores report `StoreUnavailable`.
    pub fn postgres(db: &Database, analytics: Option<&AnalyticsDatabase>) -> Self {
        let (embeddings, suggestions): (Arc<dyn EmbeddingStore>, Arc<dyn SuggestionStore>) =
            match analytics {
                Some(a) => (
                    Arc::new(a.embeddings.clone()),
                    Arc::new(a.suggestions.clone()),
                ),
                None => (Arc::new(UnavailableStore), Arc::new(UnavailableStore)),
            };
        Self {
            graph: Arc::new(db.pages.clone()),
            embeddings,
            suggestions,
            runs: Arc::new(db.runs.clone()),
        }
    }

    /// All stores backed by one shared in-memory instance.
    pub fn memory() -> Self {
        Self::from_memory(Arc::new(MemoryStore::new()))
    }

    pub fn from_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            graph: store.clone(),
            embeddings: store.clone(),
            suggestions: store.clone(),
            runs: store,
        }
    }

    /// Swap the analytics stores for ones that report `StoreUnavailable`.
    pub fn without_analytics(mut self) -> Self {
        self.embeddings = Arc::new(UnavailableStore);
        self.suggestions = Arc::new(UnavailableStore);
        self
    }
}
