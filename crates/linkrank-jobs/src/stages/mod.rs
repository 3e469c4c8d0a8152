//! Pipeline stages.
//!
//! [`Pipeline`] owns the injected stores and embedding backend and exposes
//! one idempotent operation per stage. Each stage module also provides the
//! [`StageHandler`] the durable worker dispatches to; the inline runner calls
//! the same operations through [`Pipeline::run_stage`].

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as JsonValue;
use tracing::warn;

use linkrank_core::{defaults, EmbeddingBackend, Error, PipelineArgs, PipelineStage, Result};
use linkrank_db::Stores;
use linkrank_graph::{AuthorityConfig, CandidateConfig};

use crate::handler::StageHandler;
use crate::retry::RetryPolicy;

pub mod authority;
pub mod cluster;
pub mod embed;
pub mod ingest;
pub mod recommend;

pub use authority::{AuthorityHandler, AuthoritySummary};
pub use cluster::{ClusterHandler, ClusterSummary};
pub use embed::{EmbedHandler, EmbedSummary};
pub use ingest::{IngestHandler, PurgeSummary};
pub use recommend::{RecommendHandler, RecommendSummary};

/// An analytics store that is not configured turns a stage into a no-op
/// with an empty summary, matching the inline read path.
pub(crate) fn skip_if_unavailable<T: Default>(
    site_id: &str,
    stage: PipelineStage,
    outcome: Result<T>,
) -> Result<T> {
    match outcome {
        Err(Error::StoreUnavailable(msg)) => {
            warn!(
                site_id,
                stage = stage.as_str(),
                %msg,
                "Analytics store not configured, stage skipped"
            );
            Ok(T::default())
        }
        other => other,
    }
}

/// Tunables for the pipeline stages.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub ingest_batch_size: usize,
    pub ingest_concurrency: usize,
    pub embed_batch_size: usize,
    pub embed_concurrency: usize,
    /// Page text is cut to this many characters before embedding.
    pub embed_max_chars: usize,
    pub cluster_count: usize,
    pub cluster_seed: u64,
    pub authority: AuthorityConfig,
    pub candidates: CandidateConfig,
    /// Bound on the synchronous suggestion cache write.
    pub suggestion_write_timeout: Duration,
    pub stage_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ingest_batch_size: defaults::INGEST_BATCH_SIZE,
            ingest_concurrency: defaults::INGEST_CONCURRENCY,
            embed_batch_size: defaults::EMBED_BATCH_SIZE,
            embed_concurrency: defaults::EMBED_CONCURRENCY,
            embed_max_chars: defaults::EMBED_TEXT_MAX_CHARS,
            cluster_count: defaults::CLUSTER_COUNT,
            cluster_seed: defaults::KMEANS_SEED,
            authority: AuthorityConfig::default(),
            candidates: CandidateConfig::default(),
            suggestion_write_timeout: Duration::from_secs(defaults::SUGGESTION_WRITE_TIMEOUT_SECS),
            stage_timeout: Duration::from_secs(defaults::STAGE_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl PipelineConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `CLUSTER_COUNT` | `5` | k for k-means |
    /// | `EMBED_BATCH_SIZE` | `16` | Texts per embedding request |
    /// | `EMBED_CONCURRENCY` | `4` | Embedding requests in flight |
    /// | `STAGE_TIMEOUT_SECS` | `300` | Per-stage timeout |
    /// | `SUGGESTION_WRITE_TIMEOUT_SECS` | `10` | Suggestion cache write bound |
    ///
    /// Retry settings come from [`RetryPolicy::from_env`].
    pub fn from_env() -> Self {
        let base = Self::default();
        Self {
            cluster_count: env_parse("CLUSTER_COUNT", base.cluster_count).max(1),
            embed_batch_size: env_parse("EMBED_BATCH_SIZE", base.embed_batch_size).max(1),
            embed_concurrency: env_parse("EMBED_CONCURRENCY", base.embed_concurrency).max(1),
            stage_timeout: Duration::from_secs(
                env_parse("STAGE_TIMEOUT_SECS", defaults::STAGE_TIMEOUT_SECS).max(1),
            ),
            suggestion_write_timeout: Duration::from_secs(
                env_parse(
                    "SUGGESTION_WRITE_TIMEOUT_SECS",
                    defaults::SUGGESTION_WRITE_TIMEOUT_SECS,
                )
                .max(1),
            ),
            retry: RetryPolicy::from_env(),
            ..base
        }
    }

    pub fn with_cluster_count(mut self, k: usize) -> Self {
        self.cluster_count = k.max(1);
        self
    }

    pub fn with_embed_batching(mut self, batch_size: usize, concurrency: usize) -> Self {
        self.embed_batch_size = batch_size.max(1);
        self.embed_concurrency = concurrency.max(1);
        self
    }

    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_suggestion_write_timeout(mut self, timeout: Duration) -> Self {
        self.suggestion_write_timeout = timeout;
        self
    }
}

/// The link recommendation pipeline over injected stores.
pub struct Pipeline {
    stores: Stores,
    embedder: Arc<dyn EmbeddingBackend>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(stores: Stores, embedder: Arc<dyn EmbeddingBackend>, config: PipelineConfig) -> Self {
        Self {
            stores,
            embedder,
            config,
        }
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one stage and return its summary.
    pub async fn run_stage(&self, stage: PipelineStage, args: &PipelineArgs) -> Result<JsonValue> {
        let site_id = args.site_id.as_str();
        let summary = match stage {
            PipelineStage::Ingest => serde_json::to_value(self.ingest(site_id, &args.pages).await?)?,
            PipelineStage::Embed => serde_json::to_value(self.embed(site_id).await?)?,
            PipelineStage::Cluster => serde_json::to_value(self.cluster(site_id).await?)?,
            PipelineStage::Authority => serde_json::to_value(self.authority(site_id).await?)?,
            PipelineStage::Recommend => serde_json::to_value(self.recommend(site_id).await?)?,
        };
        Ok(summary)
    }

    /// One handler per stage, ready to register with a worker.
    pub fn handlers(self: &Arc<Self>) -> Vec<Arc<dyn StageHandler>> {
        vec![
            Arc::new(IngestHandler::new(self.clone())),
            Arc::new(EmbedHandler::new(self.clone())),
            Arc::new(ClusterHandler::new(self.clone())),
            Arc::new(AuthorityHandler::new(self.clone())),
            Arc::new(RecommendHandler::new(self.clone())),
        ]
    }
}
