//! Core traits for linkrank abstractions.
//!
//! Store and backend traits are the seams between the pure algorithms, the
//! PostgreSQL/in-memory implementations, and the pipeline worker, so each
//! side can be swapped or doubled in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// PAGE GRAPH STORE
// =============================================================================

/// Durable store of pages, internal links, clusters and authority per site.
#[async_trait]
pub trait PageGraphStore: Send + Sync {
    /// Insert or update pages. Pending placeholders never overwrite an
    /// existing page. Returns the number of rows written.
    async fn upsert_pages(&self, site_id: &str, pages: &[PageRecord]) -> Result<u64>;

    /// Insert edges or overwrite the weight of existing ones.
    async fn upsert_edges(&self, site_id: &str, edges: &[LinkEdge]) -> Result<u64>;

    /// All pages of a site, ordered by page id.
    async fn list_pages(&self, site_id: &str) -> Result<Vec<Page>>;

    /// Crawled pages that have text content to embed.
    async fn pages_for_embedding(&self, site_id: &str) -> Result<Vec<PageText>>;

    /// Every edge of the site.
    async fn get_all_edges(&self, site_id: &str) -> Result<Vec<LinkEdge>>;

    /// Replace the site's cluster ids wholesale; pages not listed lose theirs.
    async fn set_clusters(&self, site_id: &str, assignments: &[ClusterAssignment]) -> Result<()>;

    /// Replace pr/tspr/inlinks wholesale; pages not listed are cleared.
    async fn write_authority(&self, site_id: &str, scores: &[AuthorityResult]) -> Result<()>;

    /// Pages with computed authority.
    async fn get_authority_results(&self, site_id: &str) -> Result<Vec<AuthorityResult>>;

    /// Delete a page and every edge touching it. Returns false if absent.
    async fn purge_page(&self, site_id: &str, page_id: &str) -> Result<bool>;
}

// =============================================================================
// EMBEDDING STORE
// =============================================================================

/// Per-page embedding vectors and cluster ids.
#[async_trait]
pub trait EmbeddingStore: Send + Sync {
    /// Overwrite vectors. Existing cluster ids are kept until the next
    /// clustering run replaces them.
    async fn upsert_embeddings(&self, site_id: &str, embeddings: &[PageEmbedding]) -> Result<u64>;

    /// All embeddings of a site, ordered by page id.
    async fn get_embeddings(&self, site_id: &str) -> Result<Vec<PageEmbedding>>;

    /// Replace the site's cluster ids wholesale.
    async fn set_clusters(&self, site_id: &str, assignments: &[ClusterAssignment]) -> Result<()>;

    async fn delete_embedding(&self, site_id: &str, page_id: &str) -> Result<bool>;
}

// =============================================================================
// SUGGESTION STORE
// =============================================================================

/// Ranked suggestion cache.
#[async_trait]
pub trait SuggestionStore: Send + Sync {
    /// Top suggestions by score, in rank order.
    async fn get_top(&self, site_id: &str, limit: usize) -> Result<Vec<LinkSuggestion>>;

    /// Atomically swap the site's suggestion set.
    async fn replace(&self, site_id: &str, suggestions: &[LinkSuggestion]) -> Result<u64>;

    async fn count(&self, site_id: &str) -> Result<i64>;

    /// Drop suggestions from or to a page.
    async fn delete_for_page(&self, site_id: &str, page_id: &str) -> Result<u64>;
}

// =============================================================================
// WORKFLOW RUN REPOSITORY
// =============================================================================

/// Persisted state of the durable orchestrator.
#[async_trait]
pub trait RunRepository: Send + Sync {
    /// Create a run and queue its first stage, unless an active run of the
    /// same workflow exists for the site, in which case that run is returned.
    async fn create_run(&self, req: NewRun) -> Result<RunStart>;

    /// Claim the next due stage job on a task queue.
    async fn claim_next_stage(&self, task_queue: &str) -> Result<Option<StageJob>>;

    /// Mark a job done, then queue `next` or mark the run done.
    async fn complete_stage(&self, job_id: Uuid, next: Option<PipelineStage>) -> Result<()>;

    /// Put a job back in the queue for another attempt at `run_after`.
    async fn retry_stage(&self, job_id: Uuid, error: &str, run_after: DateTime<Utc>) -> Result<()>;

    /// Mark a job and its run failed.
    async fn fail_stage(&self, job_id: Uuid, error: &str) -> Result<()>;

    async fn get_run(&self, run_id: Uuid) -> Result<Option<WorkflowRun>>;

    /// Most recent run started under a workflow id.
    async fn latest_run(&self, workflow_id: &str) -> Result<Option<WorkflowRun>>;

    /// Stage jobs of a run in creation order.
    async fn list_stage_jobs(&self, run_id: Uuid) -> Result<Vec<StageJob>>;
}

// =============================================================================
// INFERENCE TRAITS
// =============================================================================

/// Backend for generating text embeddings.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Generate embeddings for the given texts.
    ///
    /// Returns a vector of embedding vectors, one per input text.
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<crate::Vector>>;

    /// Get the expected dimension of embedding vectors.
    fn dimension(&self) -> usize;

    /// Get the model name being used.
    fn model_name(&self) -> &str;
}
