//! Centralized default constants for linkrank.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates reference these constants instead of defining their own magic
//! numbers; runtime overrides go through each config struct's `from_env`.

// =============================================================================
// AUTHORITY PROPAGATION
// =============================================================================

/// Random-walk damping factor.
pub const DAMPING_FACTOR: f64 = 0.85;

/// Iteration cap for authority propagation.
pub const AUTHORITY_MAX_ITERATIONS: usize = 20;

/// L1 change below which propagation is considered converged.
pub const AUTHORITY_TOLERANCE: f64 = 1e-6;

// =============================================================================
// CLUSTERING
// =============================================================================

/// Number of topical clusters (k).
pub const CLUSTER_COUNT: usize = 5;

/// Iteration cap for k-means.
pub const KMEANS_MAX_ITERATIONS: usize = 100;

/// Fixed RNG seed for k-means++ initialization.
pub const KMEANS_SEED: u64 = 0x5EED_11AC;

// =============================================================================
// CANDIDATE SCORING
// =============================================================================

/// Maximum L2 distance for a same-cluster pair to be suggested.
pub const MAX_LINK_DISTANCE: f32 = 0.8;

/// Score multiplier applied to similarity × target authority.
pub const SCORE_SCALE: f64 = 1.2 * 100.0;

/// Reason attached to every generated suggestion.
pub const SUGGESTION_REASON: &str = "Same Cluster";

/// Maximum suggestions persisted per site.
pub const SUGGESTION_PERSIST_LIMIT: usize = 1000;

/// Maximum suggestions returned per response.
pub const SUGGESTION_RESPONSE_LIMIT: usize = 100;

/// Upper bound on the synchronous suggestion cache write.
pub const SUGGESTION_WRITE_TIMEOUT_SECS: u64 = 10;

// =============================================================================
// INGEST / EMBEDDING
// =============================================================================

/// Crawled pages upserted per ingest batch.
pub const INGEST_BATCH_SIZE: usize = 10;

/// Concurrent ingest batches.
pub const INGEST_CONCURRENCY: usize = 4;

/// Default edge weight when the crawler supplies none.
pub const DEFAULT_EDGE_WEIGHT: f64 = 1.0;

/// Texts sent to the embedding backend per request.
pub const EMBED_BATCH_SIZE: usize = 16;

/// Concurrent embedding requests.
pub const EMBED_CONCURRENCY: usize = 4;

/// Characters of page content sent to the embedding model.
pub const EMBED_TEXT_MAX_CHARS: usize = 8000;

/// Default embedding model name (Ollama).
pub const EMBED_MODEL: &str = "nomic-embed-text";

/// Default embedding vector dimension for nomic-embed-text.
pub const EMBED_DIMENSION: usize = 768;

/// Default Ollama base URL.
pub const OLLAMA_URL: &str = "http://127.0.0.1:11434";

/// Timeout for embedding requests in seconds.
pub const EMBED_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// WORKFLOW
// =============================================================================

/// Task queue used for pipeline stage jobs.
pub const TASK_QUEUE: &str = "seo-tasks-queue";

/// Per-stage timeout in seconds.
pub const STAGE_TIMEOUT_SECS: u64 = 300;

/// Attempts per stage before the run is marked failed.
pub const STAGE_MAX_ATTEMPTS: i32 = 3;

/// First retry delay in milliseconds.
pub const RETRY_INITIAL_BACKOFF_MS: u64 = 500;

/// Retry delay cap in milliseconds.
pub const RETRY_MAX_BACKOFF_MS: u64 = 30_000;

/// Worker polling interval when the queue is empty (milliseconds).
pub const WORKER_POLL_INTERVAL_MS: u64 = 500;

/// Stage jobs processed concurrently by one worker.
pub const WORKER_MAX_CONCURRENT: usize = 4;

/// Worker event broadcast channel capacity.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// SERVER
// =============================================================================

/// Default HTTP server port.
pub const SERVER_PORT: u16 = 3000;

/// Default graph store URL.
pub const DATABASE_URL: &str = "postgres://localhost/linkrank";
