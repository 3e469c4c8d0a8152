//! # linkrank-jobs
//!
//! Pipeline execution for linkrank.
//!
//! This crate provides:
//! - One idempotent operation and [`StageHandler`] per pipeline stage
//!   (ingest, embed, cluster, authority, recommend)
//! - A durable [`PipelineWorker`] that claims stage jobs from a task queue
//!   with bounded concurrency, per-stage timeouts and exponential backoff
//! - The [`Orchestrator`] capability with durable and inline implementations
//! - [`LinkSuggestionService`], the cache-or-compute entry point used by
//!   the HTTP layer
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use linkrank_db::Stores;
//! use linkrank_jobs::{
//!     DurableOrchestrator, LinkSuggestionService, Pipeline, PipelineConfig, WorkerBuilder,
//!     WorkerConfig,
//! };
//!
//! let stores = Stores::memory();
//! let pipeline = Arc::new(Pipeline::new(stores.clone(), embedder, PipelineConfig::from_env()));
//!
//! let handle = WorkerBuilder::new(stores.runs.clone())
//!     .with_config(WorkerConfig::from_env())
//!     .with_handlers(pipeline.handlers())
//!     .build()
//!     .await
//!     .start();
//!
//! let service = LinkSuggestionService::new(
//!     pipeline,
//!     Arc::new(DurableOrchestrator::new(stores.runs.clone())),
//! );
//! let outcome = service.get_links("site-1", false).await?;
//!
//! handle.shutdown().await?;
//! ```

pub mod handler;
pub mod orchestrator;
pub mod retry;
pub mod service;
pub mod stages;
pub mod worker;

// Re-export core types
pub use linkrank_core::*;

pub use handler::{StageContext, StageHandler, StageResult};
pub use orchestrator::{
    DurableOrchestrator, InlineOrchestrator, InlineRun, InlineRunner, InlineStageReport,
    Orchestrator, WorkflowHandle,
};
pub use retry::RetryPolicy;
pub use service::{
    link_suggestions_workflow_id, site_analysis_workflow_id, AnalysisOutcome,
    LinkSuggestionService, LinksOutcome, SuggestionList, WorkflowStatus,
};
pub use stages::{
    AuthorityHandler, AuthoritySummary, ClusterHandler, ClusterSummary, EmbedHandler,
    EmbedSummary, IngestHandler, Pipeline, PipelineConfig, PurgeSummary, RecommendHandler,
    RecommendSummary,
};
pub use worker::{PipelineWorker, WorkerBuilder, WorkerConfig, WorkerEvent, WorkerHandle};
