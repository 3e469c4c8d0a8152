//! RECOMMEND: generate ranked suggestions and replace the cache.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use linkrank_core::{Error, LinkSuggestion, PipelineStage, Result};
use linkrank_graph::{generate_candidates, CandidateReport};

use super::{skip_if_unavailable, Pipeline};
use crate::handler::{StageContext, StageHandler, StageResult};

/// Counts reported by the RECOMMEND stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecommendSummary {
    pub total_generated: usize,
    pub persisted: u64,
    pub pairs_evaluated: u64,
    pub clusters: usize,
}

impl Pipeline {
    /// Generate candidates from the materialized stores without persisting.
    ///
    /// Fails with `PreconditionMissing` when AUTHORITY or EMBED has not run.
    #[instrument(skip(self), fields(subsystem = "jobs", component = "recommend", op = "generate"))]
    pub async fn generate(&self, site_id: &str) -> Result<CandidateReport> {
        let start = Instant::now();
        let (authority, edges, embeddings) = tokio::try_join!(
            self.stores.graph.get_authority_results(site_id),
            self.stores.graph.get_all_edges(site_id),
            self.stores.embeddings.get_embeddings(site_id),
        )?;

        let report = generate_candidates(
            site_id,
            &authority,
            &embeddings,
            &edges,
            &self.config.candidates,
        )?;
        debug!(
            site_id,
            total_generated = report.total_generated,
            pairs_evaluated = report.pairs_evaluated,
            duration_ms = start.elapsed().as_millis() as u64,
            "Candidates generated"
        );
        Ok(report)
    }

    /// Replace the suggestion cache, bounded by the write timeout.
    pub async fn persist_suggestions(
        &self,
        site_id: &str,
        suggestions: &[LinkSuggestion],
    ) -> Result<u64> {
        let timeout = self.config.suggestion_write_timeout;
        match tokio::time::timeout(timeout, self.stores.suggestions.replace(site_id, suggestions))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::TransientIo(format!(
                "suggestion cache write exceeded {}s",
                timeout.as_secs()
            ))),
        }
    }

    /// Generate and persist. Persistence failures fail the stage so the
    /// worker retries it; an unconfigured analytics store yields an empty
    /// summary.
    #[instrument(skip(self), fields(subsystem = "jobs", component = "recommend"))]
    pub async fn recommend(&self, site_id: &str) -> Result<RecommendSummary> {
        skip_if_unavailable(site_id, PipelineStage::Recommend, self.refresh_cache(site_id).await)
    }

    async fn refresh_cache(&self, site_id: &str) -> Result<RecommendSummary> {
        let report = self.generate(site_id).await?;
        let persisted = self
            .persist_suggestions(site_id, &report.suggestions)
            .await?;

        let summary = RecommendSummary {
            total_generated: report.total_generated,
            persisted,
            pairs_evaluated: report.pairs_evaluated,
            clusters: report.clusters,
        };
        info!(
            site_id,
            total_generated = summary.total_generated,
            persisted = summary.persisted,
            "Suggestions refreshed"
        );
        Ok(summary)
    }
}

/// Durable handler for the RECOMMEND stage.
pub struct RecommendHandler {
    pipeline: Arc<Pipeline>,
}

impl RecommendHandler {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl StageHandler for RecommendHandler {
    fn stage(&self) -> PipelineStage {
        PipelineStage::Recommend
    }

    #[instrument(skip(self, ctx), fields(subsystem = "jobs", component = "recommend", run_id = %ctx.run_id, site_id = %ctx.site_id, attempt = ctx.attempt))]
    async fn execute(&self, ctx: StageContext) -> StageResult {
        StageResult::from_outcome(self.pipeline.recommend(&ctx.site_id).await)
    }
}
