//! CLUSTER: assign topical cluster ids from embeddings.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use linkrank_core::{Error, PipelineStage, Result};
use linkrank_graph::{assign_clusters, KMeansConfig};

use super::{skip_if_unavailable, Pipeline};
use crate::handler::{StageContext, StageHandler, StageResult};

/// Counts reported by the CLUSTER stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub k: usize,
    pub assigned: usize,
    pub excluded: usize,
    pub iterations: usize,
    pub converged: bool,
}

impl Pipeline {
    /// Re-cluster the site and replace cluster ids in both stores. This
    /// stage is the only writer of `cluster_id`.
    #[instrument(skip(self), fields(subsystem = "jobs", component = "cluster"))]
    pub async fn cluster(&self, site_id: &str) -> Result<ClusterSummary> {
        skip_if_unavailable(site_id, PipelineStage::Cluster, self.cluster_pages(site_id).await)
    }

    async fn cluster_pages(&self, site_id: &str) -> Result<ClusterSummary> {
        let start = Instant::now();
        let embeddings = self.stores.embeddings.get_embeddings(site_id).await?;

        let config = KMeansConfig::with_k(self.config.cluster_count)
            .map_err(|e| Error::Config(e.to_string()))?
            .with_seed(self.config.cluster_seed);
        let report = assign_clusters(&embeddings, &config);

        self.stores
            .embeddings
            .set_clusters(site_id, &report.assignments)
            .await?;
        self.stores
            .graph
            .set_clusters(site_id, &report.assignments)
            .await?;

        let summary = ClusterSummary {
            k: report.k,
            assigned: report.assignments.len(),
            excluded: report.excluded,
            iterations: report.iterations,
            converged: report.converged,
        };
        info!(
            site_id,
            k = summary.k,
            assigned = summary.assigned,
            excluded = summary.excluded,
            iterations = summary.iterations,
            converged = summary.converged,
            duration_ms = start.elapsed().as_millis() as u64,
            "Clustering complete"
        );
        Ok(summary)
    }
}

/// Durable handler for the CLUSTER stage.
pub struct ClusterHandler {
    pipeline: Arc<Pipeline>,
}

impl ClusterHandler {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl StageHandler for ClusterHandler {
    fn stage(&self) -> PipelineStage {
        PipelineStage::Cluster
    }

    #[instrument(skip(self, ctx), fields(subsystem = "jobs", component = "cluster", run_id = %ctx.run_id, site_id = %ctx.site_id, attempt = ctx.attempt))]
    async fn execute(&self, ctx: StageContext) -> StageResult {
        StageResult::from_outcome(self.pipeline.cluster(&ctx.site_id).await)
    }
}
