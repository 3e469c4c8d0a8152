//! AUTHORITY: recompute PR and TSPR over the current link graph.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use linkrank_core::{PipelineStage, Result};
use linkrank_graph::{compute_authority, AuthorityNode};

use super::Pipeline;
use crate::handler::{StageContext, StageHandler, StageResult};

/// Counts reported by the AUTHORITY stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthoritySummary {
    pub pages: usize,
    pub edges: usize,
    pub clustered_pages: usize,
    pub iterations: usize,
    pub converged: bool,
}

impl Pipeline {
    /// Recompute authority wholesale. Clusters come from the graph store,
    /// so this runs after CLUSTER when TSPR is wanted.
    #[instrument(skip(self), fields(subsystem = "jobs", component = "authority"))]
    pub async fn authority(&self, site_id: &str) -> Result<AuthoritySummary> {
        let start = Instant::now();
        let (pages, edges) = tokio::try_join!(
            self.stores.graph.list_pages(site_id),
            self.stores.graph.get_all_edges(site_id),
        )?;

        let nodes: Vec<AuthorityNode<'_>> = pages
            .iter()
            .map(|p| AuthorityNode {
                page_id: &p.page_id,
                cluster: p.cluster_id,
            })
            .collect();
        let report = compute_authority(&nodes, &edges, &self.config.authority);

        self.stores
            .graph
            .write_authority(site_id, &report.scores)
            .await?;

        if !report.converged {
            warn!(
                site_id,
                iterations = report.iterations,
                "Authority did not converge within the iteration cap"
            );
        }

        let summary = AuthoritySummary {
            pages: report.scores.len(),
            edges: edges.len(),
            clustered_pages: nodes.iter().filter(|n| n.cluster.is_some()).count(),
            iterations: report.iterations,
            converged: report.converged,
        };
        info!(
            site_id,
            pages = summary.pages,
            edges = summary.edges,
            clustered_pages = summary.clustered_pages,
            iterations = summary.iterations,
            duration_ms = start.elapsed().as_millis() as u64,
            "Authority complete"
        );
        Ok(summary)
    }
}

/// Durable handler for the AUTHORITY stage.
pub struct AuthorityHandler {
    pipeline: Arc<Pipeline>,
}

impl AuthorityHandler {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl StageHandler for AuthorityHandler {
    fn stage(&self) -> PipelineStage {
        PipelineStage::Authority
    }

    #[instrument(skip(self, ctx), fields(subsystem = "jobs", component = "authority", run_id = %ctx.run_id, site_id = %ctx.site_id, attempt = ctx.attempt))]
    async fn execute(&self, ctx: StageContext) -> StageResult {
        StageResult::from_outcome(self.pipeline.authority(&ctx.site_id).await)
    }
}
