//! Caller-facing link suggestion service.
//!
//! Read path: serve the cache when present and compute inline on a miss.
//! A forced refresh starts the suggestion workflow on the orchestrator and
//! falls back to the inline computation when that is not possible.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use linkrank_core::{
    defaults, AuthorityResult, CrawledPage, Error, IngestSummary, LinkSuggestion, PipelineArgs,
    Result, StageJob, SuggestionSource, WorkflowName, WorkflowRun,
};

use crate::orchestrator::{InlineRun, InlineRunner, Orchestrator, WorkflowHandle};
use crate::stages::{Pipeline, PurgeSummary};

/// Workflow id for a site's suggestion refresh.
pub fn link_suggestions_workflow_id(site_id: &str) -> String {
    format!("link-suggestions-{}", site_id)
}

/// Workflow id for a site's full analysis.
pub fn site_analysis_workflow_id(site_id: &str) -> String {
    format!("site-analysis-{}", site_id)
}

/// Suggestions served from the cache or computed inline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionList {
    pub suggestions: Vec<LinkSuggestion>,
    pub source: SuggestionSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_generated: Option<usize>,
}

/// Result of `get_links`.
#[derive(Debug, Clone, PartialEq)]
pub enum LinksOutcome {
    Ready(SuggestionList),
    /// Recompute handed to the durable orchestrator.
    Processing(WorkflowHandle),
}

/// Result of `start_analysis`.
#[derive(Debug, Clone)]
pub enum AnalysisOutcome {
    Processing(WorkflowHandle),
    Completed(InlineRun),
}

/// A workflow run with its stage jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStatus {
    pub run: WorkflowRun,
    pub stages: Vec<StageJob>,
}

/// Link suggestion service over an explicitly constructed pipeline and
/// orchestrator.
pub struct LinkSuggestionService {
    pipeline: Arc<Pipeline>,
    orchestrator: Arc<dyn Orchestrator>,
    runner: InlineRunner,
    task_queue: String,
    response_limit: usize,
}

impl LinkSuggestionService {
    pub fn new(pipeline: Arc<Pipeline>, orchestrator: Arc<dyn Orchestrator>) -> Self {
        Self {
            runner: InlineRunner::new(pipeline.clone()),
            pipeline,
            orchestrator,
            task_queue: defaults::TASK_QUEUE.to_string(),
            response_limit: defaults::SUGGESTION_RESPONSE_LIMIT,
        }
    }

    pub fn with_task_queue(mut self, task_queue: impl Into<String>) -> Self {
        self.task_queue = task_queue.into();
        self
    }

    pub fn with_response_limit(mut self, limit: usize) -> Self {
        self.response_limit = limit.max(1);
        self
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn orchestrator_name(&self) -> &'static str {
        self.orchestrator.name()
    }

    /// Serve cached suggestions, or recompute them.
    ///
    /// Without `refresh` a non-empty cache is returned verbatim and a miss
    /// is computed inline. With `refresh` the suggestion workflow is
    /// started on the orchestrator; if that is not possible the suggestions
    /// are computed inline.
    #[instrument(skip(self), fields(subsystem = "jobs", component = "link_service"))]
    pub async fn get_links(&self, site_id: &str, refresh: bool) -> Result<LinksOutcome> {
        if !refresh {
            if let Some(cached) = self.read_cache(site_id).await? {
                debug!(site_id, count = cached.len(), "Serving cached suggestions");
                return Ok(LinksOutcome::Ready(SuggestionList {
                    suggestions: cached,
                    source: SuggestionSource::Cache,
                    total_generated: None,
                }));
            }
            debug!(site_id, "No cached suggestions, computing inline");
            return self.compute_inline(site_id).await.map(LinksOutcome::Ready);
        }

        let workflow_id = link_suggestions_workflow_id(site_id);
        match self
            .orchestrator
            .start(
                WorkflowName::GenerateLinkSuggestions,
                PipelineArgs::for_site(site_id),
                &self.task_queue,
                &workflow_id,
            )
            .await
        {
            Ok(handle) => return Ok(LinksOutcome::Processing(handle)),
            Err(e) => warn!(
                site_id,
                orchestrator = self.orchestrator.name(),
                error = %e,
                "Orchestrator unavailable, computing suggestions inline"
            ),
        }

        self.compute_inline(site_id).await.map(LinksOutcome::Ready)
    }

    /// `None` when there is no cache: the store is empty for the site or
    /// not configured at all.
    async fn read_cache(&self, site_id: &str) -> Result<Option<Vec<LinkSuggestion>>> {
        let store = &self.pipeline.stores().suggestions;
        let limit = self.response_limit;
        let read = self
            .pipeline
            .config()
            .retry
            .retry_transient("read_suggestion_cache", move || store.get_top(site_id, limit))
            .await;

        match read {
            Ok(cached) if !cached.is_empty() => Ok(Some(cached)),
            Ok(_) => Ok(None),
            Err(Error::StoreUnavailable(msg)) => {
                debug!(site_id, %msg, "Suggestion store not configured");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Generate with the cluster-bounded algorithm, persist within the
    /// write timeout, and return the top of the list.
    async fn compute_inline(&self, site_id: &str) -> Result<SuggestionList> {
        let start = Instant::now();
        let pipeline = &self.pipeline;
        let generated = pipeline
            .config()
            .retry
            .retry_transient("generate_suggestions", move || pipeline.generate(site_id))
            .await;

        let report = match generated {
            Ok(report) => report,
            Err(Error::StoreUnavailable(msg)) => {
                warn!(site_id, %msg, "Embedding store not configured, returning no suggestions");
                return Ok(SuggestionList {
                    suggestions: Vec::new(),
                    source: SuggestionSource::Calculated,
                    total_generated: Some(0),
                });
            }
            Err(e) if e.is_transient() => {
                return Err(Error::TransientIo(format!(
                    "suggestion inputs unavailable after retries: {}",
                    e
                )))
            }
            Err(e) => return Err(e),
        };

        match pipeline.persist_suggestions(site_id, &report.suggestions).await {
            Ok(written) => debug!(site_id, written, "Suggestion cache replaced"),
            Err(e) => warn!(site_id, error = %e, "Failed to persist suggestions, serving computed set"),
        }

        let total_generated = report.total_generated;
        let mut suggestions = report.suggestions;
        suggestions.truncate(self.response_limit);

        info!(
            site_id,
            total_generated,
            returned = suggestions.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Suggestions computed inline"
        );
        Ok(SuggestionList {
            suggestions,
            source: SuggestionSource::Calculated,
            total_generated: Some(total_generated),
        })
    }

    /// Start the full analysis workflow, or run every stage inline when the
    /// orchestrator is unavailable.
    #[instrument(skip(self, pages), fields(subsystem = "jobs", component = "link_service", page_count = pages.len()))]
    pub async fn start_analysis(
        &self,
        site_id: &str,
        pages: Vec<CrawledPage>,
    ) -> Result<AnalysisOutcome> {
        let args = PipelineArgs {
            site_id: site_id.to_string(),
            pages,
        };
        let workflow_id = site_analysis_workflow_id(site_id);

        match self
            .orchestrator
            .start(
                WorkflowName::FullSiteAnalysis,
                args.clone(),
                &self.task_queue,
                &workflow_id,
            )
            .await
        {
            Ok(handle) => return Ok(AnalysisOutcome::Processing(handle)),
            Err(e) => warn!(
                site_id,
                orchestrator = self.orchestrator.name(),
                error = %e,
                "Orchestrator unavailable, running analysis inline"
            ),
        }

        self.runner
            .run(WorkflowName::FullSiteAnalysis, &args)
            .await
            .map(AnalysisOutcome::Completed)
    }

    /// Ingest a crawl batch synchronously.
    pub async fn ingest(&self, site_id: &str, pages: &[CrawledPage]) -> Result<IngestSummary> {
        self.pipeline.ingest(site_id, pages).await
    }

    /// Purge a page. `NotFound` when the page does not exist.
    pub async fn purge_page(&self, site_id: &str, page_id: &str) -> Result<PurgeSummary> {
        let summary = self.pipeline.purge_page(site_id, page_id).await?;
        if !summary.page_removed {
            return Err(Error::NotFound(format!("page {} in site {}", page_id, site_id)));
        }
        Ok(summary)
    }

    /// Authority results, strongest target authority first.
    pub async fn authority(&self, site_id: &str) -> Result<Vec<AuthorityResult>> {
        let mut results = self
            .pipeline
            .stores()
            .graph
            .get_authority_results(site_id)
            .await?;
        results.sort_by(|a, b| {
            b.target_authority()
                .total_cmp(&a.target_authority())
                .then_with(|| a.page_id.cmp(&b.page_id))
        });
        Ok(results)
    }

    /// Latest run started under a workflow id.
    pub async fn workflow_status(&self, workflow_id: &str) -> Result<WorkflowStatus> {
        let runs = &self.pipeline.stores().runs;
        let run = runs
            .latest_run(workflow_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("workflow {}", workflow_id)))?;
        let stages = runs.list_stage_jobs(run.id).await?;
        Ok(WorkflowStatus { run, stages })
    }
}
