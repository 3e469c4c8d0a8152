//! Core data models for linkrank.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::defaults;

// =============================================================================
// PAGE GRAPH TYPES
// =============================================================================

/// Crawl status of a page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageStatus {
    /// Fetched and extracted successfully
    #[default]
    Ok,
    /// Known only as a link target, not crawled yet
    Pending,
    /// Fetch or extraction failed
    Error,
}

impl PageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageStatus::Ok => "ok",
            PageStatus::Pending => "pending",
            PageStatus::Error => "error",
        }
    }
}

impl std::str::FromStr for PageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ok" => Ok(PageStatus::Ok),
            "pending" => Ok(PageStatus::Pending),
            "error" => Ok(PageStatus::Error),
            other => Err(format!("unknown page status: {other}")),
        }
    }
}

/// A page in a site's graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub page_id: String,
    pub site_id: String,
    pub url: String,
    pub title: Option<String>,
    pub status: PageStatus,
    pub word_count: i32,
    pub content_score: f64,
    /// Written only by the cluster stage.
    pub cluster_id: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Page fields written by ingest.
///
/// A `Pending` record never overwrites an existing page; it only creates
/// a placeholder for an uncrawled link target.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRecord {
    pub page_id: String,
    pub url: String,
    pub title: Option<String>,
    pub status: PageStatus,
    pub word_count: i32,
    pub content_score: f64,
    pub content: Option<String>,
}

/// Directed, weighted internal link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkEdge {
    pub source: String,
    pub target: String,
    pub weight: f64,
}

/// Text handed to the embedding stage.
#[derive(Debug, Clone, PartialEq)]
pub struct PageText {
    pub page_id: String,
    pub text: String,
}

/// A link found on a crawled page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawledLink {
    pub url: String,
    #[serde(default)]
    pub anchor_text: Option<String>,
    #[serde(default)]
    pub weight: Option<f64>,
}

/// One page as produced by the upstream crawler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawledPage {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub status: PageStatus,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub word_count: Option<i32>,
    #[serde(default)]
    pub content_score: Option<f64>,
    #[serde(default)]
    pub links: Vec<CrawledLink>,
}

impl CrawledPage {
    /// Word count as reported, or counted from content.
    pub fn effective_word_count(&self) -> i32 {
        match (self.word_count, &self.content) {
            (Some(n), _) => n,
            (None, Some(text)) => i32::try_from(text.split_whitespace().count()).unwrap_or(i32::MAX),
            (None, None) => 0,
        }
    }
}

/// Counts reported by an ingest batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestSummary {
    pub pages: u64,
    pub pending_pages: u64,
    pub edges: u64,
}

// =============================================================================
// AUTHORITY & EMBEDDING TYPES
// =============================================================================

/// Per-page authority as stored in the graph store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorityResult {
    pub page_id: String,
    pub pr: f64,
    pub tspr: Option<f64>,
    pub cluster: Option<i32>,
    pub inlinks: i64,
}

impl AuthorityResult {
    /// Authority used to weight suggestions targeting this page.
    pub fn target_authority(&self) -> f64 {
        self.tspr.unwrap_or(self.pr)
    }
}

/// The current embedding of one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageEmbedding {
    pub page_id: String,
    pub vector: Vec<f32>,
    pub cluster_id: Option<i32>,
}

/// Cluster id assigned to a page in one clustering run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterAssignment {
    pub page_id: String,
    pub cluster_id: i32,
}

// =============================================================================
// SUGGESTION TYPES
// =============================================================================

/// A scored, directed link that the site does not have yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkSuggestion {
    pub site_id: String,
    pub from_page_id: String,
    pub to_page_id: String,
    pub similarity: f64,
    pub target_authority: f64,
    pub score: f64,
    pub reason: String,
}

impl LinkSuggestion {
    /// Ordering used everywhere suggestions are ranked: score descending,
    /// then source and target ids ascending.
    pub fn rank_cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| self.from_page_id.cmp(&other.from_page_id))
            .then_with(|| self.to_page_id.cmp(&other.to_page_id))
    }
}

/// Where a suggestion response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionSource {
    Cache,
    Calculated,
}

// =============================================================================
// WORKFLOW TYPES
// =============================================================================

/// A stage of the analysis pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Ingest,
    Embed,
    Cluster,
    Authority,
    Recommend,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Ingest => "ingest",
            PipelineStage::Embed => "embed",
            PipelineStage::Cluster => "cluster",
            PipelineStage::Authority => "authority",
            PipelineStage::Recommend => "recommend",
        }
    }
}

impl std::str::FromStr for PipelineStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ingest" => Ok(PipelineStage::Ingest),
            "embed" => Ok(PipelineStage::Embed),
            "cluster" => Ok(PipelineStage::Cluster),
            "authority" => Ok(PipelineStage::Authority),
            "recommend" => Ok(PipelineStage::Recommend),
            other => Err(format!("unknown pipeline stage: {other}")),
        }
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named workflows the orchestrator can start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowName {
    /// Recompute and cache link suggestions from materialized stores
    GenerateLinkSuggestions,
    /// Ingest a crawl and run every stage through to suggestions
    FullSiteAnalysis,
}

impl WorkflowName {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowName::GenerateLinkSuggestions => "generate_link_suggestions",
            WorkflowName::FullSiteAnalysis => "full_site_analysis",
        }
    }

    /// Stages in execution order.
    pub fn stages(&self) -> &'static [PipelineStage] {
        match self {
            WorkflowName::GenerateLinkSuggestions => &[PipelineStage::Recommend],
            WorkflowName::FullSiteAnalysis => &[
                PipelineStage::Ingest,
                PipelineStage::Embed,
                PipelineStage::Cluster,
                PipelineStage::Authority,
                PipelineStage::Recommend,
            ],
        }
    }

    pub fn first_stage(&self) -> PipelineStage {
        self.stages()[0]
    }

    /// Stage that follows `stage`, or `None` when the workflow is done.
    pub fn next_stage(&self, stage: PipelineStage) -> Option<PipelineStage> {
        let stages = self.stages();
        let idx = stages.iter().position(|s| *s == stage)?;
        stages.get(idx + 1).copied()
    }
}

impl std::str::FromStr for WorkflowName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generate_link_suggestions" => Ok(WorkflowName::GenerateLinkSuggestions),
            "full_site_analysis" => Ok(WorkflowName::FullSiteAnalysis),
            other => Err(format!("unknown workflow: {other}")),
        }
    }
}

impl std::fmt::Display for WorkflowName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a workflow run or of one of its stage jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Done,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Done => "done",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, RunStatus::Pending | RunStatus::Running)
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "done" => Ok(RunStatus::Done),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// Arguments carried by a workflow run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineArgs {
    pub site_id: String,
    /// Crawl batch for the ingest stage; empty for suggestion-only runs.
    #[serde(default)]
    pub pages: Vec<CrawledPage>,
}

impl PipelineArgs {
    pub fn for_site(site_id: impl Into<String>) -> Self {
        Self {
            site_id: site_id.into(),
            pages: Vec::new(),
        }
    }
}

/// A durable workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: Uuid,
    pub workflow_id: String,
    pub workflow_name: WorkflowName,
    pub site_id: String,
    pub task_queue: String,
    /// Current (or last attempted) stage.
    pub stage: PipelineStage,
    pub status: RunStatus,
    pub args: JsonValue,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One scheduled execution of a pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageJob {
    pub id: Uuid,
    pub run_id: Uuid,
    pub site_id: String,
    pub workflow_name: WorkflowName,
    pub stage: PipelineStage,
    pub status: RunStatus,
    /// 1-based attempt number of the current (or next) execution.
    pub attempt: i32,
    pub max_attempts: i32,
    pub run_after: DateTime<Utc>,
    pub args: JsonValue,
    pub error: Option<String>,
}

impl StageJob {
    pub fn attempts_left(&self) -> bool {
        self.attempt < self.max_attempts
    }
}

/// Request to create a workflow run.
#[derive(Debug, Clone)]
pub struct NewRun {
    pub workflow_id: String,
    pub workflow_name: WorkflowName,
    pub site_id: String,
    pub task_queue: String,
    pub args: JsonValue,
    pub max_attempts: i32,
}

impl NewRun {
    pub fn new(
        workflow_name: WorkflowName,
        site_id: impl Into<String>,
        workflow_id: impl Into<String>,
        args: JsonValue,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            workflow_name,
            site_id: site_id.into(),
            task_queue: defaults::TASK_QUEUE.to_string(),
            args,
            max_attempts: defaults::STAGE_MAX_ATTEMPTS,
        }
    }

    pub fn with_task_queue(mut self, task_queue: impl Into<String>) -> Self {
        self.task_queue = task_queue.into();
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

/// Outcome of `create_run`.
#[derive(Debug, Clone)]
pub struct RunStart {
    pub run: WorkflowRun,
    /// An active run of the same workflow for the site already existed.
    pub deduplicated: bool,
}
