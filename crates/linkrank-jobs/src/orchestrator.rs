//! Orchestrator capability.
//!
//! The durable implementation persists runs for the [`PipelineWorker`]; the
//! inline implementation reports itself unavailable so callers fall back to
//! running stages in-process through [`InlineRunner`]. Which one is used is
//! decided once at startup.
//!
//! [`PipelineWorker`]: crate::worker::PipelineWorker

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};
use uuid::Uuid;

use linkrank_core::{
    defaults, Error, NewRun, PipelineArgs, PipelineStage, Result, RunRepository, RunStatus,
    WorkflowName,
};

use crate::handler::StageResult;
use crate::retry::RetryPolicy;
use crate::stages::Pipeline;

/// Acknowledgment of a started (or already running) workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowHandle {
    pub workflow_id: String,
    pub run_id: Uuid,
    pub status: RunStatus,
    /// The request joined an active run instead of starting a new one.
    pub deduplicated: bool,
}

/// Starts workflows without waiting for them.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fire-and-forget durable start.
    async fn start(
        &self,
        workflow: WorkflowName,
        args: PipelineArgs,
        task_queue: &str,
        workflow_id: &str,
    ) -> Result<WorkflowHandle>;
}

/// Orchestrator backed by the workflow run repository.
pub struct DurableOrchestrator {
    runs: Arc<dyn RunRepository>,
    max_attempts: i32,
}

impl DurableOrchestrator {
    pub fn new(runs: Arc<dyn RunRepository>) -> Self {
        Self {
            runs,
            max_attempts: defaults::STAGE_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

#[async_trait]
impl Orchestrator for DurableOrchestrator {
    fn name(&self) -> &'static str {
        "durable"
    }

    async fn start(
        &self,
        workflow: WorkflowName,
        args: PipelineArgs,
        task_queue: &str,
        workflow_id: &str,
    ) -> Result<WorkflowHandle> {
        let site_id = args.site_id.clone();
        let request = NewRun::new(workflow, site_id.as_str(), workflow_id, serde_json::to_value(&args)?)
            .with_task_queue(task_queue)
            .with_max_attempts(self.max_attempts);

        let started = self.runs.create_run(request).await?;
        if started.deduplicated {
            debug!(
                subsystem = "jobs",
                component = "orchestrator",
                %workflow,
                site_id = %site_id,
                run_id = %started.run.id,
                "Joined active workflow run"
            );
        } else {
            info!(
                subsystem = "jobs",
                component = "orchestrator",
                %workflow,
                site_id = %site_id,
                run_id = %started.run.id,
                task_queue,
                "Workflow started"
            );
        }

        Ok(WorkflowHandle {
            workflow_id: started.run.workflow_id,
            run_id: started.run.id,
            status: started.run.status,
            deduplicated: started.deduplicated,
        })
    }
}

/// Null orchestrator used when durable workflows are disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineOrchestrator;

#[async_trait]
impl Orchestrator for InlineOrchestrator {
    fn name(&self) -> &'static str {
        "inline"
    }

    async fn start(
        &self,
        workflow: WorkflowName,
        _args: PipelineArgs,
        _task_queue: &str,
        _workflow_id: &str,
    ) -> Result<WorkflowHandle> {
        Err(Error::OrchestratorUnavailable(format!(
            "durable workflows are disabled; {} must run inline",
            workflow
        )))
    }
}

/// One stage executed by the inline runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InlineStageReport {
    pub stage: PipelineStage,
    pub attempts: i32,
    pub summary: JsonValue,
}

/// Outcome of an inline workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InlineRun {
    pub workflow: WorkflowName,
    pub site_id: String,
    pub stages: Vec<InlineStageReport>,
    pub duration_ms: u64,
}

/// Runs a workflow's stages in the calling task with the same stage
/// operations, timeout and retry policy as the durable worker.
#[derive(Clone)]
pub struct InlineRunner {
    pipeline: Arc<Pipeline>,
}

impl InlineRunner {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }

    pub async fn run(&self, workflow: WorkflowName, args: &PipelineArgs) -> Result<InlineRun> {
        let start = Instant::now();
        let mut stages = Vec::with_capacity(workflow.stages().len());

        for &stage in workflow.stages() {
            let (summary, attempts) = self.run_stage(stage, args).await?;
            stages.push(InlineStageReport {
                stage,
                attempts,
                summary,
            });
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            subsystem = "jobs",
            component = "inline_runner",
            %workflow,
            site_id = %args.site_id,
            stages = stages.len(),
            duration_ms,
            "Inline workflow complete"
        );
        Ok(InlineRun {
            workflow,
            site_id: args.site_id.clone(),
            stages,
            duration_ms,
        })
    }

    async fn run_stage(&self, stage: PipelineStage, args: &PipelineArgs) -> Result<(JsonValue, i32)> {
        let policy: RetryPolicy = self.pipeline.config().retry;
        let timeout = self.pipeline.config().stage_timeout;
        let mut attempt = 1;

        loop {
            let error = match tokio::time::timeout(timeout, self.pipeline.run_stage(stage, args)).await
            {
                Ok(Ok(summary)) => return Ok((summary, attempt)),
                Ok(Err(e)) => e,
                Err(_) => Error::TransientIo(format!(
                    "stage {} exceeded timeout of {}s",
                    stage,
                    timeout.as_secs()
                )),
            };

            let retryable = matches!(StageResult::from_error(&error), StageResult::Retry(_));
            if !retryable || attempt >= policy.max_attempts {
                warn!(
                    subsystem = "jobs",
                    component = "inline_runner",
                    %stage,
                    attempt,
                    error = %error,
                    "Inline stage failed"
                );
                return Err(error);
            }

            let delay = policy.backoff(attempt);
            warn!(
                subsystem = "jobs",
                component = "inline_runner",
                %stage,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Inline stage failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
