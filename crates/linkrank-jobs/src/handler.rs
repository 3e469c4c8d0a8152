//! Stage handlers for each pipeline stage.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use linkrank_core::{Error, PipelineArgs, PipelineStage, Result, StageJob};

/// Context provided to stage handlers.
pub struct StageContext {
    pub run_id: Uuid,
    pub site_id: String,
    pub stage: PipelineStage,
    /// 1-based attempt number.
    pub attempt: i32,
    pub args: PipelineArgs,
}

impl StageContext {
    /// Context for a claimed durable stage job.
    pub fn from_job(job: &StageJob) -> Result<Self> {
        let mut args: PipelineArgs = serde_json::from_value(job.args.clone())?;
        if args.site_id.is_empty() {
            args.site_id = job.site_id.clone();
        }
        Ok(Self {
            run_id: job.run_id,
            site_id: job.site_id.clone(),
            stage: job.stage,
            attempt: job.attempt,
            args,
        })
    }

    /// Context for inline execution, which has no persisted run.
    pub fn inline(stage: PipelineStage, args: PipelineArgs) -> Self {
        Self {
            run_id: Uuid::nil(),
            site_id: args.site_id.clone(),
            stage,
            attempt: 1,
            args,
        }
    }
}

/// Result of stage execution.
#[derive(Debug)]
pub enum StageResult {
    /// Stage completed successfully with optional summary data.
    Success(Option<JsonValue>),
    /// Stage failed permanently; the run is marked failed.
    Failed(String),
    /// Stage should be retried after a backoff.
    Retry(String),
}

impl StageResult {
    /// Classify a stage error. Missing prerequisites and configuration
    /// problems cannot be fixed by waiting; everything else is retried.
    pub fn from_error(err: &Error) -> Self {
        match err {
            Error::PreconditionMissing(_)
            | Error::StoreUnavailable(_)
            | Error::InvalidInput(_)
            | Error::Config(_)
            | Error::Serialization(_) => StageResult::Failed(err.to_string()),
            _ => StageResult::Retry(err.to_string()),
        }
    }

    pub fn from_outcome<T: serde::Serialize>(outcome: Result<T>) -> Self {
        match outcome {
            Ok(summary) => match serde_json::to_value(summary) {
                Ok(value) => StageResult::Success(Some(value)),
                Err(e) => StageResult::Failed(format!("stage summary not serializable: {}", e)),
            },
            Err(e) => StageResult::from_error(&e),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StageResult::Success(_))
    }
}

/// Trait for stage handlers.
#[async_trait]
pub trait StageHandler: Send + Sync {
    /// The stage this handler executes.
    fn stage(&self) -> PipelineStage;

    /// Execute the stage.
    async fn execute(&self, ctx: StageContext) -> StageResult;

    /// Check if this handler can process the given stage.
    fn can_handle(&self, stage: PipelineStage) -> bool {
        self.stage() == stage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use linkrank_core::{RunStatus, WorkflowName};

    fn job(args: JsonValue) -> StageJob {
        StageJob {
            id: Uuid::new_v4(),
            run_id: Uuid::new_v4(),
            site_id: "site-1".to_string(),
            workflow_name: WorkflowName::FullSiteAnalysis,
            stage: PipelineStage::Embed,
            status: RunStatus::Running,
            attempt: 2,
            max_attempts: 3,
            run_after: Utc::now(),
            args,
            error: None,
        }
    }

    #[test]
    fn test_context_from_job() {
        let job = job(serde_json::json!({"site_id": "site-1", "pages": []}));
        let ctx = StageContext::from_job(&job).unwrap();
        assert_eq!(ctx.run_id, job.run_id);
        assert_eq!(ctx.stage, PipelineStage::Embed);
        assert_eq!(ctx.attempt, 2);
        assert_eq!(ctx.args.site_id, "site-1");
    }

    #[test]
    fn test_context_fills_missing_site_from_job() {
        let ctx = StageContext::from_job(&job(serde_json::json!({"site_id": ""}))).unwrap();
        assert_eq!(ctx.args.site_id, "site-1");
    }

    #[test]
    fn test_context_rejects_malformed_args() {
        let err = StageContext::from_job(&job(serde_json::json!({"pages": 3}))).err();
        assert!(matches!(err, Some(Error::Serialization(_))));
    }

    #[test]
    fn test_precondition_fails_without_retry() {
        let result = StageResult::from_error(&Error::PreconditionMissing("x".into()));
        assert!(matches!(result, StageResult::Failed(_)));
    }

    #[test]
    fn test_transient_errors_retry() {
        let result = StageResult::from_error(&Error::TransientIo("timeout".into()));
        assert!(matches!(result, StageResult::Retry(ref m) if m.contains("timeout")));
        let result = StageResult::from_error(&Error::Embedding("503".into()));
        assert!(matches!(result, StageResult::Retry(_)));
    }

    #[test]
    fn test_from_outcome_fails_on_unserializable_summary() {
        let mut summary = std::collections::HashMap::new();
        summary.insert((1, 2), "pair keys are not valid JSON object keys");
        match StageResult::from_outcome(Ok(summary)) {
            StageResult::Failed(msg) => assert!(msg.contains("not serializable")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_from_outcome_serializes_summary() {
        let result = StageResult::from_outcome(Ok(serde_json::json!({"pages": 2})));
        match result {
            StageResult::Success(Some(v)) => assert_eq!(v["pages"], 2),
            other => panic!("unexpected {other:?}"),
        }
    }
}
