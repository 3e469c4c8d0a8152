//! Durable pipeline worker.
//!
//! Claims due stage jobs from a task queue, runs the registered handler
//! under the stage timeout, then advances, reschedules or fails the run.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use linkrank_core::{defaults, Error, PipelineStage, Result, RunRepository, StageJob};

use crate::handler::{StageContext, StageHandler, StageResult};
use crate::retry::RetryPolicy;

/// Configuration for the pipeline worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Polling interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Maximum number of concurrent stage jobs.
    pub max_concurrent_jobs: usize,
    /// Whether to enable job processing.
    pub enabled: bool,
    /// Task queue to claim from.
    pub task_queue: String,
    pub stage_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: defaults::WORKER_POLL_INTERVAL_MS,
            max_concurrent_jobs: defaults::WORKER_MAX_CONCURRENT,
            enabled: true,
            task_queue: defaults::TASK_QUEUE.to_string(),
            stage_timeout: Duration::from_secs(defaults::STAGE_TIMEOUT_SECS),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `WORKER_ENABLED` | `true` | Enable/disable stage processing |
    /// | `WORKER_MAX_CONCURRENT` | `4` | Max concurrent stage jobs |
    /// | `WORKER_POLL_INTERVAL_MS` | `500` | Polling interval when queue is empty |
    /// | `WORKFLOW_TASK_QUEUE` | `seo-tasks-queue` | Queue to claim from |
    /// | `STAGE_TIMEOUT_SECS` | `300` | Per-stage timeout |
    pub fn from_env() -> Self {
        let enabled = std::env::var("WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let max_concurrent_jobs = std::env::var("WORKER_MAX_CONCURRENT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::WORKER_MAX_CONCURRENT)
            .max(1);

        let poll_interval_ms = std::env::var("WORKER_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::WORKER_POLL_INTERVAL_MS);

        let task_queue = std::env::var("WORKFLOW_TASK_QUEUE")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| defaults::TASK_QUEUE.to_string());

        let stage_timeout_secs = std::env::var("STAGE_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::STAGE_TIMEOUT_SECS)
            .max(1);

        Self {
            poll_interval_ms,
            max_concurrent_jobs,
            enabled,
            task_queue,
            stage_timeout: Duration::from_secs(stage_timeout_secs),
        }
    }

    /// Create a new config with custom poll interval.
    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Set maximum concurrent jobs.
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max.max(1);
        self
    }

    /// Enable or disable job processing.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_task_queue(mut self, task_queue: impl Into<String>) -> Self {
        self.task_queue = task_queue.into();
        self
    }

    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = timeout;
        self
    }
}

/// Event emitted by the pipeline worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// A stage job was claimed and started.
    StageStarted {
        run_id: Uuid,
        job_id: Uuid,
        stage: PipelineStage,
        attempt: i32,
    },
    /// A stage completed successfully.
    StageCompleted {
        run_id: Uuid,
        job_id: Uuid,
        stage: PipelineStage,
    },
    /// A stage failed and was rescheduled.
    StageRetrying {
        run_id: Uuid,
        job_id: Uuid,
        stage: PipelineStage,
        attempt: i32,
        delay_ms: u64,
        error: String,
    },
    /// The last stage of a run completed.
    RunCompleted { run_id: Uuid },
    /// A run was marked failed.
    RunFailed {
        run_id: Uuid,
        stage: PipelineStage,
        error: String,
    },
    /// Worker started.
    WorkerStarted,
    /// Worker stopped.
    WorkerStopped,
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
}

impl WorkerHandle {
    /// Signal the worker to shut down gracefully.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }
}

type HandlerMap = Arc<RwLock<HashMap<PipelineStage, Arc<dyn StageHandler>>>>;

/// Worker that executes durable workflow stages.
pub struct PipelineWorker {
    runs: Arc<dyn RunRepository>,
    config: WorkerConfig,
    retry: RetryPolicy,
    handlers: HandlerMap,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl PipelineWorker {
    /// Create a new pipeline worker.
    pub fn new(runs: Arc<dyn RunRepository>, config: WorkerConfig, retry: RetryPolicy) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        Self {
            runs,
            config,
            retry,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
        }
    }

    /// Register a handler for a stage.
    pub async fn register_handler(&self, handler: Arc<dyn StageHandler>) {
        let stage = handler.stage();
        let mut handlers = self.handlers.write().await;
        handlers.insert(stage, handler);
        debug!(%stage, "Registered stage handler");
    }

    /// Start the worker and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();

        let worker = Arc::new(self);
        tokio::spawn(async move {
            worker.run(&mut shutdown_rx).await;
        });

        WorkerHandle {
            shutdown_tx,
            event_rx,
        }
    }

    /// Claims up to `max_concurrent_jobs` at a time and processes them
    /// concurrently. Only sleeps when the queue is empty.
    #[instrument(skip(self, shutdown_rx), fields(subsystem = "jobs", component = "worker", task_queue = %self.config.task_queue))]
    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("Pipeline worker is disabled, not starting");
            return;
        }

        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            max_concurrent = self.config.max_concurrent_jobs,
            stage_timeout_secs = self.config.stage_timeout.as_secs(),
            "Pipeline worker started"
        );

        let _ = self.event_tx.send(WorkerEvent::WorkerStarted);

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let max_concurrent = self.config.max_concurrent_jobs.max(1);

        loop {
            if shutdown_rx.try_recv().is_ok() {
                info!("Pipeline worker received shutdown signal");
                break;
            }

            let mut claimed = 0;
            let mut tasks = tokio::task::JoinSet::new();

            for _ in 0..max_concurrent {
                match self.claim_job().await {
                    Some(job) => {
                        claimed += 1;
                        let runner = self.runner();
                        tasks.spawn(async move {
                            runner.execute_job(job).await;
                        });
                    }
                    None => break,
                }
            }

            if claimed == 0 {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Pipeline worker received shutdown signal");
                        break;
                    }
                    _ = sleep(poll_interval) => {}
                }
            } else {
                debug!(claimed, "Processing concurrent stage batch");
                while let Some(result) = tasks.join_next().await {
                    if let Err(e) = result {
                        error!(error = ?e, "Stage task panicked");
                    }
                }
            }
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
        info!("Pipeline worker stopped");
    }

    async fn claim_job(&self) -> Option<StageJob> {
        match self.runs.claim_next_stage(&self.config.task_queue).await {
            Ok(job) => job,
            Err(e) => {
                error!(error = %e, "Failed to claim stage job");
                None
            }
        }
    }

    fn runner(&self) -> StageRunner {
        StageRunner {
            runs: self.runs.clone(),
            handlers: self.handlers.clone(),
            event_tx: self.event_tx.clone(),
            retry: self.retry,
            stage_timeout: self.config.stage_timeout,
        }
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }
}

/// References needed to execute one claimed job in a spawned task.
struct StageRunner {
    runs: Arc<dyn RunRepository>,
    handlers: HandlerMap,
    event_tx: broadcast::Sender<WorkerEvent>,
    retry: RetryPolicy,
    stage_timeout: Duration,
}

impl StageRunner {
    async fn execute_job(self, job: StageJob) {
        let start = Instant::now();
        let (run_id, job_id, stage) = (job.run_id, job.id, job.stage);

        info!(%run_id, %job_id, %stage, attempt = job.attempt, site_id = %job.site_id, "Processing stage");
        let _ = self.event_tx.send(WorkerEvent::StageStarted {
            run_id,
            job_id,
            stage,
            attempt: job.attempt,
        });

        let handler = {
            let handlers = self.handlers.read().await;
            handlers.get(&stage).cloned()
        };

        let result = match (handler, StageContext::from_job(&job)) {
            (Some(handler), Ok(ctx)) => {
                match tokio::time::timeout(self.stage_timeout, handler.execute(ctx)).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(%run_id, %stage, timeout_secs = self.stage_timeout.as_secs(), "Stage exceeded timeout");
                        StageResult::Retry(format!(
                            "Stage exceeded timeout of {}s",
                            self.stage_timeout.as_secs()
                        ))
                    }
                }
            }
            (None, _) => {
                warn!(%stage, "No handler registered for stage");
                StageResult::Failed(format!("No handler for stage: {}", stage))
            }
            (_, Err(e)) => StageResult::Failed(format!("Invalid stage arguments: {}", e)),
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        match result {
            StageResult::Success(summary) => {
                let next = job.workflow_name.next_stage(stage);
                if let Err(e) = self.runs.complete_stage(job_id, next).await {
                    error!(error = %e, %job_id, "Failed to mark stage as completed");
                    return;
                }
                info!(%run_id, %stage, ?next, duration_ms, ?summary, "Stage completed");
                let _ = self.event_tx.send(WorkerEvent::StageCompleted {
                    run_id,
                    job_id,
                    stage,
                });
                if next.is_none() {
                    info!(%run_id, "Workflow run completed");
                    let _ = self.event_tx.send(WorkerEvent::RunCompleted { run_id });
                }
            }
            StageResult::Retry(error) if job.attempts_left() => {
                let delay = self.retry.backoff(job.attempt);
                let run_after = Utc::now()
                    + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
                if let Err(e) = self.runs.retry_stage(job_id, &error, run_after).await {
                    error!(error = %e, %job_id, "Failed to reschedule stage");
                    return;
                }
                let delay_ms = delay.as_millis() as u64;
                warn!(%run_id, %stage, attempt = job.attempt, delay_ms, %error, "Stage failed, retry scheduled");
                let _ = self.event_tx.send(WorkerEvent::StageRetrying {
                    run_id,
                    job_id,
                    stage,
                    attempt: job.attempt,
                    delay_ms,
                    error,
                });
            }
            StageResult::Failed(error) | StageResult::Retry(error) => {
                if let Err(e) = self.runs.fail_stage(job_id, &error).await {
                    error!(error = %e, %job_id, "Failed to mark stage as failed");
                    return;
                }
                error!(%run_id, %stage, attempt = job.attempt, %error, duration_ms, "Workflow run failed");
                let _ = self.event_tx.send(WorkerEvent::RunFailed {
                    run_id,
                    stage,
                    error,
                });
            }
        }
    }
}

/// Builder for creating a pipeline worker with handlers.
pub struct WorkerBuilder {
    runs: Arc<dyn RunRepository>,
    config: WorkerConfig,
    retry: RetryPolicy,
    handlers: Vec<Arc<dyn StageHandler>>,
}

impl WorkerBuilder {
    /// Create a new worker builder.
    pub fn new(runs: Arc<dyn RunRepository>) -> Self {
        Self {
            runs,
            config: WorkerConfig::default(),
            retry: RetryPolicy::default(),
            handlers: Vec::new(),
        }
    }

    /// Set the worker configuration.
    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Add a handler.
    pub fn with_handler(mut self, handler: Arc<dyn StageHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn with_handlers(mut self, handlers: impl IntoIterator<Item = Arc<dyn StageHandler>>) -> Self {
        self.handlers.extend(handlers);
        self
    }

    /// Build and return the worker.
    pub async fn build(self) -> PipelineWorker {
        let worker = PipelineWorker::new(self.runs, self.config, self.retry);
        for handler in self.handlers {
            worker.register_handler(handler).await;
        }
        worker
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config_default() {
        let config = WorkerConfig::default();
        assert_eq!(config.poll_interval_ms, 500);
        assert_eq!(config.max_concurrent_jobs, 4);
        assert!(config.enabled);
        assert_eq!(config.task_queue, "seo-tasks-queue");
        assert_eq!(config.stage_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_worker_config_builders() {
        let config = WorkerConfig::default()
            .with_poll_interval(10)
            .with_max_concurrent(0)
            .with_enabled(false)
            .with_task_queue("other")
            .with_stage_timeout(Duration::from_millis(50));
        assert_eq!(config.poll_interval_ms, 10);
        assert_eq!(config.max_concurrent_jobs, 1);
        assert!(!config.enabled);
        assert_eq!(config.task_queue, "other");
        assert_eq!(config.stage_timeout, Duration::from_millis(50));
    }
}
