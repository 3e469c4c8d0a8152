//! Durable workflow state: runs and their stage jobs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Row};
use tracing::{debug, info};
use uuid::Uuid;

use linkrank_core::{
    new_v7, Error, NewRun, PipelineStage, Result, RunRepository, RunStart, RunStatus, StageJob,
    WorkflowName, WorkflowRun,
};

const RUN_COLUMNS: &str = "id, workflow_id, workflow_name, site_id, task_queue, stage, status, \
                           args, error, created_at, updated_at";

/// PostgreSQL implementation of [`RunRepository`].
#[derive(Clone)]
pub struct PgRunRepository {
    pool: Pool<Postgres>,
}

impl PgRunRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_run_row(row: sqlx::postgres::PgRow) -> Result<WorkflowRun> {
        let workflow_name: String = row.get("workflow_name");
        let stage: String = row.get("stage");
        let status: String = row.get("status");
        Ok(WorkflowRun {
            id: row.get("id"),
            workflow_id: row.get("workflow_id"),
            workflow_name: workflow_name.parse::<WorkflowName>().map_err(Error::Internal)?,
            site_id: row.get("site_id"),
            task_queue: row.get("task_queue"),
            stage: stage.parse::<PipelineStage>().map_err(Error::Internal)?,
            status: status.parse::<RunStatus>().map_err(Error::Internal)?,
            args: row.get("args"),
            error: row.get("error"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    fn parse_job_row(row: sqlx::postgres::PgRow) -> Result<StageJob> {
        let workflow_name: String = row.get("workflow_name");
        let stage: String = row.get("stage");
        let status: String = row.get("status");
        Ok(StageJob {
            id: row.get("id"),
            run_id: row.get("run_id"),
            site_id: row.get("site_id"),
            workflow_name: workflow_name.parse::<WorkflowName>().map_err(Error::Internal)?,
            stage: stage.parse::<PipelineStage>().map_err(Error::Internal)?,
            status: status.parse::<RunStatus>().map_err(Error::Internal)?,
            attempt: row.get("attempt"),
            max_attempts: row.get("max_attempts"),
            run_after: row.get("run_after"),
            args: row.get("args"),
            error: row.get("error"),
        })
    }

    async fn find_active(&self, site_id: &str, workflow: WorkflowName) -> Result<Option<WorkflowRun>> {
        let row = sqlx::query(&format!(
            "SELECT {RUN_COLUMNS} FROM workflow_run
             WHERE site_id = $1 AND workflow_name = $2 AND status IN ('pending', 'running')
             ORDER BY created_at DESC
             LIMIT 1"
        ))
        .bind(site_id)
        .bind(workflow.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_run_row).transpose()
    }
}

#[async_trait]
impl RunRepository for PgRunRepository {
    async fn create_run(&self, req: NewRun) -> Result<RunStart> {
        // The partial unique index on active runs makes the insert a no-op
        // while another run is pending or running; that run is returned.
        // A second pass covers the window where it finishes in between.
        for _ in 0..2 {
            let run_id = new_v7();
            let now = Utc::now();
            let first_stage = req.workflow_name.first_stage();

            let mut tx = self.pool.begin().await.map_err(Error::Database)?;

            let inserted = sqlx::query(&format!(
                "INSERT INTO workflow_run (id, workflow_id, workflow_name, site_id, task_queue,
                                           stage, status, args, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, 'pending', $7, $8, $8)
                 ON CONFLICT (site_id, workflow_name) WHERE status IN ('pending', 'running')
                 DO NOTHING
                 RETURNING {RUN_COLUMNS}"
            ))
            .bind(run_id)
            .bind(&req.workflow_id)
            .bind(req.workflow_name.as_str())
            .bind(&req.site_id)
            .bind(&req.task_queue)
            .bind(first_stage.as_str())
            .bind(&req.args)
            .bind(now)
            .fetch_optional(&mut *tx)
            .await
            .map_err(Error::Database)?;

            if let Some(row) = inserted {
                sqlx::query(
                    "INSERT INTO stage_job (id, run_id, task_queue, stage, status, attempt,
                                            max_attempts, run_after, created_at, updated_at)
                     VALUES ($1, $2, $3, $4, 'pending', 1, $5, $6, $6, $6)",
                )
                .bind(new_v7())
                .bind(run_id)
                .bind(&req.task_queue)
                .bind(first_stage.as_str())
                .bind(req.max_attempts)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(Error::Database)?;

                tx.commit().await.map_err(Error::Database)?;

                let run = Self::parse_run_row(row)?;
                info!(
                    subsystem = "workflow",
                    component = "runs",
                    op = "create_run",
                    run_id = %run.id,
                    workflow_id = %run.workflow_id,
                    workflow = %run.workflow_name,
                    site_id = %run.site_id,
                    "Workflow run created"
                );
                return Ok(RunStart {
                    run,
                    deduplicated: false,
                });
            }

            tx.rollback().await.map_err(Error::Database)?;

            if let Some(run) = self.find_active(&req.site_id, req.workflow_name).await? {
                debug!(
                    subsystem = "workflow",
                    component = "runs",
                    op = "create_run",
                    run_id = %run.id,
                    site_id = %run.site_id,
                    "Active run exists, deduplicated"
                );
                return Ok(RunStart {
                    run,
                    deduplicated: true,
                });
            }
        }

        Err(Error::Workflow(format!(
            "could not create or find an active {} run for site {}",
            req.workflow_name, req.site_id
        )))
    }

    async fn claim_next_stage(&self, task_queue: &str) -> Result<Option<StageJob>> {
        let now = Utc::now();

        let row = sqlx::query(
            "WITH claimed AS (
                 UPDATE stage_job
                 SET status = 'running', updated_at = $2
                 WHERE id = (
                     SELECT id FROM stage_job
                     WHERE task_queue = $1 AND status = 'pending' AND run_after <= $2
                     ORDER BY run_after ASC, created_at ASC
                     LIMIT 1
                     FOR UPDATE SKIP LOCKED
                 )
                 RETURNING id, run_id, stage, status, attempt, max_attempts, run_after, error
             )
             UPDATE workflow_run r
             SET status = 'running', stage = claimed.stage, updated_at = $2
             FROM claimed
             WHERE r.id = claimed.run_id
             RETURNING claimed.id, claimed.run_id, r.site_id, r.workflow_name, claimed.stage,
                       claimed.status, claimed.attempt, claimed.max_attempts, claimed.run_after,
                       r.args, claimed.error",
        )
        .bind(task_queue)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_job_row).transpose()
    }

    async fn complete_stage(&self, job_id: Uuid, next: Option<PipelineStage>) -> Result<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let row = sqlx::query(
            "UPDATE stage_job SET status = 'done', error = NULL, updated_at = $2
             WHERE id = $1
             RETURNING run_id, task_queue, max_attempts",
        )
        .bind(job_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::Database)?
        .ok_or_else(|| Error::NotFound(format!("stage job {job_id}")))?;

        let run_id: Uuid = row.get("run_id");
        let task_queue: String = row.get("task_queue");
        let max_attempts: i32 = row.get("max_attempts");

        match next {
            Some(stage) => {
                sqlx::query(
                    "INSERT INTO stage_job (id, run_id, task_queue, stage, status, attempt,
                                            max_attempts, run_after, created_at, updated_at)
                     VALUES ($1, $2, $3, $4, 'pending', 1, $5, $6, $6, $6)",
                )
                .bind(new_v7())
                .bind(run_id)
                .bind(&task_queue)
                .bind(stage.as_str())
                .bind(max_attempts)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(Error::Database)?;

                sqlx::query(
                    "UPDATE workflow_run SET stage = $2, error = NULL, updated_at = $3 WHERE id = $1",
                )
                .bind(run_id)
                .bind(stage.as_str())
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(Error::Database)?;
            }
            None => {
                sqlx::query(
                    "UPDATE workflow_run SET status = 'done', error = NULL, updated_at = $2
                     WHERE id = $1",
                )
                .bind(run_id)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(Error::Database)?;
            }
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }

    async fn retry_stage(&self, job_id: Uuid, error: &str, run_after: DateTime<Utc>) -> Result<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let run_id: Uuid = sqlx::query_scalar(
            "UPDATE stage_job
             SET status = 'pending', attempt = attempt + 1, error = $2, run_after = $3,
                 updated_at = $4
             WHERE id = $1
             RETURNING run_id",
        )
        .bind(job_id)
        .bind(error)
        .bind(run_after)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::Database)?
        .ok_or_else(|| Error::NotFound(format!("stage job {job_id}")))?;

        sqlx::query("UPDATE workflow_run SET error = $2, updated_at = $3 WHERE id = $1")
            .bind(run_id)
            .bind(error)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }

    async fn fail_stage(&self, job_id: Uuid, error: &str) -> Result<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let run_id: Uuid = sqlx::query_scalar(
            "UPDATE stage_job SET status = 'failed', error = $2, updated_at = $3
             WHERE id = $1
             RETURNING run_id",
        )
        .bind(job_id)
        .bind(error)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::Database)?
        .ok_or_else(|| Error::NotFound(format!("stage job {job_id}")))?;

        sqlx::query(
            "UPDATE workflow_run SET status = 'failed', error = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(run_id)
        .bind(error)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Option<WorkflowRun>> {
        let row = sqlx::query(&format!("SELECT {RUN_COLUMNS} FROM workflow_run WHERE id = $1"))
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        row.map(Self::parse_run_row).transpose()
    }

    async fn latest_run(&self, workflow_id: &str) -> Result<Option<WorkflowRun>> {
        let row = sqlx::query(&format!(
            "SELECT {RUN_COLUMNS} FROM workflow_run
             WHERE workflow_id = $1
             ORDER BY created_at DESC
             LIMIT 1"
        ))
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_run_row).transpose()
    }

    async fn list_stage_jobs(&self, run_id: Uuid) -> Result<Vec<StageJob>> {
        let rows = sqlx::query(
            "SELECT j.id, j.run_id, r.site_id, r.workflow_name, j.stage, j.status, j.attempt,
                    j.max_attempts, j.run_after, r.args, j.error
             FROM stage_job j
             JOIN workflow_run r ON r.id = j.run_id
             WHERE j.run_id = $1
             ORDER BY j.created_at ASC, j.id ASC",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_job_row).collect()
    }
}
