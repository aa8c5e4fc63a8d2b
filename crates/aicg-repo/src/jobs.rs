//! Job repository.

use chrono::Utc;
use sqlx::PgPool;
use tracing::info;

use aicg_models::{ChapterId, Job, JobId, JobState};

use crate::error::{RepoError, RepoResult};

const JOB_COLS: &str = "id, chapter_id, target_stage, state, progress, total, success, failed, \
     skipped, weight_total, weight_done, continue_on_partial, cancel_requested, \
     materialized_stages, task_timeout_secs, models, result_ref, error, error_code, \
     created_at, updated_at, started_at, finished_at";

#[derive(Clone)]
pub struct JobRepo {
    pool: PgPool,
}

impl JobRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, job: &Job) -> RepoResult<()> {
        sqlx::query(
            "INSERT INTO jobs (id, chapter_id, target_stage, state, progress, total, success,
                               failed, skipped, weight_total, weight_done, continue_on_partial,
                               cancel_requested, materialized_stages, task_timeout_secs, models,
                               result_ref, error, error_code, created_at, updated_at,
                               started_at, finished_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                     $17, $18, $19, $20, $21, $22, $23)",
        )
        .bind(job.id)
        .bind(job.chapter_id)
        .bind(job.target_stage)
        .bind(job.state)
        .bind(job.progress)
        .bind(job.statistics.total)
        .bind(job.statistics.success)
        .bind(job.statistics.failed)
        .bind(job.statistics.skipped)
        .bind(job.weight_total)
        .bind(job.weight_done)
        .bind(job.continue_on_partial)
        .bind(job.cancel_requested)
        .bind(&job.materialized_stages)
        .bind(job.task_timeout_secs)
        .bind(&job.models)
        .bind(&job.result_ref)
        .bind(&job.error)
        .bind(&job.error_code)
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(job.started_at)
        .bind(job.finished_at)
        .execute(&self.pool)
        .await?;
        info!(job_id = %job.id, chapter_id = %job.chapter_id, target = %job.target_stage, "created job");
        Ok(())
    }

    pub async fn get(&self, id: JobId) -> RepoResult<Job> {
        sqlx::query_as::<_, Job>(&format!("SELECT {JOB_COLS} FROM jobs WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| RepoError::not_found(format!("job {id}")))
    }

    pub async fn list_by_chapter(&self, chapter_id: ChapterId) -> RepoResult<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>(&format!(
            "SELECT {JOB_COLS} FROM jobs WHERE chapter_id = $1 ORDER BY created_at DESC"
        ))
        .bind(chapter_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }

    pub async fn mark_running(&self, id: JobId) -> RepoResult<()> {
        sqlx::query(
            "UPDATE jobs SET state = $2, started_at = COALESCE(started_at, now()),
                             updated_at = now()
             WHERE id = $1 AND state = $3",
        )
        .bind(id)
        .bind(JobState::Running)
        .bind(JobState::Pending)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Account freshly materialized tasks (including pre-satisfied skips).
    pub async fn add_materialized(
        &self,
        id: JobId,
        added_total: i32,
        added_skipped: i32,
        added_weight_total: i64,
        added_weight_done: i64,
    ) -> RepoResult<()> {
        sqlx::query(
            "UPDATE jobs
             SET total = total + $2,
                 skipped = skipped + $3,
                 weight_total = weight_total + $4,
                 weight_done = weight_done + $5,
                 progress = GREATEST(progress, LEAST(1.0, COALESCE(
                     (weight_done + $5)::real / NULLIF(weight_total + $4, 0)::real, 0.0))),
                 updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(added_total)
        .bind(added_skipped)
        .bind(added_weight_total)
        .bind(added_weight_done)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Roll one terminal task outcome into the job counters.
    ///
    /// Progress only ever moves forward (`GREATEST` guard), satisfying the
    /// monotonicity contract even when counters race.
    pub async fn record_task_outcome(
        &self,
        id: JobId,
        success: bool,
        weight: i32,
    ) -> RepoResult<()> {
        if success {
            sqlx::query(
                "UPDATE jobs
                 SET success = success + 1,
                     weight_done = weight_done + $2,
                     progress = GREATEST(progress, LEAST(1.0, COALESCE(
                         (weight_done + $2)::real / NULLIF(weight_total, 0)::real, 0.0))),
                     updated_at = now()
                 WHERE id = $1",
            )
            .bind(id)
            .bind(weight as i64)
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query(
                "UPDATE jobs SET failed = failed + 1, updated_at = now() WHERE id = $1",
            )
            .bind(id)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// Record that a stage's fan-out has been materialized.
    pub async fn mark_stage_materialized(&self, id: JobId, stage: &str) -> RepoResult<()> {
        sqlx::query(
            "UPDATE jobs
             SET materialized_stages = array_append(materialized_stages, $2),
                 updated_at = now()
             WHERE id = $1 AND NOT ($2 = ANY(materialized_stages))",
        )
        .bind(id)
        .bind(stage)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn request_cancel(&self, id: JobId) -> RepoResult<()> {
        let result = sqlx::query(
            "UPDATE jobs SET cancel_requested = true, updated_at = now()
             WHERE id = $1 AND state IN ($2, $3)",
        )
        .bind(id)
        .bind(JobState::Pending)
        .bind(JobState::Running)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(RepoError::conflict(format!(
                "job {id} is not cancellable (missing or terminal)"
            )));
        }
        info!(job_id = %id, "job cancellation requested");
        Ok(())
    }

    pub async fn is_cancel_requested(&self, id: JobId) -> RepoResult<bool> {
        let flag: Option<bool> =
            sqlx::query_scalar("SELECT cancel_requested FROM jobs WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(flag.unwrap_or(false))
    }

    /// Finish a job. Success pins progress at 1.0.
    pub async fn finish(
        &self,
        id: JobId,
        state: JobState,
        error_code: Option<&str>,
        error: Option<&str>,
    ) -> RepoResult<()> {
        sqlx::query(
            "UPDATE jobs
             SET state = $2,
                 progress = CASE WHEN $2 = 'success' THEN 1.0 ELSE progress END,
                 error_code = $3, error = $4,
                 finished_at = now(), updated_at = now()
             WHERE id = $1 AND state IN ('pending', 'running')",
        )
        .bind(id)
        .bind(state)
        .bind(error_code)
        .bind(error)
        .execute(&self.pool)
        .await?;
        info!(job_id = %id, state = %state, "job finished");
        Ok(())
    }

    pub async fn set_result_ref(&self, id: JobId, result_ref: &str) -> RepoResult<()> {
        sqlx::query("UPDATE jobs SET result_ref = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(result_ref)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// TTL sweep of terminal jobs (tasks cascade).
    ///
    /// Success/cancelled jobs are retained 14 days, failures 90.
    pub async fn sweep_expired(&self) -> RepoResult<u64> {
        let now = Utc::now();
        let result = sqlx::query(
            "DELETE FROM jobs
             WHERE finished_at IS NOT NULL
               AND ((state IN ('success', 'cancelled') AND finished_at < $1)
                 OR (state = 'failed' AND finished_at < $2))",
        )
        .bind(now - chrono::Duration::days(14))
        .bind(now - chrono::Duration::days(90))
        .execute(&self.pool)
        .await?;
        if result.rows_affected() > 0 {
            info!(count = result.rows_affected(), "swept expired jobs");
        }
        Ok(result.rows_affected())
    }
}
