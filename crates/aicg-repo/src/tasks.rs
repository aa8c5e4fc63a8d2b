//! Task repository.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use aicg_models::{JobId, Stage, Task, TaskId, TaskState};

use crate::error::{RepoError, RepoResult};

const TASK_COLS: &str = "id, job_id, chapter_id, stage, kind, payload, state, retries, weight, \
     dedup_key, not_before, result, error, error_code, created_at, updated_at, \
     started_at, finished_at";

/// Terminal-state tallies for one stage of one job.
#[derive(Debug, Clone, Copy, Default, sqlx::FromRow)]
pub struct StageCounts {
    pub total: i64,
    pub success: i64,
    pub failed: i64,
    pub skipped: i64,
    pub cancelled: i64,
    pub open: i64,
}

impl StageCounts {
    pub fn settled(&self) -> bool {
        self.open == 0
    }

    pub fn satisfied(&self) -> i64 {
        self.success + self.skipped
    }

    /// Some sub-tasks failed while siblings succeeded.
    pub fn is_partial(&self) -> bool {
        self.failed > 0 && self.satisfied() > 0
    }
}

#[derive(Clone)]
pub struct TaskRepo {
    pool: PgPool,
}

impl TaskRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a task unless the same payload identity already exists for
    /// the job. Returns whether a row was written.
    pub async fn insert(&self, task: &Task) -> RepoResult<bool> {
        let result = sqlx::query(
            "INSERT INTO tasks (id, job_id, chapter_id, stage, kind, payload, state, retries,
                                weight, dedup_key, not_before, result, error, error_code,
                                created_at, updated_at, started_at, finished_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                     $17, $18)
             ON CONFLICT (job_id, dedup_key) DO NOTHING",
        )
        .bind(task.id)
        .bind(task.job_id)
        .bind(task.chapter_id)
        .bind(task.stage)
        .bind(task.kind)
        .bind(&task.payload)
        .bind(task.state)
        .bind(task.retries)
        .bind(task.weight)
        .bind(&task.dedup_key)
        .bind(task.not_before)
        .bind(&task.result)
        .bind(&task.error)
        .bind(&task.error_code)
        .bind(task.created_at)
        .bind(task.updated_at)
        .bind(task.started_at)
        .bind(task.finished_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get(&self, id: TaskId) -> RepoResult<Task> {
        sqlx::query_as::<_, Task>(&format!("SELECT {TASK_COLS} FROM tasks WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| RepoError::not_found(format!("task {id}")))
    }

    /// Claim a pending task for execution.
    ///
    /// Returns `false` when the task is not claimable — already running,
    /// terminal, or still under a backoff gate — which reconciles
    /// at-least-once stream redelivery against the durable state.
    pub async fn mark_running(&self, id: TaskId) -> RepoResult<bool> {
        let result = sqlx::query(
            "UPDATE tasks
             SET state = $2, started_at = COALESCE(started_at, now()), updated_at = now()
             WHERE id = $1 AND state = $3
               AND (not_before IS NULL OR not_before <= now())",
        )
        .bind(id)
        .bind(TaskState::Running)
        .bind(TaskState::Pending)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record a terminal outcome.
    pub async fn finish(
        &self,
        id: TaskId,
        state: TaskState,
        result: Option<&str>,
        error_code: Option<&str>,
        error: Option<&str>,
    ) -> RepoResult<()> {
        if !state.is_terminal() {
            return Err(RepoError::validation(format!(
                "finish called with non-terminal state {}",
                state.as_str()
            )));
        }
        sqlx::query(
            "UPDATE tasks
             SET state = $2, result = $3, error_code = $4, error = $5,
                 finished_at = now(), updated_at = now()
             WHERE id = $1 AND state IN ('pending', 'running')",
        )
        .bind(id)
        .bind(state)
        .bind(result)
        .bind(error_code)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Put a failed attempt back in the queue after a backoff window.
    pub async fn reschedule(
        &self,
        id: TaskId,
        not_before: DateTime<Utc>,
        error: &str,
    ) -> RepoResult<i32> {
        let retries: i32 = sqlx::query_scalar(
            "UPDATE tasks
             SET state = $2, retries = retries + 1, not_before = $3, error = $4,
                 updated_at = now()
             WHERE id = $1
             RETURNING retries",
        )
        .bind(id)
        .bind(TaskState::Pending)
        .bind(not_before)
        .bind(error)
        .fetch_one(&self.pool)
        .await?;
        Ok(retries)
    }

    pub async fn list_by_job(&self, job_id: JobId) -> RepoResult<Vec<Task>> {
        let tasks = sqlx::query_as::<_, Task>(&format!(
            "SELECT {TASK_COLS} FROM tasks WHERE job_id = $1 ORDER BY created_at"
        ))
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(tasks)
    }

    pub async fn list_by_job_and_stage(
        &self,
        job_id: JobId,
        stage: Stage,
    ) -> RepoResult<Vec<Task>> {
        let tasks = sqlx::query_as::<_, Task>(&format!(
            "SELECT {TASK_COLS} FROM tasks WHERE job_id = $1 AND stage = $2 ORDER BY created_at"
        ))
        .bind(job_id)
        .bind(stage)
        .fetch_all(&self.pool)
        .await?;
        Ok(tasks)
    }

    /// Aggregate terminal-state counts for a stage of a job.
    pub async fn stage_counts(&self, job_id: JobId, stage: Stage) -> RepoResult<StageCounts> {
        let counts = sqlx::query_as::<_, StageCounts>(
            "SELECT count(*) AS total,
                    count(*) FILTER (WHERE state = 'success')   AS success,
                    count(*) FILTER (WHERE state = 'failed')    AS failed,
                    count(*) FILTER (WHERE state = 'skipped')   AS skipped,
                    count(*) FILTER (WHERE state = 'cancelled') AS cancelled,
                    count(*) FILTER (WHERE state IN ('pending', 'running')) AS open
             FROM tasks WHERE job_id = $1 AND stage = $2",
        )
        .bind(job_id)
        .bind(stage)
        .fetch_one(&self.pool)
        .await?;
        Ok(counts)
    }

    /// Whether any tasks have been materialized for a stage of a job.
    pub async fn stage_materialized(&self, job_id: JobId, stage: Stage) -> RepoResult<bool> {
        let count: i64 =
            sqlx::query_scalar("SELECT count(*) FROM tasks WHERE job_id = $1 AND stage = $2")
                .bind(job_id)
                .bind(stage)
                .fetch_one(&self.pool)
                .await?;
        Ok(count > 0)
    }

    /// Number of non-terminal tasks across the whole job.
    pub async fn open_count(&self, job_id: JobId) -> RepoResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM tasks
             WHERE job_id = $1 AND state IN ('pending', 'running')",
        )
        .bind(job_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Cancel every task of a job that has not started running.
    ///
    /// Running tasks terminate themselves at their next suspension point.
    pub async fn cancel_open_tasks(&self, job_id: JobId) -> RepoResult<u64> {
        let result = sqlx::query(
            "UPDATE tasks
             SET state = $2, finished_at = now(), updated_at = now()
             WHERE job_id = $1 AND state = $3",
        )
        .bind(job_id)
        .bind(TaskState::Cancelled)
        .bind(TaskState::Pending)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_counts_partial_detection() {
        let counts = StageCounts {
            total: 3,
            success: 2,
            failed: 1,
            skipped: 0,
            cancelled: 0,
            open: 0,
        };
        assert!(counts.settled());
        assert!(counts.is_partial());
        assert_eq!(counts.satisfied(), 2);

        let all_failed = StageCounts {
            total: 2,
            failed: 2,
            ..Default::default()
        };
        assert!(!all_failed.is_partial());
    }
}
