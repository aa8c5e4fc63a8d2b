//! Transition repository.
//!
//! Workers and the sweeper race on these rows; every mutation goes through
//! a `FOR UPDATE` lock so updates serialize per transition.

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use tracing::info;

use aicg_models::{ScriptId, Transition, TransitionId, TransitionStatus};

use crate::error::{RepoError, RepoResult};

const TRANSITION_COLS: &str = "id, script_id, from_shot_id, to_shot_id, idx, video_prompt, \
     video_url, status, external_task_id, error, poll_count, last_polled_at, next_poll_at, \
     version, created_at, updated_at";

/// Sweeper poll interval bounds (per-transition exponential).
const POLL_BASE_SECS: i64 = 5;
const POLL_CAP_SECS: i64 = 60;

#[derive(Clone)]
pub struct TransitionRepo {
    pool: PgPool,
}

impl TransitionRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a transition; the `(from, to)` pair is unique.
    pub async fn create(&self, transition: &Transition) -> RepoResult<()> {
        sqlx::query(
            "INSERT INTO transitions (id, script_id, from_shot_id, to_shot_id, idx,
                                      video_prompt, video_url, status, external_task_id, error,
                                      poll_count, last_polled_at, next_poll_at, version,
                                      created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
        )
        .bind(transition.id)
        .bind(transition.script_id)
        .bind(transition.from_shot_id)
        .bind(transition.to_shot_id)
        .bind(transition.idx)
        .bind(&transition.video_prompt)
        .bind(&transition.video_url)
        .bind(transition.status)
        .bind(&transition.external_task_id)
        .bind(&transition.error)
        .bind(transition.poll_count)
        .bind(transition.last_polled_at)
        .bind(transition.next_poll_at)
        .bind(transition.version)
        .bind(transition.created_at)
        .bind(transition.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: TransitionId) -> RepoResult<Transition> {
        sqlx::query_as::<_, Transition>(&format!(
            "SELECT {TRANSITION_COLS} FROM transitions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| RepoError::not_found(format!("transition {id}")))
    }

    pub async fn find_by_pair(
        &self,
        script_id: ScriptId,
        from_shot: aicg_models::ShotId,
        to_shot: aicg_models::ShotId,
    ) -> RepoResult<Option<Transition>> {
        let transition = sqlx::query_as::<_, Transition>(&format!(
            "SELECT {TRANSITION_COLS} FROM transitions
             WHERE script_id = $1 AND from_shot_id = $2 AND to_shot_id = $3"
        ))
        .bind(script_id)
        .bind(from_shot)
        .bind(to_shot)
        .fetch_optional(&self.pool)
        .await?;
        Ok(transition)
    }

    pub async fn list_by_script(&self, script_id: ScriptId) -> RepoResult<Vec<Transition>> {
        let transitions = sqlx::query_as::<_, Transition>(&format!(
            "SELECT {TRANSITION_COLS} FROM transitions WHERE script_id = $1 ORDER BY idx"
        ))
        .bind(script_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(transitions)
    }

    pub async fn set_video_prompt(&self, id: TransitionId, prompt: &str) -> RepoResult<()> {
        sqlx::query(
            "UPDATE transitions
             SET video_prompt = $2, version = version + 1, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(prompt)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a successful provider submission.
    ///
    /// The transition moves to `processing` and becomes the sweeper's
    /// responsibility; the first poll is due after the base interval.
    pub async fn mark_submitted(&self, id: TransitionId, external_task_id: &str) -> RepoResult<()> {
        let next_poll = Utc::now() + Duration::seconds(POLL_BASE_SECS);
        let result = sqlx::query(
            "UPDATE transitions
             SET status = $2, external_task_id = $3, error = NULL, poll_count = 0,
                 next_poll_at = $4, version = version + 1, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(TransitionStatus::Processing)
        .bind(external_task_id)
        .bind(next_poll)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(RepoError::not_found(format!("transition {id}")));
        }
        info!(transition_id = %id, external_task_id, "transition video submitted");
        Ok(())
    }

    /// Transitions the sweeper should poll now.
    pub async fn list_pollable(&self, now: DateTime<Utc>, limit: i64) -> RepoResult<Vec<Transition>> {
        let transitions = sqlx::query_as::<_, Transition>(&format!(
            "SELECT {TRANSITION_COLS} FROM transitions
             WHERE status = $1 AND external_task_id IS NOT NULL
               AND (next_poll_at IS NULL OR next_poll_at <= $2)
             ORDER BY next_poll_at NULLS FIRST
             LIMIT $3"
        ))
        .bind(TransitionStatus::Processing)
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(transitions)
    }

    /// Record a non-terminal poll and push the next one out exponentially
    /// (5 s base, 60 s cap).
    pub async fn record_poll(&self, id: TransitionId) -> RepoResult<()> {
        let mut tx = self.pool.begin().await?;

        let poll_count: i32 = sqlx::query_scalar(
            "SELECT poll_count FROM transitions WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| RepoError::not_found(format!("transition {id}")))?;

        let delay = poll_backoff_secs(poll_count as u32);
        sqlx::query(
            "UPDATE transitions
             SET poll_count = poll_count + 1, last_polled_at = now(),
                 next_poll_at = now() + make_interval(secs => $2),
                 version = version + 1, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(delay as f64)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Mark the transition failed with a normalized error message.
    pub async fn fail(&self, id: TransitionId, error: &str) -> RepoResult<()> {
        sqlx::query(
            "UPDATE transitions
             SET status = $2, error = $3, version = version + 1, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(TransitionStatus::Failed)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Transitions of a script that are not yet completed, as assembly gap
    /// descriptions.
    pub async fn incomplete_for_script(&self, script_id: ScriptId) -> RepoResult<Vec<String>> {
        let rows: Vec<(i32, TransitionStatus)> = sqlx::query_as(
            "SELECT idx, status FROM transitions
             WHERE script_id = $1 AND (status != $2 OR video_url IS NULL)
             ORDER BY idx",
        )
        .bind(script_id)
        .bind(TransitionStatus::Completed)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(idx, status)| format!("transition_{idx}.video ({})", status.as_str()))
            .collect())
    }
}

/// Exponential poll backoff: 5, 10, 20, 40, 60, 60, ...
fn poll_backoff_secs(poll_count: u32) -> i64 {
    let exp = POLL_BASE_SECS.saturating_mul(1i64 << poll_count.min(10));
    exp.min(POLL_CAP_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_backoff_is_exponential_with_cap() {
        assert_eq!(poll_backoff_secs(0), 5);
        assert_eq!(poll_backoff_secs(1), 10);
        assert_eq!(poll_backoff_secs(2), 20);
        assert_eq!(poll_backoff_secs(3), 40);
        assert_eq!(poll_backoff_secs(4), 60);
        assert_eq!(poll_backoff_secs(30), 60);
    }
}
