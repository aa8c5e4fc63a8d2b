//! Video task repository.

use sqlx::PgPool;
use tracing::info;

use aicg_models::{ChapterId, VideoTask, VideoTaskId, VideoTaskStatus};

use crate::error::{RepoError, RepoResult};

const VIDEO_TASK_COLS: &str = "id, chapter_id, job_id, width, height, fps, bgm_ref, bgm_volume, \
     status, progress, current_index, total_count, video_url, error, version, \
     created_at, updated_at";

#[derive(Clone)]
pub struct VideoTaskRepo {
    pool: PgPool,
}

impl VideoTaskRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, task: &VideoTask) -> RepoResult<()> {
        sqlx::query(
            "INSERT INTO video_tasks (id, chapter_id, job_id, width, height, fps, bgm_ref,
                                      bgm_volume, status, progress, current_index, total_count,
                                      video_url, error, version, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)",
        )
        .bind(task.id)
        .bind(task.chapter_id)
        .bind(task.job_id)
        .bind(task.width)
        .bind(task.height)
        .bind(task.fps)
        .bind(&task.bgm_ref)
        .bind(task.bgm_volume)
        .bind(task.status)
        .bind(task.progress)
        .bind(task.current_index)
        .bind(task.total_count)
        .bind(&task.video_url)
        .bind(&task.error)
        .bind(task.version)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: VideoTaskId) -> RepoResult<VideoTask> {
        sqlx::query_as::<_, VideoTask>(&format!(
            "SELECT {VIDEO_TASK_COLS} FROM video_tasks WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| RepoError::not_found(format!("video task {id}")))
    }

    pub async fn latest_by_chapter(&self, chapter_id: ChapterId) -> RepoResult<Option<VideoTask>> {
        let task = sqlx::query_as::<_, VideoTask>(&format!(
            "SELECT {VIDEO_TASK_COLS} FROM video_tasks
             WHERE chapter_id = $1 ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(chapter_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(task)
    }

    /// Advance the assembly step and counters.
    pub async fn update_step(
        &self,
        id: VideoTaskId,
        status: VideoTaskStatus,
        current_index: i32,
        total_count: i32,
        progress: f32,
    ) -> RepoResult<()> {
        sqlx::query(
            "UPDATE video_tasks
             SET status = $2, current_index = $3, total_count = $4,
                 progress = GREATEST(progress, $5),
                 version = version + 1, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(status)
        .bind(current_index)
        .bind(total_count)
        .bind(progress.clamp(0.0, 1.0))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn complete(&self, id: VideoTaskId, video_url: &str) -> RepoResult<()> {
        sqlx::query(
            "UPDATE video_tasks
             SET status = $2, video_url = $3, progress = 1.0, error = NULL,
                 version = version + 1, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(VideoTaskStatus::Completed)
        .bind(video_url)
        .execute(&self.pool)
        .await?;
        info!(video_task_id = %id, "video task completed");
        Ok(())
    }

    pub async fn fail(&self, id: VideoTaskId, error: &str) -> RepoResult<()> {
        sqlx::query(
            "UPDATE video_tasks
             SET status = $2, error = $3, version = version + 1, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(VideoTaskStatus::Failed)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
