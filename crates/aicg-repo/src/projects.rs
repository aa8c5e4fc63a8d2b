//! Project and chapter repositories.

use sqlx::PgPool;
use tracing::info;

use aicg_models::{Chapter, ChapterId, PipelineStatus, Project, ProjectId};

use crate::error::{RepoError, RepoResult};

const PROJECT_COLS: &str = "id, owner_id, name, kind, created_at, updated_at";
const CHAPTER_COLS: &str =
    "id, project_id, idx, title, content, pipeline_status, version, created_at, updated_at";

/// Repository for project rows.
#[derive(Clone)]
pub struct ProjectRepo {
    pool: PgPool,
}

impl ProjectRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, project: &Project) -> RepoResult<()> {
        sqlx::query(
            "INSERT INTO projects (id, owner_id, name, kind, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(project.id)
        .bind(&project.owner_id)
        .bind(&project.name)
        .bind(project.kind)
        .bind(project.created_at)
        .bind(project.updated_at)
        .execute(&self.pool)
        .await?;
        info!(project_id = %project.id, "created project");
        Ok(())
    }

    pub async fn get(&self, id: ProjectId) -> RepoResult<Project> {
        let project = sqlx::query_as::<_, Project>(&format!(
            "SELECT {PROJECT_COLS} FROM projects WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| RepoError::not_found(format!("project {id}")))?;
        Ok(project)
    }

    /// Resolve the owning project of a chapter.
    pub async fn get_for_chapter(&self, chapter_id: ChapterId) -> RepoResult<Project> {
        let project = sqlx::query_as::<_, Project>(&format!(
            "SELECT p.{} FROM projects p
             JOIN chapters c ON c.project_id = p.id
             WHERE c.id = $1",
            PROJECT_COLS.replace(", ", ", p.")
        ))
        .bind(chapter_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| RepoError::not_found(format!("project for chapter {chapter_id}")))?;
        Ok(project)
    }

    /// Delete a project and, via cascades, everything it owns.
    pub async fn delete(&self, id: ProjectId) -> RepoResult<()> {
        let result = sqlx::query("DELETE FROM projects WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RepoError::not_found(format!("project {id}")));
        }
        Ok(())
    }
}

/// Repository for chapter rows.
#[derive(Clone)]
pub struct ChapterRepo {
    pool: PgPool,
}

impl ChapterRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, chapter: &Chapter) -> RepoResult<()> {
        sqlx::query(
            "INSERT INTO chapters (id, project_id, idx, title, content, pipeline_status,
                                   version, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(chapter.id)
        .bind(chapter.project_id)
        .bind(chapter.idx)
        .bind(&chapter.title)
        .bind(&chapter.content)
        .bind(chapter.pipeline_status)
        .bind(chapter.version)
        .bind(chapter.created_at)
        .bind(chapter.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: ChapterId) -> RepoResult<Chapter> {
        let chapter = sqlx::query_as::<_, Chapter>(&format!(
            "SELECT {CHAPTER_COLS} FROM chapters WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| RepoError::not_found(format!("chapter {id}")))?;
        Ok(chapter)
    }

    pub async fn list_by_project(&self, project_id: ProjectId) -> RepoResult<Vec<Chapter>> {
        let chapters = sqlx::query_as::<_, Chapter>(&format!(
            "SELECT {CHAPTER_COLS} FROM chapters WHERE project_id = $1 ORDER BY idx"
        ))
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(chapters)
    }

    /// Advance the pipeline status along the monotonic progression.
    ///
    /// The row is locked for the check so two observers racing on the same
    /// stage boundary cannot double-apply; a non-forward transition is a
    /// no-op rather than an error (the other observer won).
    pub async fn advance_status(
        &self,
        id: ChapterId,
        next: PipelineStatus,
    ) -> RepoResult<bool> {
        let mut tx = self.pool.begin().await?;

        let current: PipelineStatus =
            sqlx::query_scalar("SELECT pipeline_status FROM chapters WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| RepoError::not_found(format!("chapter {id}")))?;

        if !current.can_advance_to(next) {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            "UPDATE chapters
             SET pipeline_status = $2, version = version + 1, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(next)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(chapter_id = %id, status = %next, "chapter pipeline status advanced");
        Ok(true)
    }

    /// Admin-only backward reset; the one path around monotonicity.
    pub async fn admin_reset_status(
        &self,
        id: ChapterId,
        status: PipelineStatus,
    ) -> RepoResult<()> {
        let result = sqlx::query(
            "UPDATE chapters
             SET pipeline_status = $2, version = version + 1, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(status)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(RepoError::not_found(format!("chapter {id}")));
        }
        info!(chapter_id = %id, status = %status, "chapter pipeline status reset by admin");
        Ok(())
    }

    /// Delete a chapter and, via cascades, its downstream artifacts.
    /// Their generation history survives, flagged orphaned.
    pub async fn delete(&self, id: ChapterId) -> RepoResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE generation_history SET orphaned = true
             WHERE (resource_type = 'scene_image' AND resource_id IN (
                        SELECT sc.id FROM scenes sc
                        JOIN scripts s ON s.id = sc.script_id WHERE s.chapter_id = $1))
                OR (resource_type = 'shot_keyframe' AND resource_id IN (
                        SELECT sh.id FROM shots sh
                        JOIN scenes sc ON sc.id = sh.scene_id
                        JOIN scripts s ON s.id = sc.script_id WHERE s.chapter_id = $1))
                OR (resource_type = 'transition_video' AND resource_id IN (
                        SELECT t.id FROM transitions t
                        JOIN scripts s ON s.id = t.script_id WHERE s.chapter_id = $1))
                OR (resource_type IN ('sentence_image', 'sentence_audio')
                    AND resource_id IN (
                        SELECT id FROM sentences WHERE chapter_id = $1))",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query("DELETE FROM chapters WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(RepoError::not_found(format!("chapter {id}")));
        }
        tx.commit().await?;
        Ok(())
    }
}
