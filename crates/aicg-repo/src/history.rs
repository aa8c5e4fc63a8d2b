//! Generation history and the single URL-mutation path.
//!
//! Every `*_url` write goes through [`HistoryRepo::record_result`] (or the
//! audio variant): one transaction locks the artifact row, appends the
//! displaced URL to `generation_history`, and updates the live row. The
//! invariant `history_count = rewrites` holds because no other code path
//! touches a `*_url` column.

use sqlx::{PgPool, Postgres, Transaction};
use tracing::info;
use uuid::Uuid;

use aicg_models::{GenerationHistory, ResourceType};

use crate::error::{RepoError, RepoResult};

const HISTORY_COLS: &str =
    "id, resource_type, resource_id, url, prompt, model, orphaned, created_at";

/// Typed pointer to an artifact that carries a URL column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactRef {
    pub resource_type: ResourceType,
    pub resource_id: Uuid,
}

impl ArtifactRef {
    pub fn new(resource_type: ResourceType, resource_id: Uuid) -> Self {
        Self {
            resource_type,
            resource_id,
        }
    }
}

/// Per-type column mapping. Identifiers are compile-time constants, never
/// user input, so interpolating them into SQL is safe.
fn target_columns(rt: ResourceType) -> (&'static str, &'static str, &'static str, &'static str, &'static str) {
    match rt {
        ResourceType::SceneImage => ("scenes", "id", "scene_image_url", "image_prompt", "image_status"),
        ResourceType::CharacterAvatar => {
            ("characters", "id", "avatar_url", "generated_prompt", "avatar_status")
        }
        ResourceType::ShotKeyframe => ("shots", "id", "keyframe_url", "keyframe_prompt", "keyframe_status"),
        ResourceType::TransitionVideo => ("transitions", "id", "video_url", "video_prompt", "status"),
        ResourceType::SentenceImage => {
            ("sentence_assets", "sentence_id", "image_url", "image_prompt", "image_status")
        }
        ResourceType::SentenceAudio => {
            ("sentence_assets", "sentence_id", "audio_url", "voice_prompt", "audio_status")
        }
    }
}

#[derive(Clone)]
pub struct HistoryRepo {
    pool: PgPool,
}

impl HistoryRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record a fresh generation result for an artifact.
    ///
    /// The previous URL (if any) is appended to history with the prompt
    /// that produced it; the live row takes the new URL and prompt and is
    /// marked completed.
    pub async fn record_result(
        &self,
        target: ArtifactRef,
        new_url: &str,
        prompt: Option<&str>,
        model: Option<&str>,
    ) -> RepoResult<()> {
        let mut tx = self.pool.begin().await?;
        self.displace_current(&mut tx, target, model).await?;

        let (table, id_col, url_col, prompt_col, status_col) =
            target_columns(target.resource_type);
        sqlx::query(&format!(
            "UPDATE {table}
             SET {url_col} = $2, {prompt_col} = COALESCE($3, {prompt_col}),
                 {status_col} = 'completed', error = NULL,
                 version = version + 1, updated_at = now()
             WHERE {id_col} = $1"
        ))
        .bind(target.resource_id)
        .bind(new_url)
        .bind(prompt)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(
            resource_type = target.resource_type.as_str(),
            resource_id = %target.resource_id,
            "recorded generation result"
        );
        Ok(())
    }

    /// Audio variant of [`record_result`]: also persists the measured
    /// duration, which must be authoritative at assembly time.
    pub async fn record_audio_result(
        &self,
        sentence_id: Uuid,
        new_url: &str,
        duration_ms: i64,
        prompt: Option<&str>,
        model: Option<&str>,
    ) -> RepoResult<()> {
        let target = ArtifactRef::new(ResourceType::SentenceAudio, sentence_id);
        let mut tx = self.pool.begin().await?;
        self.displace_current(&mut tx, target, model).await?;

        sqlx::query(
            "UPDATE sentence_assets
             SET audio_url = $2, duration_ms = $3,
                 voice_prompt = COALESCE($4, voice_prompt),
                 audio_status = 'completed', error = NULL,
                 version = version + 1, updated_at = now()
             WHERE sentence_id = $1",
        )
        .bind(sentence_id)
        .bind(new_url)
        .bind(duration_ms)
        .bind(prompt)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Lock the artifact row and push its current URL into history.
    async fn displace_current(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        target: ArtifactRef,
        model: Option<&str>,
    ) -> RepoResult<()> {
        let (table, id_col, url_col, prompt_col, _) = target_columns(target.resource_type);

        let current: Option<(Option<String>, Option<String>)> = sqlx::query_as(&format!(
            "SELECT {url_col}, {prompt_col} FROM {table} WHERE {id_col} = $1 FOR UPDATE"
        ))
        .bind(target.resource_id)
        .fetch_optional(&mut **tx)
        .await?;

        let Some((old_url, old_prompt)) = current else {
            return Err(RepoError::not_found(format!(
                "{} {}",
                target.resource_type.as_str(),
                target.resource_id
            )));
        };

        if let Some(old_url) = old_url {
            sqlx::query(
                "INSERT INTO generation_history (resource_type, resource_id, url, prompt, model)
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(target.resource_type)
            .bind(target.resource_id)
            .bind(old_url)
            .bind(old_prompt)
            .bind(model)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    /// Make a historical result live again.
    ///
    /// The displaced live URL becomes a new history row; selecting the
    /// entry that already matches the live URL is a no-op (identical
    /// content round-trips to an unchanged current URL).
    pub async fn select_history(&self, history_id: i64) -> RepoResult<String> {
        let mut tx = self.pool.begin().await?;

        let entry = sqlx::query_as::<_, GenerationHistory>(&format!(
            "SELECT {HISTORY_COLS} FROM generation_history WHERE id = $1"
        ))
        .bind(history_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| RepoError::not_found(format!("history entry {history_id}")))?;

        let target = ArtifactRef::new(entry.resource_type, entry.resource_id);
        let (table, id_col, url_col, prompt_col, _) = target_columns(entry.resource_type);

        let current: Option<(Option<String>, Option<String>)> = sqlx::query_as(&format!(
            "SELECT {url_col}, {prompt_col} FROM {table} WHERE {id_col} = $1 FOR UPDATE"
        ))
        .bind(entry.resource_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((current_url, current_prompt)) = current else {
            return Err(RepoError::not_found(format!(
                "{} {} (history is orphaned)",
                entry.resource_type.as_str(),
                entry.resource_id
            )));
        };

        if current_url.as_deref() == Some(entry.url.as_str()) {
            tx.rollback().await?;
            return Ok(entry.url);
        }

        if let Some(current_url) = current_url {
            sqlx::query(
                "INSERT INTO generation_history (resource_type, resource_id, url, prompt, model)
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(entry.resource_type)
            .bind(entry.resource_id)
            .bind(current_url)
            .bind(current_prompt)
            .bind(&entry.model)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(&format!(
            "UPDATE {table}
             SET {url_col} = $2, {prompt_col} = COALESCE($3, {prompt_col}),
                 version = version + 1, updated_at = now()
             WHERE {id_col} = $1"
        ))
        .bind(target.resource_id)
        .bind(&entry.url)
        .bind(&entry.prompt)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(history_id, resource_id = %entry.resource_id, "historical result selected");
        Ok(entry.url)
    }

    pub async fn list(&self, target: ArtifactRef) -> RepoResult<Vec<GenerationHistory>> {
        let rows = sqlx::query_as::<_, GenerationHistory>(&format!(
            "SELECT {HISTORY_COLS} FROM generation_history
             WHERE resource_type = $1 AND resource_id = $2
             ORDER BY id"
        ))
        .bind(target.resource_type)
        .bind(target.resource_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn count(&self, target: ArtifactRef) -> RepoResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM generation_history
             WHERE resource_type = $1 AND resource_id = $2",
        )
        .bind(target.resource_type)
        .bind(target.resource_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    pub async fn has_history(&self, target: ArtifactRef) -> RepoResult<bool> {
        Ok(self.count(target).await? > 0)
    }

    /// Flag rows whose parent artifact was deleted. Rows survive unless
    /// the user explicitly purges them.
    pub async fn mark_orphaned(&self, target: ArtifactRef) -> RepoResult<u64> {
        let result = sqlx::query(
            "UPDATE generation_history SET orphaned = true
             WHERE resource_type = $1 AND resource_id = $2",
        )
        .bind(target.resource_type)
        .bind(target.resource_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Explicit purge of an artifact's history.
    pub async fn purge(&self, target: ArtifactRef) -> RepoResult<u64> {
        let result = sqlx::query(
            "DELETE FROM generation_history
             WHERE resource_type = $1 AND resource_id = $2",
        )
        .bind(target.resource_type)
        .bind(target.resource_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
