//! Script, scene and shot repositories.

use sqlx::PgPool;
use tracing::info;

use aicg_models::{
    AssetStatus, ChapterId, Scene, SceneId, Script, ScriptId, Shot, ShotId, TransitionStatus,
};

use crate::error::{RepoError, RepoResult};

const SCENE_COLS: &str = "id, script_id, idx, title, description, scene_image_url, \
     image_prompt, image_status, error, version, created_at, updated_at";
const SHOT_COLS: &str = "id, scene_id, idx, action, dialogue, character_refs, keyframe_url, \
     keyframe_prompt, keyframe_status, error, version, created_at, updated_at";

#[derive(Clone)]
pub struct ScriptRepo {
    pool: PgPool,
}

impl ScriptRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: ScriptId) -> RepoResult<Script> {
        sqlx::query_as::<_, Script>(
            "SELECT id, chapter_id, synopsis, created_at FROM scripts WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| RepoError::not_found(format!("script {id}")))
    }

    pub async fn get_by_chapter(&self, chapter_id: ChapterId) -> RepoResult<Option<Script>> {
        let script = sqlx::query_as::<_, Script>(
            "SELECT id, chapter_id, synopsis, created_at FROM scripts WHERE chapter_id = $1",
        )
        .bind(chapter_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(script)
    }

    /// Replace a chapter's script and scenes in one transaction.
    ///
    /// Scene extraction is the only writer; re-running it discards the old
    /// script (and with it shots and transitions, via cascades).
    pub async fn replace_script(
        &self,
        script: &Script,
        scenes: &[Scene],
    ) -> RepoResult<()> {
        let mut tx = self.pool.begin().await?;

        // History of the artifacts about to cascade away survives,
        // flagged orphaned.
        sqlx::query(
            "UPDATE generation_history SET orphaned = true
             WHERE (resource_type = 'scene_image' AND resource_id IN (
                        SELECT sc.id FROM scenes sc
                        JOIN scripts s ON s.id = sc.script_id
                        WHERE s.chapter_id = $1))
                OR (resource_type = 'shot_keyframe' AND resource_id IN (
                        SELECT sh.id FROM shots sh
                        JOIN scenes sc ON sc.id = sh.scene_id
                        JOIN scripts s ON s.id = sc.script_id
                        WHERE s.chapter_id = $1))
                OR (resource_type = 'transition_video' AND resource_id IN (
                        SELECT t.id FROM transitions t
                        JOIN scripts s ON s.id = t.script_id
                        WHERE s.chapter_id = $1))",
        )
        .bind(script.chapter_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM scripts WHERE chapter_id = $1")
            .bind(script.chapter_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO scripts (id, chapter_id, synopsis, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(script.id)
        .bind(script.chapter_id)
        .bind(&script.synopsis)
        .bind(script.created_at)
        .execute(&mut *tx)
        .await?;

        for scene in scenes {
            sqlx::query(
                "INSERT INTO scenes (id, script_id, idx, title, description, scene_image_url,
                                     image_prompt, image_status, error, version,
                                     created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
            )
            .bind(scene.id)
            .bind(scene.script_id)
            .bind(scene.idx)
            .bind(&scene.title)
            .bind(&scene.description)
            .bind(&scene.scene_image_url)
            .bind(&scene.image_prompt)
            .bind(scene.image_status)
            .bind(&scene.error)
            .bind(scene.version)
            .bind(scene.created_at)
            .bind(scene.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!(chapter_id = %script.chapter_id, scenes = scenes.len(), "script replaced");
        Ok(())
    }

    pub async fn get_scene(&self, id: SceneId) -> RepoResult<Scene> {
        sqlx::query_as::<_, Scene>(&format!("SELECT {SCENE_COLS} FROM scenes WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| RepoError::not_found(format!("scene {id}")))
    }

    pub async fn list_scenes(&self, script_id: ScriptId) -> RepoResult<Vec<Scene>> {
        let scenes = sqlx::query_as::<_, Scene>(&format!(
            "SELECT {SCENE_COLS} FROM scenes WHERE script_id = $1 ORDER BY idx"
        ))
        .bind(script_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(scenes)
    }

    pub async fn set_scene_image_status(
        &self,
        id: SceneId,
        status: AssetStatus,
        error: Option<&str>,
    ) -> RepoResult<()> {
        sqlx::query(
            "UPDATE scenes
             SET image_status = $2, error = $3, version = version + 1, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(status)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Replace the shots of a scene (shot extraction re-run discards).
    pub async fn replace_shots(&self, scene_id: SceneId, shots: &[Shot]) -> RepoResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE generation_history SET orphaned = true
             WHERE resource_type = 'shot_keyframe'
               AND resource_id IN (SELECT id FROM shots WHERE scene_id = $1)",
        )
        .bind(scene_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM shots WHERE scene_id = $1")
            .bind(scene_id)
            .execute(&mut *tx)
            .await?;

        for shot in shots {
            sqlx::query(
                "INSERT INTO shots (id, scene_id, idx, action, dialogue, character_refs,
                                    keyframe_url, keyframe_prompt, keyframe_status, error,
                                    version, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
            )
            .bind(shot.id)
            .bind(shot.scene_id)
            .bind(shot.idx)
            .bind(&shot.action)
            .bind(&shot.dialogue)
            .bind(&shot.character_refs)
            .bind(&shot.keyframe_url)
            .bind(&shot.keyframe_prompt)
            .bind(shot.keyframe_status)
            .bind(&shot.error)
            .bind(shot.version)
            .bind(shot.created_at)
            .bind(shot.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_shot(&self, id: ShotId) -> RepoResult<Shot> {
        sqlx::query_as::<_, Shot>(&format!("SELECT {SHOT_COLS} FROM shots WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| RepoError::not_found(format!("shot {id}")))
    }

    pub async fn list_shots_by_scene(&self, scene_id: SceneId) -> RepoResult<Vec<Shot>> {
        let shots = sqlx::query_as::<_, Shot>(&format!(
            "SELECT {SHOT_COLS} FROM shots WHERE scene_id = $1 ORDER BY idx"
        ))
        .bind(scene_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(shots)
    }

    /// All shots of a script in global order (scene order, then shot order).
    pub async fn list_shots_by_script(&self, script_id: ScriptId) -> RepoResult<Vec<Shot>> {
        let shots = sqlx::query_as::<_, Shot>(&format!(
            "SELECT s.{} FROM shots s
             JOIN scenes sc ON sc.id = s.scene_id
             WHERE sc.script_id = $1
             ORDER BY sc.idx, s.idx",
            SHOT_COLS.replace(", ", ", s.")
        ))
        .bind(script_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(shots)
    }

    pub async fn set_keyframe_prompt(&self, id: ShotId, prompt: &str) -> RepoResult<()> {
        sqlx::query(
            "UPDATE shots
             SET keyframe_prompt = $2, version = version + 1, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(prompt)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_keyframe_status(
        &self,
        id: ShotId,
        status: AssetStatus,
        error: Option<&str>,
    ) -> RepoResult<()> {
        sqlx::query(
            "UPDATE shots
             SET keyframe_status = $2, error = $3, version = version + 1, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(status)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete a shot.
    ///
    /// Forbidden while an in-flight transition references it; settled
    /// transitions touching the shot are removed with it, their history
    /// left orphaned by the history repository.
    pub async fn delete_shot(&self, id: ShotId) -> RepoResult<()> {
        let mut tx = self.pool.begin().await?;

        let in_flight: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM transitions
             WHERE (from_shot_id = $1 OR to_shot_id = $1) AND status = $2",
        )
        .bind(id)
        .bind(TransitionStatus::Processing)
        .fetch_one(&mut *tx)
        .await?;

        if in_flight > 0 {
            tx.rollback().await?;
            return Err(RepoError::conflict(format!(
                "shot {id} is referenced by {in_flight} in-flight transition(s)"
            )));
        }

        sqlx::query(
            "UPDATE generation_history SET orphaned = true
             WHERE (resource_type = 'shot_keyframe' AND resource_id = $1)
                OR (resource_type = 'transition_video' AND resource_id IN (
                        SELECT id FROM transitions
                        WHERE from_shot_id = $1 OR to_shot_id = $1))",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM transitions WHERE from_shot_id = $1 OR to_shot_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM shots WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(RepoError::not_found(format!("shot {id}")));
        }

        tx.commit().await?;
        Ok(())
    }
}
