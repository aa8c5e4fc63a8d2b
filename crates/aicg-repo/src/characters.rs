//! Character repository.

use sqlx::PgPool;
use tracing::warn;

use aicg_models::{AssetStatus, Character, CharacterId, ProjectId};

use crate::error::{RepoError, RepoResult};

const CHARACTER_COLS: &str = "id, project_id, name, visual_traits, key_visual_traits, \
     avatar_url, generated_prompt, avatar_status, error, version, created_at, updated_at";

#[derive(Clone)]
pub struct CharacterRepo {
    pool: PgPool,
}

impl CharacterRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a character; duplicate names within a project are a conflict.
    pub async fn create(&self, character: &Character) -> RepoResult<()> {
        sqlx::query(
            "INSERT INTO characters (id, project_id, name, visual_traits, key_visual_traits,
                                     avatar_url, generated_prompt, avatar_status, error,
                                     version, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(character.id)
        .bind(character.project_id)
        .bind(&character.name)
        .bind(&character.visual_traits)
        .bind(&character.key_visual_traits)
        .bind(&character.avatar_url)
        .bind(&character.generated_prompt)
        .bind(character.avatar_status)
        .bind(&character.error)
        .bind(character.version)
        .bind(character.created_at)
        .bind(character.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match RepoError::from(e) {
            RepoError::Conflict(_) => RepoError::conflict(format!(
                "character '{}' already exists in project {}",
                character.name, character.project_id
            )),
            other => other,
        })?;
        Ok(())
    }

    pub async fn get(&self, id: CharacterId) -> RepoResult<Character> {
        sqlx::query_as::<_, Character>(&format!(
            "SELECT {CHARACTER_COLS} FROM characters WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| RepoError::not_found(format!("character {id}")))
    }

    pub async fn list_by_project(&self, project_id: ProjectId) -> RepoResult<Vec<Character>> {
        let characters = sqlx::query_as::<_, Character>(&format!(
            "SELECT {CHARACTER_COLS} FROM characters WHERE project_id = $1 ORDER BY name"
        ))
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(characters)
    }

    /// Resolve shot character references exact-match, case-sensitive.
    ///
    /// Dangling names are tolerated: they are logged and simply absent
    /// from the result.
    pub async fn find_by_names(
        &self,
        project_id: ProjectId,
        names: &[String],
    ) -> RepoResult<Vec<Character>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let found = sqlx::query_as::<_, Character>(&format!(
            "SELECT {CHARACTER_COLS} FROM characters
             WHERE project_id = $1 AND name = ANY($2)
             ORDER BY name"
        ))
        .bind(project_id)
        .bind(names)
        .fetch_all(&self.pool)
        .await?;

        if found.len() < names.len() {
            let resolved: std::collections::HashSet<&str> =
                found.iter().map(|c| c.name.as_str()).collect();
            for name in names {
                if !resolved.contains(name.as_str()) {
                    warn!(project_id = %project_id, name, "dangling character reference");
                }
            }
        }
        Ok(found)
    }

    /// Persist the generated three-view prompt before avatar generation.
    pub async fn set_generated_prompt(&self, id: CharacterId, prompt: &str) -> RepoResult<()> {
        sqlx::query(
            "UPDATE characters
             SET generated_prompt = $2, version = version + 1, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(prompt)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_avatar_status(
        &self,
        id: CharacterId,
        status: AssetStatus,
        error: Option<&str>,
    ) -> RepoResult<()> {
        sqlx::query(
            "UPDATE characters
             SET avatar_status = $2, error = $3, version = version + 1, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(status)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Remove every character of a project (used by re-extraction).
    pub async fn delete_by_project(&self, project_id: ProjectId) -> RepoResult<u64> {
        let result = sqlx::query("DELETE FROM characters WHERE project_id = $1")
            .bind(project_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
