//! API key repository.

use sqlx::PgPool;

use aicg_models::{ApiKey, ApiKeyId, ApiKeyStatus};

use crate::error::{RepoError, RepoResult};

const API_KEY_COLS: &str = "id, user_id, provider, name, secret, base_url, status, created_at";

#[derive(Clone)]
pub struct ApiKeyRepo {
    pool: PgPool,
}

impl ApiKeyRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, key: &ApiKey) -> RepoResult<()> {
        sqlx::query(
            "INSERT INTO api_keys (id, user_id, provider, name, secret, base_url, status,
                                   created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(key.id)
        .bind(&key.user_id)
        .bind(&key.provider)
        .bind(&key.name)
        .bind(&key.secret)
        .bind(&key.base_url)
        .bind(key.status)
        .bind(key.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: ApiKeyId) -> RepoResult<ApiKey> {
        sqlx::query_as::<_, ApiKey>(&format!("SELECT {API_KEY_COLS} FROM api_keys WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| RepoError::not_found(format!("api key {id}")))
    }

    pub async fn list_by_user(&self, user_id: &str) -> RepoResult<Vec<ApiKey>> {
        let keys = sqlx::query_as::<_, ApiKey>(&format!(
            "SELECT {API_KEY_COLS} FROM api_keys WHERE user_id = $1 ORDER BY created_at"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(keys)
    }

    /// First active key of a user for a provider, if any.
    pub async fn find_active(&self, user_id: &str, provider: &str) -> RepoResult<Option<ApiKey>> {
        let key = sqlx::query_as::<_, ApiKey>(&format!(
            "SELECT {API_KEY_COLS} FROM api_keys
             WHERE user_id = $1 AND provider = $2 AND status = $3
             ORDER BY created_at
             LIMIT 1"
        ))
        .bind(user_id)
        .bind(provider)
        .bind(ApiKeyStatus::Active)
        .fetch_optional(&self.pool)
        .await?;
        Ok(key)
    }

    pub async fn set_status(&self, id: ApiKeyId, status: ApiKeyStatus) -> RepoResult<()> {
        let result = sqlx::query("UPDATE api_keys SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RepoError::not_found(format!("api key {id}")));
        }
        Ok(())
    }

    pub async fn delete(&self, id: ApiKeyId) -> RepoResult<()> {
        let result = sqlx::query("DELETE FROM api_keys WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RepoError::not_found(format!("api key {id}")));
        }
        Ok(())
    }
}
