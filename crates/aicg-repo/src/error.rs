//! Repository error types.

use thiserror::Error;

use aicg_models::TaskError;

pub type RepoResult<T> = Result<T, RepoError>;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("database error: {0}")]
    Sqlx(sqlx::Error),
}

impl RepoError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn conflict(what: impl Into<String>) -> Self {
        Self::Conflict(what.into())
    }

    pub fn validation(what: impl Into<String>) -> Self {
        Self::Validation(what.into())
    }
}

impl From<sqlx::Error> for RepoError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => RepoError::NotFound("row not found".to_string()),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                RepoError::Conflict(db.message().to_string())
            }
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                RepoError::Conflict(db.message().to_string())
            }
            _ => RepoError::Sqlx(err),
        }
    }
}

impl From<RepoError> for TaskError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::NotFound(msg) => TaskError::not_found(msg),
            RepoError::Conflict(msg) => TaskError::conflict(msg),
            RepoError::Validation(msg) => TaskError::validation(msg),
            // Database trouble is transient from the pipeline's point of
            // view: workers retry on the base schedule.
            other => TaskError::provider(other.to_string()),
        }
    }
}
