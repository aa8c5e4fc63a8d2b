//! Connection pool construction and migrations.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::error::{RepoError, RepoResult};

/// Embedded schema migrations.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Connect to the relational store.
///
/// `DATABASE_URL` is the only knob; pool sizing follows worker needs
/// (a handful of connections per process is plenty at task granularity).
pub async fn connect(database_url: &str) -> RepoResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(16)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Connect using `DATABASE_URL` from the environment.
pub async fn connect_from_env() -> RepoResult<PgPool> {
    let url = std::env::var("DATABASE_URL")
        .map_err(|_| RepoError::validation("DATABASE_URL not set"))?;
    connect(&url).await
}

/// Apply pending migrations.
pub async fn migrate(pool: &PgPool) -> RepoResult<()> {
    MIGRATOR.run(pool).await?;
    info!("schema migrations applied");
    Ok(())
}

/// Cheap connectivity probe for startup dependency checks.
pub async fn check_connectivity(pool: &PgPool) -> RepoResult<()> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
