//! Schema for the generated-spec table. Every statement is idempotent.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Connect, apply the schema, and close.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Apply the schema on an existing pool.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS generated_specs (
            id TEXT PRIMARY KEY,
            share_id TEXT NOT NULL UNIQUE,
            repo_key TEXT NOT NULL,
            repo_owner TEXT NOT NULL,
            repo_name TEXT NOT NULL,
            repo_url TEXT NOT NULL,
            commit_sha TEXT,
            analysis_version TEXT NOT NULL,
            generated_at INTEGER NOT NULL,
            spec_markdown TEXT NOT NULL,
            sections_json TEXT NOT NULL DEFAULT '{}',
            user_id TEXT,
            is_public INTEGER NOT NULL DEFAULT 1,
            view_count INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Cache lookups: newest spec per repository.
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_specs_repo_created ON generated_specs(repo_key, created_at DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_specs_user_created ON generated_specs(user_id, created_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
