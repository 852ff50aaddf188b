//! SQLite-backed [`SpecStore`] implementation.
//!
//! One row per stored spec in `generated_specs`. Timestamps are stored as
//! milliseconds since the Unix epoch; the section map is stored as JSON.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;

use repospec_core::models::{PopularRepo, SpecMetadata, StoredSpec};
use repospec_core::store::{InsertOutcome, SpecStore};

const SELECT_COLUMNS: &str = "id, share_id, repo_owner, repo_name, repo_url, commit_sha, \
     analysis_version, generated_at, spec_markdown, sections_json, user_id, is_public, \
     view_count, created_at";

pub struct SqliteSpecStore {
    pool: SqlitePool,
}

impl SqliteSpecStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn row_to_spec(row: &SqliteRow) -> Result<StoredSpec> {
    let sections_json: String = row.get("sections_json");
    let sections: BTreeMap<String, String> =
        serde_json::from_str(&sections_json).context("corrupt sections_json column")?;

    Ok(StoredSpec {
        id: row.get("id"),
        share_id: row.get("share_id"),
        markdown: row.get("spec_markdown"),
        sections,
        metadata: SpecMetadata {
            repo_owner: row.get("repo_owner"),
            repo_name: row.get("repo_name"),
            repo_url: row.get("repo_url"),
            generated_at: from_millis(row.get("generated_at")),
            analysis_version: row.get("analysis_version"),
            commit_sha: row.get("commit_sha"),
        },
        view_count: row.get("view_count"),
        is_public: row.get::<i64, _>("is_public") != 0,
        user_id: row.get("user_id"),
        created_at: from_millis(row.get("created_at")),
    })
}

#[async_trait]
impl SpecStore for SqliteSpecStore {
    async fn insert(&self, spec: &StoredSpec) -> Result<InsertOutcome> {
        let sections_json = serde_json::to_string(&spec.sections)?;
        let result = sqlx::query(
            r#"
            INSERT INTO generated_specs (id, share_id, repo_key, repo_owner, repo_name,
                                         repo_url, commit_sha, analysis_version, generated_at,
                                         spec_markdown, sections_json, user_id, is_public,
                                         view_count, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(share_id) DO NOTHING
            "#,
        )
        .bind(&spec.id)
        .bind(&spec.share_id)
        .bind(spec.cache_key())
        .bind(&spec.metadata.repo_owner)
        .bind(&spec.metadata.repo_name)
        .bind(&spec.metadata.repo_url)
        .bind(&spec.metadata.commit_sha)
        .bind(&spec.metadata.analysis_version)
        .bind(spec.metadata.generated_at.timestamp_millis())
        .bind(&spec.markdown)
        .bind(&sections_json)
        .bind(&spec.user_id)
        .bind(spec.is_public as i64)
        .bind(spec.view_count)
        .bind(spec.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            Ok(InsertOutcome::ShareIdTaken)
        } else {
            Ok(InsertOutcome::Inserted)
        }
    }

    async fn latest_for_repo(
        &self,
        cache_key: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<StoredSpec>> {
        let sql = format!(
            "SELECT {} FROM generated_specs \
             WHERE repo_key = ? AND is_public = 1 AND created_at >= ? \
             ORDER BY created_at DESC LIMIT 1",
            SELECT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(cache_key)
            .bind(since.timestamp_millis())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_spec).transpose()
    }

    async fn get_by_share_id(&self, share_id: &str) -> Result<Option<StoredSpec>> {
        let sql = format!(
            "SELECT {} FROM generated_specs WHERE share_id = ?",
            SELECT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(share_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_spec).transpose()
    }

    async fn increment_view(&self, share_id: &str) -> Result<bool> {
        let result =
            sqlx::query("UPDATE generated_specs SET view_count = view_count + 1 WHERE share_id = ?")
                .bind(share_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_for_user(&self, user_id: &str, limit: i64) -> Result<Vec<StoredSpec>> {
        let sql = format!(
            "SELECT {} FROM generated_specs WHERE user_id = ? \
             ORDER BY created_at DESC LIMIT ?",
            SELECT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .bind(limit.max(0))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_spec).collect()
    }

    async fn set_visibility(
        &self,
        share_id: &str,
        user_id: &str,
        is_public: bool,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE generated_specs SET is_public = ? WHERE share_id = ? AND user_id = ?",
        )
        .bind(is_public as i64)
        .bind(share_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, share_id: &str, user_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM generated_specs WHERE share_id = ? AND user_id = ?")
            .bind(share_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn publish(&self, share_id: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE generated_specs SET is_public = 1 WHERE share_id = ?")
            .bind(share_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn discard_unpublished(&self, share_id: &str) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM generated_specs WHERE share_id = ? AND is_public = 0")
                .bind(share_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn popular_repos(&self, limit: i64) -> Result<Vec<PopularRepo>> {
        // With MAX() in the select list, SQLite takes the bare columns from
        // the row holding the maximum, i.e. the newest spec.
        let rows = sqlx::query(
            r#"
            SELECT repo_owner, repo_name, repo_url,
                   COUNT(*) AS analysis_count,
                   SUM(view_count) AS total_views,
                   MAX(created_at) AS latest
            FROM generated_specs
            WHERE is_public = 1
            GROUP BY repo_key
            ORDER BY total_views DESC, analysis_count DESC, repo_key ASC
            LIMIT ?
            "#,
        )
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| PopularRepo {
                repo_owner: row.get("repo_owner"),
                repo_name: row.get("repo_name"),
                repo_url: row.get("repo_url"),
                analysis_count: row.get("analysis_count"),
                total_views: row.get("total_views"),
            })
            .collect())
    }
}
