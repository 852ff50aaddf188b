//! CLI command implementations.
//!
//! Each `run_*` function backs one `repospec` subcommand. Human output goes
//! to stdout; progress goes to stderr so `--json` output stays parseable.

use anyhow::{bail, Result};
use chrono::SecondsFormat;
use serde_json::json;

use repospec_core::models::{AnalysisDepth, AnalysisOptions, StoredSpec};
use repospec_core::store::SpecStore;

use crate::config::Config;
use crate::db;
use crate::pipeline::Pipeline;
use crate::progress::StderrProgress;
use crate::sqlite_store::SqliteSpecStore;

/// Flags of `repospec analyze`.
#[derive(Debug, Clone, Default)]
pub struct AnalyzeFlags {
    pub deep: bool,
    pub no_api_docs: bool,
    pub no_diagram: bool,
    pub refresh: bool,
    pub json: bool,
}

impl AnalyzeFlags {
    pub fn options(&self) -> AnalysisOptions {
        AnalysisOptions {
            include_api_docs: !self.no_api_docs,
            include_architecture_diagram: !self.no_diagram,
            analysis_depth: if self.deep {
                AnalysisDepth::Deep
            } else {
                AnalysisDepth::Standard
            },
            refresh: self.refresh,
        }
    }
}

pub async fn run_analyze(config: &Config, repo: &str, flags: &AnalyzeFlags) -> Result<()> {
    let pipeline = Pipeline::from_config(config).await?;
    let progress = StderrProgress {
        repo: repo.to_string(),
    };

    let outcome = match pipeline
        .analyze(repo, &flags.options(), None, &progress)
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => bail!("{}: {}", e.kind, e.message),
    };
    let share_url = pipeline.share_url(&outcome.stored.share_id);

    if flags.json {
        let body = json!({
            "specId": outcome.stored.share_id,
            "shareUrl": share_url,
            "cached": outcome.cached,
            "spec": outcome.stored.to_generated(),
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        println!("{}", outcome.stored.markdown);
        eprintln!(
            "\n{} {}",
            if outcome.cached { "cached:" } else { "saved:" },
            share_url
        );
    }
    Ok(())
}

async fn open_store(config: &Config) -> Result<SqliteSpecStore> {
    Ok(SqliteSpecStore::new(db::connect(config).await?))
}

pub async fn run_get(config: &Config, share_id: &str) -> Result<()> {
    let store = open_store(config).await?;
    let spec = store.get_by_share_id(share_id).await?;
    store.pool().close().await;

    let Some(spec) = spec else {
        bail!("spec not found: {}", share_id);
    };
    println!("share_id:   {}", spec.share_id);
    println!(
        "repository: {}/{}",
        spec.metadata.repo_owner, spec.metadata.repo_name
    );
    println!(
        "created:    {}",
        spec.created_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    );
    println!("views:      {}", spec.view_count);
    println!("public:     {}", spec.is_public);
    println!();
    println!("{}", spec.markdown);
    Ok(())
}

fn print_row(spec: &StoredSpec) {
    println!(
        "{:<12} {:<40} {:>6}  {:<7} {}",
        spec.share_id,
        format!("{}/{}", spec.metadata.repo_owner, spec.metadata.repo_name),
        spec.view_count,
        if spec.is_public { "public" } else { "private" },
        spec.created_at.format("%Y-%m-%d %H:%M")
    );
}

pub async fn run_list(config: &Config, user_id: &str, limit: i64) -> Result<()> {
    let store = open_store(config).await?;
    let specs = store.list_for_user(user_id, limit).await?;
    store.pool().close().await;

    if specs.is_empty() {
        println!("No specs for user {}.", user_id);
        return Ok(());
    }
    println!(
        "{:<12} {:<40} {:>6}  {:<7} CREATED",
        "SHARE ID", "REPOSITORY", "VIEWS", "VISIBLE"
    );
    for spec in &specs {
        print_row(spec);
    }
    Ok(())
}

pub async fn run_popular(config: &Config, limit: i64) -> Result<()> {
    let store = open_store(config).await?;
    let repos = store.popular_repos(limit).await?;
    store.pool().close().await;

    if repos.is_empty() {
        println!("No public specs yet.");
        return Ok(());
    }
    println!("{:<40} {:>6} {:>9}  URL", "REPOSITORY", "VIEWS", "ANALYSES");
    for repo in &repos {
        println!(
            "{:<40} {:>6} {:>9}  {}",
            format!("{}/{}", repo.repo_owner, repo.repo_name),
            repo.total_views,
            repo.analysis_count,
            repo.repo_url
        );
    }
    Ok(())
}

pub async fn run_visibility(
    config: &Config,
    share_id: &str,
    user_id: &str,
    is_public: bool,
) -> Result<()> {
    let store = open_store(config).await?;
    let changed = store.set_visibility(share_id, user_id, is_public).await?;
    store.pool().close().await;

    if !changed {
        bail!("no spec {} owned by {}", share_id, user_id);
    }
    println!(
        "{} is now {}.",
        share_id,
        if is_public { "public" } else { "private" }
    );
    Ok(())
}

pub async fn run_delete(config: &Config, share_id: &str, user_id: &str) -> Result<()> {
    let store = open_store(config).await?;
    let deleted = store.delete(share_id, user_id).await?;
    store.pool().close().await;

    if !deleted {
        bail!("no spec {} owned by {}", share_id, user_id);
    }
    println!("Deleted {}.", share_id);
    Ok(())
}
