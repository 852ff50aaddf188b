//! The assembled pipeline.
//!
//! [`Pipeline`] owns one instance of every stage plus the spec cache. It is
//! built once per process by [`Pipeline::from_config`] and shared behind an
//! `Arc` by the HTTP server, the stream controller and the CLI. Nothing in
//! it holds per-request state.

use anyhow::Context;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use repospec_core::error::{ErrorKind, PipelineError};
use repospec_core::models::{AnalysisOptions, StoredSpec};
use repospec_core::store::SpecStore;
use repospec_core::{parse_reference, FreshnessPolicy, SpecCache};

use crate::analyzer::RepositoryAnalyzer;
use crate::config::Config;
use crate::generator::SpecGenerator;
use crate::github::GithubClient;
use crate::progress::AnalysisProgress;
use crate::sections::SectionRegistry;
use crate::sqlite_store::SqliteSpecStore;
use crate::traits::{RepoHost, TextGenerator};
use crate::validator::RepositoryValidator;
use crate::{db, llm, migrate};

/// Result of a batch run.
#[derive(Debug, Clone)]
pub struct AnalyzeOutcome {
    pub stored: StoredSpec,
    /// Served from the cache without running analysis.
    pub cached: bool,
}

pub struct Pipeline {
    pub validator: RepositoryValidator,
    pub analyzer: RepositoryAnalyzer,
    pub generator: SpecGenerator,
    pub cache: SpecCache,
    stage_timeout: Duration,
    channel_capacity: usize,
    public_url: String,
}

impl Pipeline {
    /// Wire the stages to explicit backends.
    pub fn new(
        host: Arc<dyn RepoHost>,
        backend: Arc<dyn TextGenerator>,
        store: Arc<dyn SpecStore>,
        config: &Config,
    ) -> Self {
        let registry = Arc::new(SectionRegistry::standard());
        let cache = SpecCache::new(
            store,
            FreshnessPolicy::hours(config.cache.freshness_hours),
            config.cache.share_id_length,
            config.cache.max_share_id_attempts,
        );
        Self {
            validator: RepositoryValidator::new(host.clone()),
            analyzer: RepositoryAnalyzer::new(host),
            generator: SpecGenerator::new(
                backend,
                registry,
                config.llm.max_tokens,
                config.pipeline.channel_capacity,
            ),
            cache,
            stage_timeout: Duration::from_secs(config.pipeline.stage_timeout_secs),
            channel_capacity: config.pipeline.channel_capacity.max(1),
            public_url: config.server.public_url.clone(),
        }
    }

    /// Build the production pipeline: GitHub client, configured model
    /// backend and the SQLite spec store (schema applied).
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let host = Arc::new(GithubClient::new(&config.github)?);
        let backend = llm::create_generator(&config.llm)?;
        let pool = db::connect(config).await?;
        migrate::apply(&pool)
            .await
            .context("failed to apply database schema")?;
        let store = Arc::new(SqliteSpecStore::new(pool));
        tracing::info!(
            backend = backend.name(),
            db = %config.db.path.display(),
            "pipeline ready"
        );
        Ok(Self::new(host, backend, store, config))
    }

    pub fn stage_timeout(&self) -> Duration {
        self.stage_timeout
    }

    /// Buffer size for per-request event and fragment channels.
    pub fn channel_capacity(&self) -> usize {
        self.channel_capacity
    }

    /// Public link for a stored spec.
    pub fn share_url(&self, share_id: &str) -> String {
        format!("{}/spec/{}", self.public_url, share_id)
    }

    /// Run `fut` under the stage timeout, failing with `kind` on expiry.
    pub async fn within<T, F>(&self, stage: &str, kind: ErrorKind, fut: F) -> Result<T, PipelineError>
    where
        F: Future<Output = Result<T, PipelineError>>,
    {
        match tokio::time::timeout(self.stage_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(stage, timeout_secs = self.stage_timeout.as_secs(), "stage timed out");
                Err(PipelineError::new(kind, format!("{} timed out", stage)))
            }
        }
    }

    /// Run the whole pipeline synchronously and persist the result.
    ///
    /// A fresh cached spec is returned as-is unless `options.refresh` is
    /// set.
    pub async fn analyze(
        &self,
        input: &str,
        options: &AnalysisOptions,
        owner_id: Option<&str>,
        progress: &dyn AnalysisProgress,
    ) -> Result<AnalyzeOutcome, PipelineError> {
        let repo = parse_reference(input)?;

        if !options.refresh {
            if let Some(stored) = self.cache.get_fresh(&repo).await {
                tracing::info!(repo = %repo, share_id = %stored.share_id, "serving cached spec");
                return Ok(AnalyzeOutcome { stored, cached: true });
            }
        }

        let validation = self
            .within("validation", ErrorKind::AnalysisFailed, async {
                Ok(self.validator.validate(&repo).await)
            })
            .await?;
        if !validation.valid {
            let kind = validation.error_kind.unwrap_or(ErrorKind::AnalysisFailed);
            return Err(PipelineError::new(
                kind,
                validation.message.unwrap_or_else(|| kind.default_message().to_string()),
            ));
        }

        let record = self
            .within(
                "analysis",
                ErrorKind::AnalysisFailed,
                self.analyzer.analyze(&repo, options, progress),
            )
            .await?;

        let spec = self
            .within(
                "generation",
                ErrorKind::GenerationFailed,
                self.generator.generate(&record, options),
            )
            .await?;

        let stored = self.cache.put(&spec, owner_id).await.map_err(|e| {
            tracing::error!(repo = %repo, error = %e, "failed to persist spec");
            PipelineError::analysis(format!("failed to save spec: {}", e))
        })?;
        tracing::info!(repo = %repo, share_id = %stored.share_id, "spec generated");
        Ok(AnalyzeOutcome {
            stored,
            cached: false,
        })
    }
}
