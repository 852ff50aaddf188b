//! Repository existence and accessibility check.
//!
//! Makes exactly one hosting API call. A failed result short-circuits the
//! pipeline before any analysis starts.

use std::sync::Arc;

use repospec_core::error::ErrorKind;
use repospec_core::models::ValidationResult;
use repospec_core::RepoReference;

use crate::traits::RepoHost;

/// Repositories larger than this (in KB) are logged but still analyzed.
const LARGE_REPO_KB: u64 = 100_000;

pub struct RepositoryValidator {
    host: Arc<dyn RepoHost>,
}

impl RepositoryValidator {
    pub fn new(host: Arc<dyn RepoHost>) -> Self {
        Self { host }
    }

    pub async fn validate(&self, repo: &RepoReference) -> ValidationResult {
        if repo.owner.is_empty() || repo.repo.is_empty() {
            return ValidationResult::failed(ErrorKind::InvalidUrl, "empty owner or repository");
        }

        match self.host.repository(repo).await {
            Ok(meta) => {
                if meta.size_kb > LARGE_REPO_KB {
                    tracing::warn!(repo = %repo, size_kb = meta.size_kb, "repository is large");
                }
                ValidationResult::ok()
            }
            Err(e) => {
                let kind = e.kind();
                tracing::info!(repo = %repo, error = %e, code = %kind, "repository validation failed");
                ValidationResult::failed(kind, e.to_string())
            }
        }
    }
}
