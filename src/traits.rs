//! External capability traits.
//!
//! The pipeline talks to two outside services, each behind a trait so
//! tests and alternative backends can be injected:
//!
//! | Trait | Production impl | Purpose |
//! |-------|-----------------|---------|
//! | [`RepoHost`] | [`crate::github::GithubClient`] | Repository metadata, listings, file contents |
//! | [`TextGenerator`] | [`crate::llm`] backends | Complete and incremental text generation |
//!
//! Both return typed errors. The pipeline classifies failures through
//! [`HostError::kind`] and [`GenerationError::kind`], never by inspecting
//! message text.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::collections::BTreeMap;
use thiserror::Error;

use repospec_core::error::ErrorKind;
use repospec_core::models::{CommitSummary, Contributor, NodeKind, Release, RepoMetadata};
use repospec_core::RepoReference;

// ============ Repository host ============

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HostError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("rate limited by hosting API (status {status})")]
    RateLimited { status: u16 },
    #[error("hosting API returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("request to hosting API failed: {0}")]
    Transport(String),
    #[error("unexpected response from hosting API: {0}")]
    Decode(String),
}

impl HostError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HostError::NotFound(_) => ErrorKind::RepoNotFound,
            HostError::RateLimited { .. } => ErrorKind::RateLimited,
            _ => ErrorKind::AnalysisFailed,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, HostError::NotFound(_))
    }
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub path: String,
    pub kind: NodeKind,
}

/// Read-only access to a repository hosting API.
#[async_trait]
pub trait RepoHost: Send + Sync {
    async fn repository(&self, repo: &RepoReference) -> Result<RepoMetadata, HostError>;

    /// Bytes of code per language.
    async fn languages(&self, repo: &RepoReference) -> Result<BTreeMap<String, u64>, HostError>;

    /// Decoded README text, `None` when the repository has none.
    async fn readme(&self, repo: &RepoReference) -> Result<Option<String>, HostError>;

    /// Entries of the directory at `path` (`""` is the root).
    async fn list_dir(&self, repo: &RepoReference, path: &str)
        -> Result<Vec<DirEntry>, HostError>;

    /// Decoded text of the file at `path`, `None` when it is not a text file.
    async fn file_content(&self, repo: &RepoReference, path: &str)
        -> Result<Option<String>, HostError>;

    async fn contributors(
        &self,
        repo: &RepoReference,
        limit: usize,
    ) -> Result<Vec<Contributor>, HostError>;

    /// `None` when the repository has no releases.
    async fn latest_release(&self, repo: &RepoReference) -> Result<Option<Release>, HostError>;

    /// Newest commits on the default branch, newest first.
    async fn recent_commits(
        &self,
        repo: &RepoReference,
        limit: usize,
    ) -> Result<Vec<CommitSummary>, HostError>;
}

// ============ Text generation ============

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error("text generation is disabled")]
    Disabled,
    #[error("model provider rate limit reached")]
    RateLimited,
    #[error("model provider returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("request to model provider failed: {0}")]
    Transport(String),
    #[error("unexpected response from model provider: {0}")]
    Decode(String),
    #[error("model returned empty content")]
    Empty,
    #[error("generation timed out")]
    Timeout,
}

impl GenerationError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::GenerationFailed
    }
}

/// A prompt ready to send to a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub system: String,
    pub prompt: String,
    pub max_tokens: u32,
}

/// Ordered text fragments from incremental generation. The stream ends
/// when the model is done.
pub type FragmentStream = BoxStream<'static, Result<String, GenerationError>>;

/// A large-language-model capability.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Backend name for logs (`"anthropic"`, `"openai"`, ...).
    fn name(&self) -> &str;

    /// Produce the whole document in one call.
    async fn complete(&self, request: &GenerationRequest) -> Result<String, GenerationError>;

    /// Produce the document as a stream of fragments.
    async fn stream(&self, request: &GenerationRequest) -> Result<FragmentStream, GenerationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_errors_classify_by_variant() {
        assert_eq!(
            HostError::NotFound("acme/x".into()).kind(),
            ErrorKind::RepoNotFound
        );
        assert_eq!(
            HostError::RateLimited { status: 403 }.kind(),
            ErrorKind::RateLimited
        );
        assert_eq!(
            HostError::Status {
                status: 502,
                message: "rate limit mentioned in body".into()
            }
            .kind(),
            ErrorKind::AnalysisFailed
        );
        assert_eq!(
            HostError::Transport("reset".into()).kind(),
            ErrorKind::AnalysisFailed
        );
    }

    #[test]
    fn generation_errors_are_generation_failed() {
        for err in [
            GenerationError::Disabled,
            GenerationError::RateLimited,
            GenerationError::Empty,
            GenerationError::Timeout,
        ] {
            assert_eq!(err.kind(), ErrorKind::GenerationFailed);
        }
    }
}
