//! Error taxonomy for the analysis pipeline.
//!
//! Every fatal pipeline failure carries one [`ErrorKind`] from a closed set.
//! Stages produce the kind directly; nothing downstream re-parses message
//! text to classify an error.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Closed set of request-level failure classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Client input is not a repository reference. Never retried.
    InvalidUrl,
    /// Repository missing or private without access. Never retried.
    RepoNotFound,
    /// The hosting API throttled us. The caller may retry after a delay.
    RateLimited,
    /// Metadata fetch failed, or any unclassified failure.
    AnalysisFailed,
    /// The text-generation capability errored or returned nothing.
    GenerationFailed,
}

impl ErrorKind {
    /// HTTP status for this kind.
    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::InvalidUrl => 400,
            ErrorKind::RepoNotFound => 404,
            ErrorKind::RateLimited => 429,
            ErrorKind::AnalysisFailed | ErrorKind::GenerationFailed => 500,
        }
    }

    /// Wire code, e.g. `"REPO_NOT_FOUND"`.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::InvalidUrl => "INVALID_URL",
            ErrorKind::RepoNotFound => "REPO_NOT_FOUND",
            ErrorKind::RateLimited => "RATE_LIMITED",
            ErrorKind::AnalysisFailed => "ANALYSIS_FAILED",
            ErrorKind::GenerationFailed => "GENERATION_FAILED",
        }
    }

    /// User-facing message shown when no more specific text is available.
    pub fn default_message(self) -> &'static str {
        match self {
            ErrorKind::InvalidUrl => {
                "Invalid GitHub repository URL. Please enter a valid URL."
            }
            ErrorKind::RepoNotFound => {
                "Repository not found. Make sure it exists and is public."
            }
            ErrorKind::RateLimited => {
                "GitHub API rate limit reached. Try again in a few minutes."
            }
            ErrorKind::AnalysisFailed => {
                "Analysis failed. This might be an unusual project structure."
            }
            ErrorKind::GenerationFailed => {
                "Specification generation failed. Please try again."
            }
        }
    }

    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::RateLimited)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A fatal pipeline failure: a kind plus a diagnostic message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct PipelineError {
    pub kind: ErrorKind,
    pub message: String,
}

impl PipelineError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Error with the kind's default user-facing message.
    pub fn from_kind(kind: ErrorKind) -> Self {
        Self::new(kind, kind.default_message())
    }

    pub fn analysis(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AnalysisFailed, message)
    }

    pub fn generation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::GenerationFailed, message)
    }

    /// The message shown to API clients.
    ///
    /// Diagnostic text is kept for `INVALID_URL` and `GENERATION_FAILED`;
    /// other kinds use their default message so upstream response bodies
    /// never leak to clients.
    pub fn public_message(&self) -> String {
        match self.kind {
            ErrorKind::InvalidUrl | ErrorKind::GenerationFailed => self.message.clone(),
            kind => kind.default_message().to_string(),
        }
    }
}
